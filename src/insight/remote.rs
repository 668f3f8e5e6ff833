//! Chat-completion inference client
//!
//! Serializes an analysis into a prompt, asks a chat-completion endpoint for a single JSON
//! insight and validates what comes back. Every failure is a [`GuideError`] the caller
//! degrades on; nothing here retries.

use super::InferenceClient;
use crate::config::RemoteConfig;
use crate::error::GuideError;
use crate::types::{BehaviorAnalysis, Insight};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Number of trailing queue events rendered into the prompt
const PROMPT_EVENT_TAIL: usize = 10;

/// Instructions sent as the system message of every request
pub const SYSTEM_PROMPT: &str = r#"You are a UX guidance assistant embedded in a web application. You receive aggregated behavioral telemetry for one user session and decide whether the user would benefit from a short piece of guidance right now.

SIGNALS TO WATCH:
1. Confusion: erratic pointer movement, excessive scrolling, rapid clicking
2. Frustration: high-velocity movement, backtracking, repeated actions
3. Hesitation: pointer pauses, long hovers, indecision
4. Progress: focused interactions, steady task completion
5. Abandonment risk: falling engagement

PRINCIPLES:
- Be specific and actionable
- Help before the user gets stuck
- Point at existing features or shortcuts
- Stay quiet when there is no clear need

RESPONSE FORMAT:
Respond with exactly one JSON object:
{
  "type": "guidance|warning|suggestion|help_offer",
  "priority": "low|medium|high|urgent",
  "title": "Brief, action-oriented title",
  "message": "Clear, helpful message (2-3 sentences max)",
  "actions": [
    { "id": "unique_action_id", "label": "Button text", "type": "navigate|highlight|tutorial|external|dismiss", "target": "css_selector_or_url" }
  ],
  "metadata": {
    "confidence": 0.85,
    "reasoning": "Why this insight was generated",
    "trigger_conditions": ["specific patterns detected"],
    "estimated_impact": 0.7
  }
}"#;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Render the user message for one analysis
pub fn build_analysis_prompt(analysis: &BehaviorAnalysis) -> String {
    let m = &analysis.metrics;
    let intent = &analysis.intent;

    let struggles = if intent.struggling_with.is_empty() {
        "none detected".to_string()
    } else {
        intent
            .struggling_with
            .iter()
            .map(|tag| tag.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let patterns =
        serde_json::to_string_pretty(&analysis.patterns).unwrap_or_else(|_| "{}".to_string());

    let anomalies = if analysis.anomalies.is_empty() {
        "- none".to_string()
    } else {
        analysis
            .anomalies
            .iter()
            .map(|a| {
                let kind = serde_json::to_value(a.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                format!("- {}: {}", kind, a.count)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let recommendations = if analysis.recommendations.is_empty() {
        "none".to_string()
    } else {
        analysis.recommendations.join(", ")
    };

    let content_context = analysis
        .content_context
        .as_ref()
        .and_then(|c| serde_json::to_string_pretty(c).ok())
        .map(|c| format!("CONTENT CONTEXT:\n{}\n\n", c))
        .unwrap_or_default();

    let skip = analysis.events.len().saturating_sub(PROMPT_EVENT_TAIL);
    let events = analysis
        .events
        .iter()
        .skip(skip)
        .map(|e| format!("{}: {}", e.kind.as_str(), e.target_path))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze this user behavior data:\n\n\
         SESSION OVERVIEW:\n\
         - Duration: {}s\n\
         - Pointer distance: {}px\n\
         - Clicks: {}\n\
         - Scrolling: {}px\n\
         - Frustration score: {:.2}\n\
         - Engagement score: {:.2}\n\
         - Confidence score: {:.2}\n\n\
         USER INTENT:\n\
         - Primary: {}\n\
         - Urgency: {}\n\
         - Struggling with: {}\n\
         - Next likely action: {}\n\n\
         DETECTED PATTERNS:\n{}\n\n\
         ANOMALIES:\n{}\n\n\
         SYSTEM RECOMMENDATIONS:\n{}\n\n\
         {}\
         RECENT EVENTS (last {}):\n{}\n\n\
         Based on this analysis, should the user get guidance? If yes, what specific help \
         would be most valuable right now?",
        (analysis.session_duration_ms / 1000.0).round(),
        m.pointer_distance_px.round(),
        m.click_count,
        m.scroll_distance_px.round(),
        m.frustration_score,
        m.engagement_score,
        m.confidence_score,
        intent.primary_category.as_str(),
        intent.urgency.as_str(),
        struggles,
        intent.predicted_next_action,
        patterns,
        anomalies,
        recommendations,
        content_context,
        PROMPT_EVENT_TAIL,
        events,
    )
}

/// Extract and validate the insight from a chat-completion response body
pub fn parse_completion(body: &str) -> Result<Insight, GuideError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| GuideError::MalformedResponse(e.to_string()))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| GuideError::MalformedResponse("completion has no content".into()))?;

    Insight::from_json(&content)
}

/// [`InferenceClient`] backed by a chat-completion HTTP endpoint
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: Client,
    config: RemoteConfig,
}

impl ChatCompletionClient {
    pub fn new(config: RemoteConfig) -> Result<Self, GuideError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GuideError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(config, client))
    }

    /// Use an already configured HTTP client
    pub(crate) fn with_client(config: RemoteConfig, client: Client) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Whether the endpoint answers its model listing
    pub async fn test_connection(&self) -> bool {
        let request = self.authorize(self.client.get(self.endpoint("models")));
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "inference endpoint unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl InferenceClient for ChatCompletionClient {
    async fn infer(&self, analysis: &BehaviorAnalysis) -> Result<Insight, GuideError> {
        let prompt = build_analysis_prompt(analysis);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .authorize(self.client.post(self.endpoint("chat/completions")))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GuideError::RemoteStatus(status.as_u16()));
        }

        let text = response.text().await?;
        let insight = parse_completion(&text)?;
        debug!(sequence = analysis.sequence, title = %insight.title, "remote insight received");
        Ok(insight)
    }

    fn name(&self) -> &str {
        "chat_completion"
    }
}
