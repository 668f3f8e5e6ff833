//! Synheart Guide - Client-resident behavioral telemetry and adaptive guidance engine
//!
//! Guide turns raw interaction events into throttled guidance insights through a
//! cooperative pipeline: event capture → rolling buffers → metrics, intent and anomaly
//! detection → insight generation (remote or local rules) → throttle/dedup → delivery.
//!
//! ## Entry points
//!
//! - [`GuidancePipeline`]: synchronous core with an explicit clock (replays, C ABI, tests)
//! - [`GuidanceEngine`]: async engine that subscribes to an [`capture::InputSource`],
//!   ticks on a timer and publishes insights on its [`DeliveryBus`]

pub mod bus;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod insight;
pub mod intent;
pub mod metrics;
pub mod patterns;
pub mod pipeline;
pub mod throttle;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use bus::{ActiveInsightPolicy, DeliveryBus, InsightEvent, InsightSubscription};
pub use config::GuideConfig;
pub use engine::{EngineSnapshot, GuidanceEngine};
pub use error::GuideError;
pub use insight::{fallback_insight, InferenceClient, InsightGenerator};
pub use pipeline::{AnalysisSnapshot, GuidancePipeline};
pub use types::{BehaviorAnalysis, BehaviorMetrics, Insight, UserIntent};

/// Guide version
pub const GUIDE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by diagnostics
pub const PRODUCER_NAME: &str = "synheart-guide";

/// Name of the delivery event UI consumers listen for
pub const INSIGHT_EVENT_NAME: &str = "intelligentAdvice";
