//! Guide CLI - Command-line interface for Synheart Guide
//!
//! Commands:
//! - replay: Run recorded host events through the guidance pipeline
//! - validate: Validate a host event file
//! - doctor: Diagnose configuration and environment
//! - schema: Print input/output schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_guide::bus::InsightEvent;
use synheart_guide::capture::HostEvent;
use synheart_guide::config::GuideConfig;
use synheart_guide::insight::ChatCompletionClient;
use synheart_guide::pipeline::{GuidancePipeline, PipelineStats};
use synheart_guide::{GuideError, GUIDE_VERSION, INSIGHT_EVENT_NAME, PRODUCER_NAME};
use tracing::{debug, info};

/// Guide - Behavioral telemetry and adaptive guidance engine
#[derive(Parser)]
#[command(name = "guide")]
#[command(author = "Synheart AI Inc")]
#[command(version = GUIDE_VERSION)]
#[command(about = "Turn interaction telemetry into throttled guidance insights", long_about = None)]
struct Cli {
    /// Log pipeline decisions to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded host events (NDJSON) through the local pipeline
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Print pipeline counters to stderr when done
        #[arg(long)]
        stats: bool,
    },

    /// Validate a host event file
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Engine configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Probe the configured inference endpoint
        #[arg(long)]
        check_remote: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one insight event per line)
    Ndjson,
    /// JSON array of insight events
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Host event schema
    Input,
    /// Insight event schema
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // stdout carries the insight stream
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), GuideCliError> {
    match cli.command {
        Commands::Replay {
            input,
            config,
            output_format,
            stats,
        } => cmd_replay(&input, config.as_deref(), output_format, stats),
        Commands::Validate { input, json } => cmd_validate(&input, json),
        Commands::Doctor {
            config,
            check_remote,
            json,
        } => cmd_doctor(config.as_deref(), check_remote, json),
        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn read_input(input: &Path) -> Result<String, GuideCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<GuideConfig, GuideCliError> {
    let config = match path {
        Some(path) => GuideConfig::from_file(path)?,
        None => GuideConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Parse one NDJSON line; `line_no` is 1-based
fn parse_event(line: &str, line_no: usize) -> Result<HostEvent, GuideCliError> {
    serde_json::from_str(line)
        .map_err(|e| GuideCliError::ParseError(format!("line {}: {}", line_no, e)))
}

// ============================================================================
// replay
// ============================================================================

/// Drives a pipeline on the timeline of the recorded events: aggregation ticks fire at
/// fixed offsets from the first event, and every tick runs the local rules.
struct Replay {
    pipeline: GuidancePipeline,
    tick_ms: f64,
    next_tick_ms: Option<f64>,
    last_ms: f64,
    surfaced: Vec<InsightEvent>,
}

impl Replay {
    fn new(config: &GuideConfig) -> Self {
        Self {
            pipeline: GuidancePipeline::new(config),
            tick_ms: config.tick_interval_ms as f64,
            next_tick_ms: None,
            last_ms: 0.0,
            surfaced: Vec::new(),
        }
    }

    fn feed(&mut self, event: &HostEvent) {
        let at_ms = event
            .timestamp_ms
            .filter(|t| t.is_finite())
            .unwrap_or(self.last_ms)
            .max(self.last_ms);
        let next_tick = *self.next_tick_ms.get_or_insert(at_ms + self.tick_ms);

        let mut tick = next_tick;
        if at_ms >= tick {
            self.tick(tick);
            // later ticks before this event find an empty queue
            let missed = ((at_ms - tick) / self.tick_ms).floor() + 1.0;
            tick += missed * self.tick_ms;
        }
        self.next_tick_ms = Some(tick);
        self.last_ms = at_ms;

        if self.pipeline.record(event, at_ms).flush_due {
            debug!(at_ms, "eager flush");
            self.tick(at_ms);
        }
    }

    fn tick(&mut self, now_ms: f64) {
        if let Some(event) = self.pipeline.process_local(now_ms) {
            info!(at_ms = now_ms, title = %event.insight.title, "insight surfaced");
            self.surfaced.push(event);
        }
    }

    /// Run the tick that would follow the last event
    fn finish(mut self) -> (Vec<InsightEvent>, PipelineStats) {
        if let Some(tick) = self.next_tick_ms {
            self.tick(tick);
        }
        let stats = self.pipeline.stats();
        (self.surfaced, stats)
    }
}

fn cmd_replay(
    input: &Path,
    config: Option<&Path>,
    output_format: OutputFormat,
    stats: bool,
) -> Result<(), GuideCliError> {
    let config = load_config(config)?;
    if config.remote.is_some() {
        info!("replay uses the local rules only; remote section ignored");
    }

    let mut replay = Replay::new(&config);
    let mut count = 0usize;

    let reader: Box<dyn BufRead> = if input.to_string_lossy() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event = parse_event(trimmed, index + 1)?;
        replay.feed(&event);
        count += 1;
    }

    if count == 0 {
        return Err(GuideCliError::NoEvents);
    }

    let (surfaced, pipeline_stats) = replay.finish();

    let mut stdout = io::stdout();
    write!(stdout, "{}", format_output(&surfaced, &output_format)?)?;
    stdout.flush()?;

    if stats {
        eprintln!("{}", serde_json::to_string(&pipeline_stats)?);
    }
    Ok(())
}

fn format_output(events: &[InsightEvent], format: &OutputFormat) -> Result<String, GuideCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for event in events {
                out.push_str(&serde_json::to_string(event)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string(events)?)),
        OutputFormat::JsonPretty => Ok(format!("{}\n", serde_json::to_string_pretty(events)?)),
    }
}

// ============================================================================
// validate
// ============================================================================

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    /// Events whose timestamp is earlier than the previous one (clamped on capture)
    out_of_order: usize,
    /// Events without a timestamp (stamped on capture)
    unstamped: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    line: usize,
    error: String,
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), GuideCliError> {
    let input_data = read_input(input)?;

    let mut report = ValidationReport {
        total_events: 0,
        valid_events: 0,
        invalid_events: 0,
        out_of_order: 0,
        unstamped: 0,
        errors: Vec::new(),
    };
    let mut last_ts: Option<f64> = None;

    for (index, line) in input_data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        report.total_events += 1;

        match serde_json::from_str::<HostEvent>(trimmed) {
            Ok(event) => {
                report.valid_events += 1;
                match event.timestamp_ms {
                    Some(ts) => {
                        if last_ts.is_some_and(|last| ts < last) {
                            report.out_of_order += 1;
                        }
                        last_ts = Some(ts);
                    }
                    None => report.unstamped += 1,
                }
            }
            Err(e) => {
                report.invalid_events += 1;
                report.errors.push(ValidationErrorDetail {
                    line: index + 1,
                    error: e.to_string(),
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);
        println!("Out of order:   {}", report.out_of_order);
        println!("Unstamped:      {}", report.unstamped);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Line {}: {}", err.line, err.error);
            }
        }
    }

    if report.invalid_events > 0 {
        Err(GuideCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

// ============================================================================
// doctor
// ============================================================================

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

fn cmd_doctor(
    config_path: Option<&Path>,
    check_remote: bool,
    json: bool,
) -> Result<(), GuideCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::new(
        "guide_version",
        CheckStatus::Ok,
        format!("Guide version {}", GUIDE_VERSION),
    ));
    checks.push(DoctorCheck::new(
        "delivery_event",
        CheckStatus::Ok,
        format!("Insights are published as '{}'", INSIGHT_EVENT_NAME),
    ));

    let config = match config_path {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck::new(
                "config",
                CheckStatus::Error,
                "Config file does not exist",
            ));
            None
        }
        Some(path) => match GuideConfig::from_file(path).and_then(|c| c.validate().map(|_| c)) {
            Ok(config) => {
                checks.push(DoctorCheck::new(
                    "config",
                    CheckStatus::Ok,
                    format!("Config valid (tick every {} ms)", config.tick_interval_ms),
                ));
                Some(config)
            }
            Err(e) => {
                checks.push(DoctorCheck::new("config", CheckStatus::Error, e.to_string()));
                None
            }
        },
        None => {
            checks.push(DoctorCheck::new("config", CheckStatus::Ok, "Using reference defaults"));
            Some(GuideConfig::default())
        }
    };

    if let Some(config) = &config {
        match &config.remote {
            Some(remote) if remote.api_key.is_none() => checks.push(DoctorCheck::new(
                "remote",
                CheckStatus::Warning,
                format!("{} configured without an API key", remote.base_url),
            )),
            Some(remote) => checks.push(DoctorCheck::new(
                "remote",
                CheckStatus::Ok,
                format!("{} ({})", remote.base_url, remote.model),
            )),
            None => checks.push(DoctorCheck::new(
                "remote",
                CheckStatus::Ok,
                "No remote inference; local rules only",
            )),
        }

        if check_remote {
            checks.push(probe_remote(config));
        }
    }

    // Check stdin is available (for replay from a pipe)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck::new("stdin", CheckStatus::Ok, "stdin is a TTY (interactive mode)")
    } else {
        DoctorCheck::new("stdin", CheckStatus::Ok, "stdin is a pipe (replay ready)")
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: GUIDE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Guide Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(GuideCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn probe_remote(config: &GuideConfig) -> DoctorCheck {
    let Some(remote) = &config.remote else {
        return DoctorCheck::new("remote_probe", CheckStatus::Warning, "Nothing to probe");
    };

    let client = match ChatCompletionClient::new(remote.clone()) {
        Ok(client) => client,
        Err(e) => return DoctorCheck::new("remote_probe", CheckStatus::Error, e.to_string()),
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => return DoctorCheck::new("remote_probe", CheckStatus::Error, e.to_string()),
    };

    if runtime.block_on(client.test_connection()) {
        DoctorCheck::new("remote_probe", CheckStatus::Ok, "Endpoint reachable")
    } else {
        DoctorCheck::new(
            "remote_probe",
            CheckStatus::Warning,
            "Endpoint unreachable; insights will come from local rules",
        )
    }
}

// ============================================================================
// schema
// ============================================================================

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), GuideCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input: host events, one JSON object per line");
                println!();
                println!("Required:");
                println!("  kind          pointer_move | click | pointer_enter | pointer_leave | scroll");
                println!("                key_down | key_up | focus | blur | touch_start | touch_move");
                println!("                touch_end | visibility_change");
                println!();
                println!("Optional:");
                println!("  x, y          pointer/touch position (px)");
                println!("  scroll_x/y    scroll offset after the event (px)");
                println!("  key           key name for key events");
                println!("  visible       page visibility for visibility_change");
                println!("  target        {{\"type\":\"element\",\"chain\":[{{tag,id?,classes?}}, ...]}}");
                println!("                innermost element first, or {{\"type\":\"non_element\"}}");
                println!("  timestamp_ms  monotonic host timestamp; stamped on capture when missing");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output: insight events ('{}')", INSIGHT_EVENT_NAME);
                println!();
                println!("  name, event_id, emitted_at");
                println!("  insight.type      guidance | warning | suggestion | help_offer");
                println!("  insight.priority  low | medium | high | urgent");
                println!("  insight.title, insight.message");
                println!("  insight.actions   [{{id, label, type, target?, data?}}]");
                println!("                    type: navigate | highlight | tutorial | external | dismiss");
                println!("  insight.metadata  {{confidence, reasoning, trigger_conditions, estimated_impact}}");
            }
        }
    }
    Ok(())
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "HostEvent",
        "type": "object",
        "required": ["kind"],
        "properties": {
            "kind": {
                "enum": [
                    "pointer_move", "click", "pointer_enter", "pointer_leave", "scroll",
                    "key_down", "key_up", "focus", "blur", "touch_start", "touch_move",
                    "touch_end", "visibility_change"
                ]
            },
            "x": { "type": "number" },
            "y": { "type": "number" },
            "scroll_x": { "type": "number" },
            "scroll_y": { "type": "number" },
            "key": { "type": "string" },
            "visible": { "type": "boolean" },
            "timestamp_ms": { "type": "number" },
            "target": {
                "oneOf": [
                    {
                        "type": "object",
                        "required": ["type", "chain"],
                        "properties": {
                            "type": { "const": "element" },
                            "chain": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "required": ["tag"],
                                    "properties": {
                                        "tag": { "type": "string" },
                                        "id": { "type": "string" },
                                        "classes": { "type": "array", "items": { "type": "string" } }
                                    }
                                }
                            }
                        }
                    },
                    {
                        "type": "object",
                        "required": ["type"],
                        "properties": { "type": { "const": "non_element" } }
                    }
                ]
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "InsightEvent",
        "type": "object",
        "required": ["name", "event_id", "emitted_at", "insight"],
        "properties": {
            "name": { "const": INSIGHT_EVENT_NAME },
            "event_id": { "type": "string", "format": "uuid" },
            "emitted_at": { "type": "string", "format": "date-time" },
            "insight": {
                "type": "object",
                "required": ["type", "priority", "title", "message", "actions", "metadata"],
                "properties": {
                    "type": { "enum": ["guidance", "warning", "suggestion", "help_offer"] },
                    "priority": { "enum": ["low", "medium", "high", "urgent"] },
                    "title": { "type": "string", "minLength": 1 },
                    "message": { "type": "string" },
                    "actions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["id", "label", "type"],
                            "properties": {
                                "id": { "type": "string" },
                                "label": { "type": "string" },
                                "type": { "enum": ["navigate", "highlight", "tutorial", "external", "dismiss"] },
                                "target": { "type": "string" },
                                "data": {}
                            }
                        }
                    },
                    "metadata": {
                        "type": "object",
                        "required": ["confidence", "reasoning"],
                        "properties": {
                            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                            "reasoning": { "type": "string" },
                            "trigger_conditions": { "type": "array", "items": { "type": "string" } },
                            "estimated_impact": { "type": "number", "minimum": 0, "maximum": 1 }
                        }
                    }
                }
            }
        }
    })
    .to_string()
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug)]
enum GuideCliError {
    Io(io::Error),
    Guide(GuideError),
    Json(serde_json::Error),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for GuideCliError {
    fn from(e: io::Error) -> Self {
        GuideCliError::Io(e)
    }
}

impl From<GuideError> for GuideCliError {
    fn from(e: GuideError) -> Self {
        GuideCliError::Guide(e)
    }
}

impl From<serde_json::Error> for GuideCliError {
    fn from(e: serde_json::Error) -> Self {
        GuideCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GuideCliError> for CliError {
    fn from(e: GuideCliError) -> Self {
        match e {
            GuideCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GuideCliError::Guide(GuideError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'guide doctor --config <file>' for details".to_string()),
            },
            GuideCliError::Guide(e) => CliError {
                code: "GUIDE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            GuideCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GuideCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            GuideCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            GuideCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report above".to_string()),
            },
            GuideCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'guide schema input' for the expected event format".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use synheart_guide::capture::{ElementNode, ElementTarget, EventKind};

    fn click(id: &str, at_ms: f64) -> HostEvent {
        HostEvent::new(EventKind::Click)
            .at(50.0, 50.0)
            .with_target(ElementTarget::Element {
                chain: vec![ElementNode::new("button").with_id(id)],
            })
            .with_timestamp(at_ms)
    }

    #[test]
    fn test_replay_ticks_on_event_timeline() {
        let mut replay = Replay::new(&GuideConfig::default());
        replay.feed(&click("a", 0.0));
        replay.feed(&click("b", 5_500.0));
        assert_eq!(replay.next_tick_ms, Some(6_000.0));

        let (surfaced, stats) = replay.finish();
        assert_eq!(stats.analyses, 2);
        assert_eq!(surfaced.len(), 1);
        assert_eq!(surfaced[0].insight.title, "Guidance Active");
    }

    #[test]
    fn test_replay_skips_long_gaps() {
        let mut replay = Replay::new(&GuideConfig::default());
        replay.feed(&click("a", 0.0));
        replay.feed(&click("b", 1e20));
        assert!(replay.next_tick_ms.is_some_and(|t| t >= 1e20));

        let (_, stats) = replay.finish();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.analyses, 2);
    }
}
