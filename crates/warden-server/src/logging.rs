//! Logging initialization and request-scoped identifiers.
//!
//! Structured logs go through `tracing`; the subscriber is configured once
//! at startup from the `[logging]` config section. Sink failures are the
//! subscriber's problem, never the caller's.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use warden_types::LoggingConfig;

/// Install the global subscriber. Safe to call once per process.
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_level(&cfg.level);

    let writer = match cfg.output.trim().to_ascii_lowercase().as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        "file" => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(cfg.file_path.trim())
                .with_context(|| format!("open log file {}", cfg.file_path))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        // "stderr" and anything unrecognized.
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);

    let result = if cfg.format.trim().eq_ignore_ascii_case("text") {
        builder.try_init()
    } else {
        builder.json().try_init()
    };
    result.map_err(|e| anyhow::anyhow!("install tracing subscriber: {e}"))
}

fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Short random id correlating the request/response log lines of one call.
pub fn new_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
