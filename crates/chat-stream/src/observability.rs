use once_cell::sync::OnceCell;
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

/// Hook for lossy or noteworthy decoder decisions.
///
/// None of these are errors from the consumer's point of view: decoding continues
/// after every callback. Implementations must be cheap; they run on the pump.
pub trait DecodeObserver: Send + Sync {
    /// The payload buffer grew past its limit without yielding a complete JSON object
    /// and was discarded.
    fn payload_overflow(&self, discarded_len: usize) {
        let _ = discarded_len;
    }

    /// A brace-balanced payload failed to parse and was rerouted to the plain-text path.
    fn parse_fallback(&self, error: &str, payload_len: usize) {
        let _ = (error, payload_len);
    }

    /// A text value that looked like a raw JSON object was kept out of the visible text.
    fn json_blob_suppressed(&self, text_len: usize) {
        let _ = text_len;
    }

    /// The display text changed in a way that was not a pure append.
    fn display_rewritten(&self, previous_len: usize, current_len: usize) {
        let _ = (previous_len, current_len);
    }

    /// The stream ended while an incomplete JSON object was still buffered.
    fn incomplete_payload_dropped(&self, len: usize) {
        let _ = len;
    }
}

/// Default observer that forwards every decoder anomaly to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DecodeObserver for TracingObserver {
    fn payload_overflow(&self, discarded_len: usize) {
        warn!(discarded_len, "payload buffer overflow; discarding buffered data");
    }

    fn parse_fallback(&self, error: &str, payload_len: usize) {
        debug!(%error, payload_len, "payload is not valid JSON; treating it as plain text");
    }

    fn json_blob_suppressed(&self, text_len: usize) {
        debug!(text_len, "text value looks like a JSON object; not shown");
    }

    fn display_rewritten(&self, previous_len: usize, current_len: usize) {
        debug!(previous_len, current_len, "display text rewritten");
    }

    fn incomplete_payload_dropped(&self, len: usize) {
        warn!(len, "stream ended with an incomplete JSON payload");
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled() -> bool {
    match std::env::var("CHAT_STREAM_OBSERVABILITY") {
        Ok(value) => parse_bool_env(&value).unwrap_or(true),
        Err(_) => true,
    }
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("CHAT_STREAM_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Splits the JSON log path into the directory to create and the file name to write.
fn split_log_path(raw: &str) -> (std::path::PathBuf, String) {
    let path = std::path::Path::new(raw);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("chat-stream.logs.jsonl")
        .to_string();
    (dir, file_name)
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `CHAT_STREAM_OBSERVABILITY`: optional enable/disable flag (default enabled).
/// - `CHAT_STREAM_LOG_LEVEL`: optional level/filter override (`info`, `chat_stream=debug`, ...).
/// - `CHAT_STREAM_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact human-readable format.
/// - `RUST_LOG`: optional filter override.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("CHAT_STREAM_JSON_LOG_PATH") {
            let (dir, file_name) = split_log_path(&path_raw);
            let _ = std::fs::create_dir_all(&dir);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
