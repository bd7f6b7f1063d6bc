use std::time::Duration;

use crate::errors::StreamError;

/// Default upper bound for the payload buffer before it is discarded.
pub const DEFAULT_MAX_PAYLOAD_BUFFER: usize = 100_000;
/// Default length above which a `{...}` text value is treated as a leaked JSON blob.
pub const DEFAULT_JSON_BLOB_MIN_LEN: usize = 20;

/// Tuning knobs for the decode pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Payload buffer size (in bytes) past which an incomplete JSON object is dropped.
    pub max_payload_buffer: usize,
    /// Text values that look like a standalone JSON object and are longer than this
    /// are never shown as visible text.
    pub json_blob_min_len: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_payload_buffer: DEFAULT_MAX_PAYLOAD_BUFFER,
            json_blob_min_len: DEFAULT_JSON_BLOB_MIN_LEN,
        }
    }
}

/// Configuration for `ChatStreamClient` and its HTTP transport.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL that relative request paths are joined onto.
    pub base_url: Option<String>,
    /// Optional whole-request timeout. Long streams usually leave this unset.
    pub timeout: Option<Duration>,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Decoder tuning.
    pub decoder: DecoderOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: None,
            connect_timeout: Duration::from_secs(10),
            decoder: DecoderOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a config with defaults and no base URL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from the environment.
    ///
    /// - `CHAT_STREAM_BASE_URL`: optional base URL.
    /// - `CHAT_STREAM_TIMEOUT_SECS`: optional whole-request timeout in seconds.
    /// - `CHAT_STREAM_MAX_PAYLOAD_BUFFER`: optional payload buffer limit in bytes.
    pub fn from_env() -> Result<Self, StreamError> {
        let mut config = Self::default();
        if let Ok(base_url) = std::env::var("CHAT_STREAM_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.base_url = Some(base_url.trim().to_string());
        }
        if let Some(secs) = read_env_number("CHAT_STREAM_TIMEOUT_SECS")? {
            config.timeout = Some(Duration::from_secs(secs as u64));
        }
        if let Some(limit) = read_env_number("CHAT_STREAM_MAX_PAYLOAD_BUFFER")? {
            if limit == 0 {
                return Err(StreamError::config(
                    "CHAT_STREAM_MAX_PAYLOAD_BUFFER must be greater than 0",
                ));
            }
            config.decoder.max_payload_buffer = limit;
        }
        Ok(config)
    }

    /// Sets the base URL for relative request paths.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets a whole-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the decoder options.
    pub fn decoder(mut self, decoder: DecoderOptions) -> Self {
        self.decoder = decoder;
        self
    }

    /// Resolves a request URL against `base_url`. Absolute URLs pass through.
    pub fn resolve_url(&self, url: &str) -> Result<String, StreamError> {
        let url = url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match self.base_url.as_deref() {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )),
            None => Err(StreamError::config(format!(
                "relative url `{url}` requires a base_url"
            ))),
        }
    }
}

fn read_env_number(key: &str) -> Result<Option<usize>, StreamError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| StreamError::config(format!("invalid {key} `{raw}`: {e}"))),
        _ => Ok(None),
    }
}
