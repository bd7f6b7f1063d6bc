/// Classified failure for a stream request that was answered with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum ConnectFailure {
    /// 401: the endpoint rejected the caller's credentials.
    #[error("unauthorized: the chat endpoint rejected the request credentials")]
    Unauthorized,
    /// 403: the caller is authenticated but not allowed to use the endpoint.
    #[error("forbidden: access to the chat endpoint was denied")]
    Forbidden,
    /// 404: the endpoint does not exist.
    #[error("not found: the chat endpoint does not exist")]
    NotFound,
    /// Any other non-success status.
    #[error("chat endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },
}

impl ConnectFailure {
    /// Classifies a non-success HTTP status, keeping the response body for the generic case.
    pub fn from_status(status: u16, body: Option<&str>) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            _ => Self::Status {
                status,
                message: body
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .unwrap_or("<empty body>")
                    .to_string(),
            },
        }
    }

    /// Returns the HTTP status this failure was classified from.
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Status { status, .. } => *status,
        }
    }
}

/// Errors raised by a transport before or while reading the response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (DNS, connect, TLS, timeout).
    #[error("request failed: {0}")]
    Request(String),
    /// Reading the body failed mid-stream.
    #[error("stream read failed: {0}")]
    Read(String),
}

/// Error delivered through `StreamHandler::on_error` or returned by `connect`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The endpoint answered with a non-success status.
    #[error(transparent)]
    Connect(ConnectFailure),
    /// Network or body I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// `connect` was called while another connection on the same client is still active.
    #[error("a connection is already active on this client")]
    AlreadyActive,
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl StreamError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<ConnectFailure> for StreamError {
    fn from(value: ConnectFailure) -> Self {
        StreamError::Connect(value)
    }
}

impl From<TransportError> for StreamError {
    fn from(value: TransportError) -> Self {
        StreamError::Transport {
            message: value.to_string(),
        }
    }
}
