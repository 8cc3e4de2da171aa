use std::time::Duration;

/// Failure of a single call through the transport.
///
/// The transport never interprets status codes beyond "2xx or not"; callers
/// decide what a failure means for them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response body is not JSON: {0}")]
    Decode(String),
}

/// Errors surfaced by the ticker client.
///
/// `Network` means the service is down or unreachable, `Validation` means it
/// answered with something that does not match the item schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickerError {
    #[error("network error: {0}")]
    Network(TransportError),

    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl TickerError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Validation(_) => "validation",
            Self::InvalidQuery(_) => "invalid_query",
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<TransportError> for TickerError {
    fn from(err: TransportError) -> Self {
        match err {
            // The service answered, just not with JSON.
            TransportError::Decode(msg) => TickerError::Validation(msg),
            other => TickerError::Network(other),
        }
    }
}

impl From<serde_json::Error> for TickerError {
    fn from(err: serde_json::Error) -> Self {
        TickerError::Validation(err.to_string())
    }
}

pub type TickerResult<T> = Result<T, TickerError>;
