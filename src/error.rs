use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ServiceError {
    /// 5xx responses; transient enough for one retry.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServiceError::Api { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Parse(err.to_string())
    }
}

/// Why a subject's count could not be resolved. Never a zero count.
#[derive(Debug, Error)]
pub enum CountError {
    #[error("count service failed for {subject}: {source}")]
    Service {
        subject: String,
        #[source]
        source: ServiceError,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("scan index {index} is past the end of the worklist ({total})")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("counter overflow while recording {what}")]
    CounterOverflow { what: &'static str },
}
