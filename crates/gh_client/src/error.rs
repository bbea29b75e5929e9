use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GhError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {status} for {endpoint}")]
    Status { status: u16, endpoint: String },
    #[error("rate limited; retry in {wait:?}")]
    RateLimited { wait: Duration },
    #[error("invalid response body: {0}")]
    Parse(String),
    #[error("transfer budget exhausted: {0}")]
    BudgetExhausted(&'static str),
    #[error("operation cancelled")]
    Cancelled,
}

impl GhError {
    pub fn status(status: u16, endpoint: impl Into<String>) -> Self {
        Self::Status {
            status,
            endpoint: endpoint.into(),
        }
    }

    /// Transport failures, 5xx, and 429 are worth another attempt; everything
    /// else is surfaced to the caller.
    pub fn retryable(&self) -> bool {
        match self {
            GhError::Transport(_) => true,
            GhError::Status { status, .. } => *status >= 500 || *status == 429,
            GhError::RateLimited { .. } => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            GhError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
