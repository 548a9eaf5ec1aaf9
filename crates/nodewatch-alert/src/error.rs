use thiserror::Error;

pub type AlertResult<T> = Result<T, AlertError>;

/// Delivery failures. Never fatal: they are logged and dropped.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}
