use thiserror::Error;

/// Error types for the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    // Durable storage errors
    #[error("store query failed: {0}")]
    Store(#[from] sqlx::Error),

    // Caller-supplied filter input that cannot be acted on. Acting on a
    // misparsed window would silently produce a wrong aggregate, so this
    // is surfaced instead of ignored.
    #[error("invalid filter for {field}: {message}")]
    InvalidFilter {
        field: &'static str,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Trace backend failures. These are constructed by backends and then
    // swallowed-and-logged by `TraceClient`; they never reach a caller of
    // the tracker.
    #[error("trace backend failure: {message}")]
    Trace { message: String },

    #[error("invalid configuration for {field}: {message}")]
    Configuration { field: String, message: String },
}

impl From<reqwest::Error> for MetricsError {
    fn from(err: reqwest::Error) -> Self {
        MetricsError::Trace {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MetricsError>;
