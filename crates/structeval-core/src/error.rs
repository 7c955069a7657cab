use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("malformed record {source_id}: missing or invalid '{field}'")]
    MalformedRecord { source_id: String, field: String },

    /// A model or judge call failed (network fault, timeout, bad status).
    #[error("external invocation failed: {0}")]
    ExternalInvocation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn malformed(source_id: impl Into<String>, field: impl Into<String>) -> Self {
        Error::MalformedRecord { source_id: source_id.into(), field: field.into() }
    }

    pub fn external(err: impl std::fmt::Display) -> Self {
        Error::ExternalInvocation(err.to_string())
    }
}
