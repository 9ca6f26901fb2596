use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tool error: tool={tool_name}, {message}")]
    Tool { tool_name: String, message: String },

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("User aborted: {0}")]
    UserAbort(String),

    #[error("Limit reached: {0}")]
    LimitReached(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type TriageResult<T> = Result<T, TriageError>;
