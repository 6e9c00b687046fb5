use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Batch error: {0}")]
    Batch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CopilotError>;
