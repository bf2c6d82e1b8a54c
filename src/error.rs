use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Generation failed for field '{field}': {reason}")]
    Generation { field: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No valid training record found in {0}")]
    EmptyDataset(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScribeError>;
