use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProfileError>;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("LLM error: {0}")]
    Ai(#[from] ai_client::AiError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Run lock conflict: another profile run is in progress")]
    RunLockConflict,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
