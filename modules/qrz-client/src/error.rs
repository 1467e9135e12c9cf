use thiserror::Error;

pub type Result<T> = std::result::Result<T, QrzError>;

#[derive(Debug, Error)]
pub enum QrzError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Login answered without a session key.
    #[error("QRZ login failed: {0}")]
    Login(String),

    #[error("QRZ session still invalid after {0} attempts")]
    SessionExhausted(u32),
}

impl From<reqwest::Error> for QrzError {
    fn from(err: reqwest::Error) -> Self {
        QrzError::Network(err.to_string())
    }
}
