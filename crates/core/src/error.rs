#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid media payload: {0}")]
    InvalidMedia(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
