use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid key path {input:?}: {reason}")]
    InvalidKeyPath { input: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
