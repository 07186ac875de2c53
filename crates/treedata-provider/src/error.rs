use thiserror::Error;
use treedata_model::{KeyPath, ModelError};

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Construction-time configuration error: the wrapped provider must
    /// report a path-based key structure.
    #[error("underlying provider keys are not path-based")]
    UnsupportedKeyStructure,
    #[error("no row for key {0}")]
    KeyNotFound(KeyPath),
    #[error("a sibling row with key {0} already exists")]
    DuplicateKey(KeyPath),
    #[error(transparent)]
    Model(#[from] ModelError),
    /// Failure propagated from an underlying data source.
    #[error("{0}")]
    Backend(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
