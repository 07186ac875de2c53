use thiserror::Error;
use treedata_model::KeyPath;
use treedata_provider::ProviderError;

use crate::edit::EditStatus;

/// Buffer-conflict errors are caller misuse and surface synchronously;
/// submission failures travel as messages on edit items instead.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("an add or update is already buffered for key {0}")]
    DuplicateEdit(KeyPath),
    #[error("key {0} is already marked for removal")]
    AlreadyRemoved(KeyPath),
    #[error("cannot update key {0}: the row is marked for removal")]
    UpdateOnRemoved(KeyPath),
    #[error("no buffered edit in status {status:?} for key {key}")]
    UnknownEdit { key: KeyPath, status: EditStatus },
    #[error("item has no key and no parent key was supplied for key generation")]
    MissingKey,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type EditResult<T> = std::result::Result<T, EditError>;
