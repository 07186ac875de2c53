use crate::key::KeyPath;
use crate::message::Message;
use crate::row::RowData;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ItemMetadata {
    pub key: KeyPath,
    /// Row-level message, e.g. a submission error attached to a staged row.
    #[serde(default)]
    pub message: Option<Message>,
}

impl ItemMetadata {
    pub fn new(key: KeyPath) -> Self {
        Self { key, message: None }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }
}

/// One row: its metadata (the key path) and its data.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Item {
    pub metadata: ItemMetadata,
    pub data: RowData,
}

impl Item {
    pub fn new(key: KeyPath, data: RowData) -> Self {
        Self {
            metadata: ItemMetadata::new(key),
            data,
        }
    }

    pub fn key(&self) -> &KeyPath {
        &self.metadata.key
    }
}
