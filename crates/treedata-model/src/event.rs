use crate::item::{Item, ItemMetadata};
use crate::key::KeyPath;
use crate::row::RowData;

/// Payload of one mutation operation (add, remove or update).
///
/// `keys`, `data` and `metadata` are parallel. `parent_keys` and
/// `add_before_keys` (adds only) are parallel to `keys` when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationDetail {
    pub keys: Vec<KeyPath>,
    pub data: Vec<RowData>,
    pub metadata: Vec<ItemMetadata>,
    pub indexes: Option<Vec<usize>>,
    pub parent_keys: Option<Vec<KeyPath>>,
    pub add_before_keys: Option<Vec<Option<KeyPath>>>,
}

impl OperationDetail {
    pub fn for_items<'a, I: IntoIterator<Item = &'a Item>>(items: I) -> Self {
        let mut detail = Self::default();
        for item in items {
            detail.keys.push(item.metadata.key.clone());
            detail.data.push(item.data.clone());
            detail.metadata.push(item.metadata.clone());
        }
        detail
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutateDetail {
    pub add: Option<OperationDetail>,
    pub remove: Option<OperationDetail>,
    pub update: Option<OperationDetail>,
}

impl MutateDetail {
    pub fn is_empty(&self) -> bool {
        [&self.add, &self.remove, &self.update]
            .into_iter()
            .all(|op| op.as_ref().is_none_or(OperationDetail::is_empty))
    }
}

/// Typed provider event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// The data changed wholesale. `keys` scopes the refresh to specific
    /// subtrees; `None` refreshes everything.
    Refresh { keys: Option<Vec<KeyPath>> },
    Mutate(MutateDetail),
}
