use std::collections::HashMap;

use indexmap::IndexMap;

use treedata_model::{Item, KeyPath, Message};

use crate::error::{EditError, EditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOperation {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStatus {
    Unsubmitted,
    Submitting,
    Submitted,
}

/// One staged edit.
#[derive(Debug, Clone, PartialEq)]
pub struct EditItem {
    pub item: Item,
    pub operation: EditOperation,
    pub status: EditStatus,
    pub error: Option<Message>,
}

impl EditItem {
    fn new(item: Item, operation: EditOperation) -> Self {
        Self {
            item,
            operation,
            status: EditStatus::Unsubmitted,
            error: None,
        }
    }

    pub fn key(&self) -> &KeyPath {
        &self.item.metadata.key
    }
}

/// Process-local store of staged edits, keyed by item key.
///
/// Per key there is at most one unsubmitted and one submitting entry; both
/// maps keep insertion order so buffered adds surface in the order they
/// were recorded. Entries leave the buffer on reset, on the transition to
/// `Submitted`, or when the underlying provider confirms the change.
#[derive(Debug, Default)]
pub struct EditBuffer {
    unsubmitted: IndexMap<KeyPath, EditItem>,
    submitting: IndexMap<KeyPath, EditItem>,
    /// Generated key -> key assigned by the data source on commit. Retained
    /// so a base-provider add for the assigned key retires the placeholder
    /// row instead of duplicating it.
    assigned_keys: HashMap<KeyPath, KeyPath>,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an add. A pending removal for the same key is replaced by an
    /// update (the base row still exists underneath); a pending add or
    /// update is a conflict.
    pub fn add_item(&mut self, item: Item) -> EditResult<()> {
        let key = item.metadata.key.clone();
        if pending_edit(self.unsubmitted.get(&key)) || pending_edit(self.submitting.get(&key)) {
            return Err(EditError::DuplicateEdit(key));
        }
        let operation = match self.unsubmitted.get(&key).map(|entry| entry.operation) {
            Some(EditOperation::Remove) => EditOperation::Update,
            _ => EditOperation::Add,
        };
        self.unsubmitted.insert(key, EditItem::new(item, operation));
        Ok(())
    }

    /// Stages a removal. A pending add cancels out entirely; a pending
    /// update becomes a removal; a pending removal is a conflict.
    pub fn remove_item(&mut self, item: Item) -> EditResult<()> {
        let key = item.metadata.key.clone();
        if pending_remove(self.unsubmitted.get(&key)) || pending_remove(self.submitting.get(&key)) {
            return Err(EditError::AlreadyRemoved(key));
        }
        if self.unsubmitted.get(&key).map(|entry| entry.operation) == Some(EditOperation::Add) {
            self.unsubmitted.shift_remove(&key);
            return Ok(());
        }
        self.unsubmitted
            .insert(key, EditItem::new(item, EditOperation::Remove));
        Ok(())
    }

    /// Stages an update, merging into a pending add or update for the same
    /// key. A pending removal is a conflict.
    pub fn update_item(&mut self, item: Item) -> EditResult<()> {
        let key = item.metadata.key.clone();
        if pending_remove(self.unsubmitted.get(&key)) || pending_remove(self.submitting.get(&key)) {
            return Err(EditError::UpdateOnRemoved(key));
        }
        if let Some(entry) = self.unsubmitted.get_mut(&key) {
            entry.item.data.merge_from(&item.data);
            return Ok(());
        }
        self.unsubmitted
            .insert(key, EditItem::new(item, EditOperation::Update));
        Ok(())
    }

    /// Transitions the entry for `edit`'s key to `new_status`.
    ///
    /// - `Submitting` is only legal from `Unsubmitted`; the entry moves to
    ///   the submitting map, so a later edit to the same key is tracked as
    ///   an independent unsubmitted entry.
    /// - `Unsubmitted` rolls a submitting entry back. When a newer
    ///   unsubmitted entry exists for the key, `error` attaches to that
    ///   entry and the stale submitting entry is discarded.
    /// - `Submitted` removes the entry; the change is now authoritative in
    ///   the base provider.
    ///
    /// `new_key` records the generated-key -> assigned-key mapping for
    /// deferred-key workflows once the transition succeeds.
    pub fn set_item_status(
        &mut self,
        edit: &EditItem,
        new_status: EditStatus,
        error: Option<Message>,
        new_key: Option<KeyPath>,
    ) -> EditResult<()> {
        let key = edit.key().clone();
        match new_status {
            EditStatus::Submitting => {
                let Some(mut entry) = self.unsubmitted.shift_remove(&key) else {
                    return Err(EditError::UnknownEdit {
                        key,
                        status: EditStatus::Unsubmitted,
                    });
                };
                entry.status = EditStatus::Submitting;
                entry.error = None;
                self.submitting.insert(key.clone(), entry);
            }
            EditStatus::Unsubmitted => {
                let Some(mut entry) = self.submitting.shift_remove(&key) else {
                    return Err(EditError::UnknownEdit {
                        key,
                        status: EditStatus::Submitting,
                    });
                };
                if let Some(newer) = self.unsubmitted.get_mut(&key) {
                    newer.error = error;
                } else {
                    entry.status = EditStatus::Unsubmitted;
                    entry.error = error;
                    self.unsubmitted.insert(key.clone(), entry);
                }
            }
            EditStatus::Submitted => {
                if self.submitting.shift_remove(&key).is_none()
                    && self.unsubmitted.shift_remove(&key).is_none()
                {
                    return Err(EditError::UnknownEdit {
                        key,
                        status: EditStatus::Submitting,
                    });
                }
            }
        }
        // a rejected transition must not leave a mapping behind
        if let Some(assigned) = new_key {
            self.assigned_keys.insert(key, assigned);
        }
        Ok(())
    }

    /// Unsubmitted entries with no submitting entry for the same key.
    pub fn submittable_items(&self) -> Vec<EditItem> {
        self.unsubmitted
            .values()
            .filter(|entry| !self.submitting.contains_key(entry.key()))
            .cloned()
            .collect()
    }

    pub fn unsubmitted_items(&self) -> impl Iterator<Item = &EditItem> {
        self.unsubmitted.values()
    }

    pub fn submitting_items(&self) -> impl Iterator<Item = &EditItem> {
        self.submitting.values()
    }

    pub fn unsubmitted_entry(&self, key: &KeyPath) -> Option<&EditItem> {
        self.unsubmitted.get(key)
    }

    pub fn submitting_entry(&self, key: &KeyPath) -> Option<&EditItem> {
        self.submitting.get(key)
    }

    pub fn is_tracked(&self, key: &KeyPath) -> bool {
        self.unsubmitted.contains_key(key) || self.submitting.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.unsubmitted.is_empty() && self.submitting.is_empty()
    }

    /// Drops the unsubmitted entry for `key`, if any.
    pub fn reset_unsubmitted(&mut self, key: &KeyPath) -> Option<EditItem> {
        self.unsubmitted.shift_remove(key)
    }

    /// Drops every unsubmitted entry, returning them in insertion order.
    pub fn reset_all_unsubmitted(&mut self) -> Vec<EditItem> {
        self.unsubmitted.drain(..).map(|(_, entry)| entry).collect()
    }

    /// Drops unsubmitted entries strictly below `prefix` (the removal
    /// cascade: descendants of a removed node no longer logically exist).
    pub fn reset_descendants(&mut self, prefix: &KeyPath) -> Vec<EditItem> {
        let keys: Vec<KeyPath> = self
            .unsubmitted
            .keys()
            .filter(|key| key.is_descendant_of(prefix))
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|key| self.unsubmitted.shift_remove(key))
            .collect()
    }

    /// Drops any entry for `key` from both maps. Used when the base
    /// provider confirms a change so the row is not reported twice.
    pub fn discard(&mut self, key: &KeyPath) -> bool {
        let from_unsubmitted = self.unsubmitted.shift_remove(key).is_some();
        let from_submitting = self.submitting.shift_remove(key).is_some();
        from_unsubmitted || from_submitting
    }

    /// Key assigned by the data source for a generated key, if recorded.
    pub fn assigned_key(&self, generated: &KeyPath) -> Option<&KeyPath> {
        self.assigned_keys.get(generated)
    }

    /// Reverse lookup: the generated key that `assigned` was recorded for.
    pub fn generated_key_for(&self, assigned: &KeyPath) -> Option<KeyPath> {
        self.assigned_keys
            .iter()
            .find(|(_, value)| *value == assigned)
            .map(|(generated, _)| generated.clone())
    }

    /// Removes the mapping pointing at `assigned`, returning the generated
    /// key it replaced.
    pub fn retire_assigned_key(&mut self, assigned: &KeyPath) -> Option<KeyPath> {
        let generated = self.generated_key_for(assigned)?;
        self.assigned_keys.remove(&generated);
        Some(generated)
    }
}

fn pending_edit(entry: Option<&EditItem>) -> bool {
    matches!(
        entry.map(|entry| entry.operation),
        Some(EditOperation::Add | EditOperation::Update)
    )
}

fn pending_remove(entry: Option<&EditItem>) -> bool {
    entry.map(|entry| entry.operation) == Some(EditOperation::Remove)
}
