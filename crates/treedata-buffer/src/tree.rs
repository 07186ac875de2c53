use std::cell::RefCell;
use std::rc::Rc;

use treedata_model::{Item, KeyPath, Message};

use crate::edit::{EditBuffer, EditItem, EditStatus};
use crate::error::EditResult;

/// Parent-scoped view of a shared [`EditBuffer`].
///
/// Every provider instance of one tree shares the same backing buffer;
/// the view filters reads to entries whose parent is the owning scope, so
/// sibling subtrees do not see each other's pending edits while the root
/// still sees everything.
#[derive(Debug, Clone)]
pub struct TreeEditBuffer {
    buffer: Rc<RefCell<EditBuffer>>,
    scope: KeyPath,
}

impl TreeEditBuffer {
    pub fn new(buffer: Rc<RefCell<EditBuffer>>, scope: KeyPath) -> Self {
        Self { buffer, scope }
    }

    pub fn scope(&self) -> &KeyPath {
        &self.scope
    }

    /// The shared backing buffer.
    pub fn shared(&self) -> &Rc<RefCell<EditBuffer>> {
        &self.buffer
    }

    /// Scoped view for another parent over the same backing buffer.
    pub fn rescope(&self, scope: KeyPath) -> Self {
        Self {
            buffer: Rc::clone(&self.buffer),
            scope,
        }
    }

    fn in_scope(&self, key: &KeyPath) -> bool {
        key.parent().as_ref() == Some(&self.scope)
    }

    pub fn unsubmitted_items(&self) -> Vec<EditItem> {
        self.buffer
            .borrow()
            .unsubmitted_items()
            .filter(|entry| self.in_scope(entry.key()))
            .cloned()
            .collect()
    }

    pub fn submitting_items(&self) -> Vec<EditItem> {
        self.buffer
            .borrow()
            .submitting_items()
            .filter(|entry| self.in_scope(entry.key()))
            .cloned()
            .collect()
    }

    pub fn submittable_items(&self) -> Vec<EditItem> {
        self.buffer
            .borrow()
            .submittable_items()
            .into_iter()
            .filter(|entry| self.in_scope(entry.key()))
            .collect()
    }

    /// Any entry strictly below the scope, at any depth.
    pub fn has_buffered_children(&self) -> bool {
        self.has_buffered_children_under(&self.scope)
    }

    pub fn has_buffered_children_under(&self, parent: &KeyPath) -> bool {
        let buffer = self.buffer.borrow();
        buffer
            .unsubmitted_items()
            .chain(buffer.submitting_items())
            .any(|entry| entry.key().is_descendant_of(parent))
    }

    pub fn add_item(&self, item: Item) -> EditResult<()> {
        self.buffer.borrow_mut().add_item(item)
    }

    pub fn remove_item(&self, item: Item) -> EditResult<()> {
        self.buffer.borrow_mut().remove_item(item)
    }

    pub fn update_item(&self, item: Item) -> EditResult<()> {
        self.buffer.borrow_mut().update_item(item)
    }

    pub fn set_item_status(
        &self,
        edit: &EditItem,
        new_status: EditStatus,
        error: Option<Message>,
        new_key: Option<KeyPath>,
    ) -> EditResult<()> {
        self.buffer
            .borrow_mut()
            .set_item_status(edit, new_status, error, new_key)
    }

    pub fn reset_unsubmitted(&self, key: &KeyPath) -> Option<EditItem> {
        self.buffer.borrow_mut().reset_unsubmitted(key)
    }

    pub fn reset_descendants(&self, prefix: &KeyPath) -> Vec<EditItem> {
        self.buffer.borrow_mut().reset_descendants(prefix)
    }

    pub fn reset_all_unsubmitted(&self) -> Vec<EditItem> {
        self.buffer.borrow_mut().reset_all_unsubmitted()
    }
}
