//! Buffering layer for hierarchical data providers.
//!
//! - edit: the flat edit buffer of staged add/update/remove entries
//! - tree: parent-scoped views of one shared buffer
//! - provider: [`BufferingTreeDataProvider`], the overlay provider that
//!   merges staged edits into every fetch and translates mutation events
//!
//! Edits are staged locally, surfaced through the provider contract as if
//! already applied, and drained once the application commits them to the
//! underlying data source.

pub mod edit;
pub mod error;
pub mod provider;
pub mod tree;

pub use edit::{EditBuffer, EditItem, EditOperation, EditStatus};
pub use error::{EditError, EditResult};
pub use provider::{AddItemDetail, BufferingOptions, BufferingTreeDataProvider};
pub use tree::TreeEditBuffer;
