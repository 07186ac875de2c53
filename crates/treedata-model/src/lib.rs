//! Value types for hierarchical data providers.
//!
//! - **key**: per-level keys and key paths (path-array-string form included)
//! - **keyset**: immutable key collections with an "all except" representation
//! - **row**: field maps and cell values with overlay-merge semantics
//! - **item**: row + metadata pairs returned by fetches
//! - **sort**: sort criteria and multi-criteria row comparison
//! - **event**: typed provider event payloads
//! - **message**: per-row messages for submission errors

pub mod error;
pub mod event;
pub mod item;
pub mod key;
pub mod keyset;
pub mod message;
pub mod row;
pub mod sort;

pub use error::ModelError;
pub use event::{MutateDetail, OperationDetail, ProviderEvent};
pub use item::{Item, ItemMetadata};
pub use key::{Key, KeyPath};
pub use keyset::KeySet;
pub use message::{Message, MessageSeverity};
pub use row::{CellValue, RowData};
pub use sort::{SortCriterion, SortDirection, compare_rows};
