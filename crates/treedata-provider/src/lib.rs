//! Tree data provider contract and the in-memory array provider.
//!
//! - **provider**: the `TreeDataProvider` trait and fetch parameter/result types
//! - **array**: `ArrayTreeDataProvider`, an in-memory provider over a mutable node tree
//! - **events**: the listener registry used to dispatch typed provider events
//! - **error**: provider error taxonomy

pub mod array;
pub mod error;
pub mod events;
pub mod provider;

pub use array::{ArrayTreeDataProvider, TreeNode};
pub use error::{ProviderError, ProviderResult};
pub use events::{EventSource, ListenerId};
pub use provider::{
    ContainsKeysParams, ContainsKeysResult, FetchByKeysParams, FetchByKeysResult,
    FetchByOffsetParams, FetchByOffsetResult, FetchFirstParams, FetchPage, KeyStructure,
    TreeDataProvider,
};
