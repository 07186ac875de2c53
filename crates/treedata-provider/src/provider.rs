use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;

use treedata_model::{Item, KeyPath, ProviderEvent, SortCriterion};

use crate::error::ProviderResult;
use crate::events::ListenerId;

/// How a provider structures its row keys. The buffering layer requires one
/// of the path-based structures; this is checked once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStructure {
    PathArray,
    PathArrayString,
    /// Keys are opaque values with no path structure.
    Opaque,
}

impl KeyStructure {
    pub fn is_path_based(self) -> bool {
        matches!(self, KeyStructure::PathArray | KeyStructure::PathArrayString)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchFirstParams {
    /// Page size; `None` fetches everything in one page.
    pub size: Option<usize>,
    pub sort: Vec<SortCriterion>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchPage {
    pub results: Vec<Item>,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchByOffsetParams {
    pub offset: usize,
    /// Row count; `None` fetches everything from `offset` on.
    pub size: Option<usize>,
    pub sort: Vec<SortCriterion>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchByOffsetResult {
    pub results: Vec<Item>,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchByKeysParams {
    pub keys: Vec<KeyPath>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchByKeysResult {
    /// Requested keys that resolved to a row. Missing keys are absent.
    pub results: HashMap<KeyPath, Item>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainsKeysParams {
    pub keys: Vec<KeyPath>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainsKeysResult {
    pub results: HashSet<KeyPath>,
}

/// The hierarchical data provider contract.
///
/// All read operations are asynchronous because the underlying source may
/// be; the model itself is single-threaded and event-loop-driven, so the
/// returned futures and streams are `!Send`.
pub trait TreeDataProvider {
    fn key_structure(&self) -> KeyStructure;

    /// Iterative fetch: a stream of result pages. The last page has
    /// `done == true`; at least one page is produced even for empty data.
    fn fetch_first(
        &self,
        params: FetchFirstParams,
    ) -> LocalBoxStream<'static, ProviderResult<FetchPage>>;

    fn fetch_by_offset(
        &self,
        params: FetchByOffsetParams,
    ) -> LocalBoxFuture<'static, ProviderResult<FetchByOffsetResult>>;

    fn fetch_by_keys(
        &self,
        params: FetchByKeysParams,
    ) -> LocalBoxFuture<'static, ProviderResult<FetchByKeysResult>>;

    fn contains_keys(
        &self,
        params: ContainsKeysParams,
    ) -> LocalBoxFuture<'static, ProviderResult<ContainsKeysResult>>;

    /// Provider for the children of `parent`, or `None` when the node
    /// cannot have children.
    fn child_provider(&self, parent: &KeyPath) -> Option<Rc<dyn TreeDataProvider>>;

    fn subscribe(&self, listener: Rc<dyn Fn(&ProviderEvent)>) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId);
}
