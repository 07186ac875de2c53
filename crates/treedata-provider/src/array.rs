use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;
use futures::StreamExt;
use futures::stream;

use treedata_model::{
    Item, ItemMetadata, Key, KeyPath, MutateDetail, OperationDetail, ProviderEvent, RowData,
    SortCriterion, compare_rows,
};

use crate::error::{ProviderError, ProviderResult};
use crate::events::{EventSource, ListenerId};
use crate::provider::{
    ContainsKeysParams, ContainsKeysResult, FetchByKeysParams, FetchByKeysResult,
    FetchByOffsetParams, FetchByOffsetResult, FetchFirstParams, FetchPage, KeyStructure,
    TreeDataProvider,
};

/// One node of the backing tree. `children: None` marks a leaf;
/// `Some(vec![])` an expandable node that currently has no children.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub key: Key,
    pub data: RowData,
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    pub fn leaf(key: impl Into<Key>, data: RowData) -> Self {
        Self {
            key: key.into(),
            data,
            children: None,
        }
    }

    pub fn branch(key: impl Into<Key>, data: RowData, children: Vec<TreeNode>) -> Self {
        Self {
            key: key.into(),
            data,
            children: Some(children),
        }
    }
}

#[derive(Debug)]
struct ArrayInner {
    roots: RefCell<Vec<TreeNode>>,
    events: EventSource<ProviderEvent>,
}

/// In-memory tree data provider over a shared mutable node tree.
///
/// Child providers returned by [`TreeDataProvider::child_provider`] share
/// the same backing tree and listener registry; keys in fetch results are
/// full key paths. Mutation methods fire the corresponding typed events,
/// which is how a committed change is observed by wrapping layers.
#[derive(Debug, Clone)]
pub struct ArrayTreeDataProvider {
    inner: Rc<ArrayInner>,
    scope: KeyPath,
}

impl ArrayTreeDataProvider {
    pub fn new(roots: Vec<TreeNode>) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                roots: RefCell::new(roots),
                events: EventSource::new(),
            }),
            scope: KeyPath::root(),
        }
    }

    /// Empty provider scoped at `parent`, used as the backing provider for
    /// subtrees that exist only as buffered edits.
    pub fn empty_at(parent: KeyPath) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                roots: RefCell::new(Vec::new()),
                events: EventSource::new(),
            }),
            scope: parent,
        }
    }

    pub fn scope(&self) -> &KeyPath {
        &self.scope
    }

    /// Appends `node` under `parent` (the root path appends a new root) and
    /// fires an add event. The parent must exist and be a branch, and the
    /// new key must be unique among its siblings.
    pub fn append_child(&self, parent: &KeyPath, node: TreeNode) -> ProviderResult<()> {
        let key = parent.child(node.key.clone());
        let detail = {
            let mut roots = self.inner.roots.borrow_mut();
            let siblings = children_at_mut(&mut roots, parent.components())
                .ok_or_else(|| ProviderError::KeyNotFound(parent.clone()))?;
            if siblings.iter().any(|sibling| sibling.key == node.key) {
                return Err(ProviderError::DuplicateKey(key));
            }
            let index = siblings.len();
            let data = node.data.clone();
            tracing::debug!(key = %key, index, "appending node");
            siblings.push(node);
            OperationDetail {
                keys: vec![key.clone()],
                data: vec![data],
                metadata: vec![ItemMetadata::new(key)],
                indexes: Some(vec![index]),
                parent_keys: Some(vec![parent.clone()]),
                add_before_keys: Some(vec![None]),
            }
        };
        self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
            add: Some(detail),
            ..MutateDetail::default()
        }));
        Ok(())
    }

    /// Removes the node at `key` and fires a remove event.
    pub fn remove_node(&self, key: &KeyPath) -> ProviderResult<()> {
        let parent = key
            .parent()
            .ok_or_else(|| ProviderError::KeyNotFound(key.clone()))?;
        let leaf = key.leaf().cloned();
        let detail = {
            let mut roots = self.inner.roots.borrow_mut();
            let siblings = children_at_mut(&mut roots, parent.components())
                .ok_or_else(|| ProviderError::KeyNotFound(key.clone()))?;
            let index = siblings
                .iter()
                .position(|node| Some(&node.key) == leaf.as_ref())
                .ok_or_else(|| ProviderError::KeyNotFound(key.clone()))?;
            let node = siblings.remove(index);
            tracing::debug!(key = %key, index, "removing node");
            OperationDetail {
                keys: vec![key.clone()],
                data: vec![node.data],
                metadata: vec![ItemMetadata::new(key.clone())],
                indexes: Some(vec![index]),
                parent_keys: Some(vec![parent]),
                add_before_keys: None,
            }
        };
        self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
            remove: Some(detail),
            ..MutateDetail::default()
        }));
        Ok(())
    }

    /// Replaces the data of the node at `key` and fires an update event.
    pub fn update_node(&self, key: &KeyPath, data: RowData) -> ProviderResult<()> {
        let detail = {
            let mut roots = self.inner.roots.borrow_mut();
            let node = node_at_mut(&mut roots, key.components())
                .ok_or_else(|| ProviderError::KeyNotFound(key.clone()))?;
            node.data = data.clone();
            OperationDetail {
                keys: vec![key.clone()],
                data: vec![data],
                metadata: vec![ItemMetadata::new(key.clone())],
                indexes: None,
                parent_keys: key.parent().map(|parent| vec![parent]),
                add_before_keys: None,
            }
        };
        self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
            update: Some(detail),
            ..MutateDetail::default()
        }));
        Ok(())
    }

    /// Fires a refresh event for the whole tree.
    pub fn refresh(&self) {
        self.inner
            .events
            .emit(&ProviderEvent::Refresh { keys: None });
    }

    fn collect_items(&self, sort: &[SortCriterion]) -> Vec<Item> {
        let roots = self.inner.roots.borrow();
        let nodes = children_at(&roots, self.scope.components()).unwrap_or(&[]);
        let mut items: Vec<Item> = nodes
            .iter()
            .map(|node| Item::new(self.scope.child(node.key.clone()), node.data.clone()))
            .collect();
        if !sort.is_empty() {
            items.sort_by(|a, b| compare_rows(&a.data, &b.data, sort));
        }
        items
    }

    fn scoped(&self, scope: KeyPath) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            scope,
        }
    }
}

impl TreeDataProvider for ArrayTreeDataProvider {
    fn key_structure(&self) -> KeyStructure {
        KeyStructure::PathArray
    }

    fn fetch_first(
        &self,
        params: FetchFirstParams,
    ) -> futures::stream::LocalBoxStream<'static, ProviderResult<FetchPage>> {
        let items = self.collect_items(&params.sort);
        let page_size = params.size;
        struct PageState {
            items: Vec<Item>,
            cursor: usize,
            finished: bool,
        }
        let state = PageState {
            items,
            cursor: 0,
            finished: false,
        };
        stream::unfold(state, move |mut state| async move {
            if state.finished {
                return None;
            }
            let end = match page_size {
                Some(size) => (state.cursor + size).min(state.items.len()),
                None => state.items.len(),
            };
            let results = state.items[state.cursor..end].to_vec();
            state.cursor = end;
            let done = state.cursor >= state.items.len();
            state.finished = done;
            Some((Ok(FetchPage { results, done }), state))
        })
        .boxed_local()
    }

    fn fetch_by_offset(
        &self,
        params: FetchByOffsetParams,
    ) -> futures::future::LocalBoxFuture<'static, ProviderResult<FetchByOffsetResult>> {
        let items = self.collect_items(&params.sort);
        let start = params.offset.min(items.len());
        let end = match params.size {
            Some(size) => (start + size).min(items.len()),
            None => items.len(),
        };
        let result = FetchByOffsetResult {
            results: items[start..end].to_vec(),
            done: end >= items.len(),
        };
        futures::future::ready(Ok(result)).boxed_local()
    }

    fn fetch_by_keys(
        &self,
        params: FetchByKeysParams,
    ) -> futures::future::LocalBoxFuture<'static, ProviderResult<FetchByKeysResult>> {
        let mut result = FetchByKeysResult::default();
        {
            let roots = self.inner.roots.borrow();
            for key in params.keys {
                if let Some(node) = node_at(&roots, key.components()) {
                    result
                        .results
                        .insert(key.clone(), Item::new(key, node.data.clone()));
                }
            }
        }
        futures::future::ready(Ok(result)).boxed_local()
    }

    fn contains_keys(
        &self,
        params: ContainsKeysParams,
    ) -> futures::future::LocalBoxFuture<'static, ProviderResult<ContainsKeysResult>> {
        let mut result = ContainsKeysResult::default();
        {
            let roots = self.inner.roots.borrow();
            for key in params.keys {
                if node_at(&roots, key.components()).is_some() {
                    result.results.insert(key);
                }
            }
        }
        futures::future::ready(Ok(result)).boxed_local()
    }

    fn child_provider(&self, parent: &KeyPath) -> Option<Rc<dyn TreeDataProvider>> {
        let roots = self.inner.roots.borrow();
        let node = node_at(&roots, parent.components())?;
        node.children.as_ref()?;
        drop(roots);
        Some(Rc::new(self.scoped(parent.clone())))
    }

    fn subscribe(&self, listener: Rc<dyn Fn(&ProviderEvent)>) -> ListenerId {
        self.inner.events.subscribe(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.inner.events.unsubscribe(id);
    }
}

fn children_at<'a>(nodes: &'a [TreeNode], path: &[Key]) -> Option<&'a [TreeNode]> {
    let Some((head, rest)) = path.split_first() else {
        return Some(nodes);
    };
    let node = nodes.iter().find(|node| node.key == *head)?;
    let children = node.children.as_deref()?;
    children_at(children, rest)
}

fn children_at_mut<'a>(nodes: &'a mut Vec<TreeNode>, path: &[Key]) -> Option<&'a mut Vec<TreeNode>> {
    let Some((head, rest)) = path.split_first() else {
        return Some(nodes);
    };
    let node = nodes.iter_mut().find(|node| node.key == *head)?;
    let children = node.children.as_mut()?;
    children_at_mut(children, rest)
}

fn node_at<'a>(nodes: &'a [TreeNode], path: &[Key]) -> Option<&'a TreeNode> {
    let (head, rest) = path.split_first()?;
    let node = nodes.iter().find(|node| node.key == *head)?;
    if rest.is_empty() {
        Some(node)
    } else {
        node_at(node.children.as_deref()?, rest)
    }
}

fn node_at_mut<'a>(nodes: &'a mut [TreeNode], path: &[Key]) -> Option<&'a mut TreeNode> {
    let (head, rest) = path.split_first()?;
    let node = nodes.iter_mut().find(|node| node.key == *head)?;
    if rest.is_empty() {
        Some(node)
    } else {
        node_at_mut(node.children.as_deref_mut()?, rest)
    }
}
