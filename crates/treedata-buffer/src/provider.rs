use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use futures::FutureExt;
use futures::StreamExt;
use futures::future::LocalBoxFuture;
use futures::stream;
use futures::stream::LocalBoxStream;

use treedata_model::{
    Item, ItemMetadata, Key, KeyPath, Message, MutateDetail, OperationDetail, ProviderEvent,
    RowData, SortCriterion, compare_rows,
};
use treedata_provider::{
    ArrayTreeDataProvider, ContainsKeysParams, ContainsKeysResult, EventSource, FetchByKeysParams,
    FetchByKeysResult, FetchByOffsetParams, FetchByOffsetResult, FetchFirstParams, FetchPage,
    KeyStructure, ListenerId, ProviderError, ProviderResult, TreeDataProvider,
};

use crate::edit::{EditBuffer, EditItem, EditOperation, EditStatus};
use crate::error::{EditError, EditResult};
use crate::tree::TreeEditBuffer;

/// Configuration for a [`BufferingTreeDataProvider`].
///
/// The key generator produces the per-level key component for items added
/// without a key; the default generates UUID v4 text keys.
#[derive(Clone)]
pub struct BufferingOptions {
    key_generator: Option<Rc<dyn Fn(&KeyPath) -> Key>>,
}

impl BufferingOptions {
    pub fn new() -> Self {
        Self {
            key_generator: None,
        }
    }

    pub fn with_key_generator(mut self, generator: impl Fn(&KeyPath) -> Key + 'static) -> Self {
        self.key_generator = Some(Rc::new(generator));
        self
    }
}

impl Default for BufferingOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferingOptions")
            .field("key_generator", &self.key_generator.is_some())
            .finish()
    }
}

/// Placement detail for [`BufferingTreeDataProvider::add_item`].
#[derive(Debug, Clone, Default)]
pub struct AddItemDetail {
    /// Parent under which a key is generated when the item has none.
    pub null_parent_key: Option<KeyPath>,
    /// Sibling the new row should be placed before.
    pub add_before_key: Option<KeyPath>,
}

/// A placeholder row whose add was committed under a base-assigned key.
#[derive(Debug, Clone)]
struct RetiredPlaceholder {
    assigned: KeyPath,
    generated: KeyPath,
    data: RowData,
}

/// State shared by every provider instance of one wrapped tree.
struct Shared {
    buffer: Rc<RefCell<EditBuffer>>,
    /// Add key -> sibling the row is placed before.
    placement: RefCell<HashMap<KeyPath, KeyPath>>,
    /// Sort criteria of the most recent fetch, used to place buffered
    /// inserts consistently with the active sort order.
    last_sort: RefCell<Vec<SortCriterion>>,
    /// Placeholder retirements, appended when a base add confirms a
    /// re-keyed row. The key mapping itself is consumed by whichever
    /// instance reconciles first, so the log is what lets every other
    /// live instance fold the same placeholder removal into its own
    /// translated event (per-instance cursors keep the folding once-only).
    retired_log: RefCell<Vec<RetiredPlaceholder>>,
    /// Row data captured when a key assignment is recorded; the buffer
    /// entry is drained on `Submitted`, but the eventual placeholder
    /// removal should still carry the row's data.
    retired_data: RefCell<HashMap<KeyPath, RowData>>,
    key_generator: Rc<dyn Fn(&KeyPath) -> Key>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("buffer", &self.buffer)
            .field("placement", &self.placement)
            .field("last_sort", &self.last_sort)
            .field("retired_log", &self.retired_log)
            .finish()
    }
}

struct Inner {
    base: Rc<dyn TreeDataProvider>,
    shared: Rc<Shared>,
    /// Scoped view of the shared buffer for this instance's parent path.
    edits: TreeEditBuffer,
    events: EventSource<ProviderEvent>,
    submittable_events: EventSource<Vec<EditItem>>,
    /// Base rows seen by fetches, used to rebuild row views when edits are
    /// reset. Cleared when the base reports a refresh.
    row_cache: RefCell<HashMap<KeyPath, RowData>>,
    base_listener: Cell<Option<ListenerId>>,
    /// Position in the shared retirement log up to which this instance has
    /// already folded placeholder removals.
    retired_cursor: Cell<usize>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("scope", self.edits.scope())
            .field("shared", &self.shared)
            .finish()
    }
}

/// Change-tracking overlay over an arbitrary tree data provider.
///
/// Staged edits live in a buffer shared by the whole provider tree; every
/// fetch merges them into the base provider's results, and base mutation
/// events are reconciled against the buffer before being re-emitted so a
/// committed row is never reported twice.
#[derive(Debug, Clone)]
pub struct BufferingTreeDataProvider {
    inner: Rc<Inner>,
}

impl BufferingTreeDataProvider {
    /// Wraps `base`. The base provider must report a path-based key
    /// structure; anything else is a configuration error.
    pub fn new(base: Rc<dyn TreeDataProvider>, options: BufferingOptions) -> ProviderResult<Self> {
        if !base.key_structure().is_path_based() {
            return Err(ProviderError::UnsupportedKeyStructure);
        }
        let key_generator = options
            .key_generator
            .unwrap_or_else(|| Rc::new(|_parent: &KeyPath| Key::Text(uuid::Uuid::new_v4().to_string())));
        let shared = Rc::new(Shared {
            buffer: Rc::new(RefCell::new(EditBuffer::new())),
            placement: RefCell::new(HashMap::new()),
            last_sort: RefCell::new(Vec::new()),
            retired_log: RefCell::new(Vec::new()),
            retired_data: RefCell::new(HashMap::new()),
            key_generator,
        });
        let edits = TreeEditBuffer::new(Rc::clone(&shared.buffer), KeyPath::root());
        Ok(Self::wrap(base, shared, edits))
    }

    fn wrap(base: Rc<dyn TreeDataProvider>, shared: Rc<Shared>, edits: TreeEditBuffer) -> Self {
        let retired_cursor = Cell::new(shared.retired_log.borrow().len());
        let inner = Rc::new(Inner {
            base,
            shared,
            edits,
            events: EventSource::new(),
            submittable_events: EventSource::new(),
            row_cache: RefCell::new(HashMap::new()),
            base_listener: Cell::new(None),
            retired_cursor,
        });
        let weak = Rc::downgrade(&inner);
        let id = inner.base.subscribe(Rc::new(move |event: &ProviderEvent| {
            if let Some(inner) = weak.upgrade() {
                Inner::on_base_event(&inner, event);
            }
        }));
        inner.base_listener.set(Some(id));
        Self { inner }
    }

    /// Parent key path this instance is scoped to; the root path for the
    /// provider created by [`BufferingTreeDataProvider::new`].
    pub fn scope(&self) -> &KeyPath {
        self.inner.edits.scope()
    }

    /// True when any staged edit exists strictly below `parent`.
    pub fn has_buffered_children(&self, parent: &KeyPath) -> bool {
        self.inner.edits.has_buffered_children_under(parent)
    }

    /// Stages an add and returns the item with its effective key.
    ///
    /// When the item carries no key (root key path), a key is generated
    /// under `detail.null_parent_key`. An `add_before_key` that is not a
    /// sibling of the new row is dropped with a warning instead of failing
    /// the add.
    pub fn add_item(&self, item: Item, detail: AddItemDetail) -> EditResult<Item> {
        let key = if item.metadata.key.is_root() {
            let parent = detail.null_parent_key.clone().ok_or(EditError::MissingKey)?;
            let component = (self.inner.shared.key_generator)(&parent);
            parent.child(component)
        } else {
            item.metadata.key.clone()
        };
        let parent = key.parent().unwrap_or_else(KeyPath::root);
        let add_before = detail.add_before_key.and_then(|before| {
            if before.parent().as_ref() == Some(&parent) {
                Some(before)
            } else {
                tracing::warn!(
                    add_before = %before,
                    parent = %parent,
                    "ignoring add-before key that is not a sibling of the new row"
                );
                None
            }
        });
        let item = Item::new(key.clone(), item.data);
        self.inner.edits.add_item(item.clone())?;
        if let Some(before) = &add_before {
            self.inner
                .shared
                .placement
                .borrow_mut()
                .insert(key.clone(), before.clone());
        }
        // anchors are meaningless in a sorted view; the sort decides placement
        let event_anchor = if self.inner.shared.last_sort.borrow().is_empty() {
            add_before
        } else {
            None
        };
        let parent_exists = parent.is_root() || self.inner.base.child_provider(&parent).is_some();
        if parent_exists {
            let mut operation = OperationDetail::for_items([&item]);
            operation.parent_keys = Some(vec![parent]);
            operation.add_before_keys = Some(vec![event_anchor]);
            self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
                add: Some(operation),
                ..MutateDetail::default()
            }));
        } else {
            // the child provider for this parent changes identity once it
            // has buffered children, so subscribers must re-query it
            self.inner.events.emit(&ProviderEvent::Refresh {
                keys: Some(vec![parent]),
            });
        }
        self.emit_submittable_change();
        Ok(item)
    }

    /// Stages a removal and resets buffered edits below the removed path.
    pub fn remove_item(&self, item: Item) -> EditResult<()> {
        let key = item.metadata.key.clone();
        let removed = item.clone();
        self.inner.edits.remove_item(item)?;
        let cascaded = self.inner.edits.reset_descendants(&key);
        {
            let mut placement = self.inner.shared.placement.borrow_mut();
            placement.remove(&key);
            for entry in &cascaded {
                placement.remove(entry.key());
            }
        }
        let mut operation = OperationDetail::for_items([&removed]);
        operation.parent_keys = key.parent().map(|parent| vec![parent]);
        self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
            remove: Some(operation),
            ..MutateDetail::default()
        }));
        self.emit_submittable_change();
        Ok(())
    }

    /// Stages an update, merging into any pending edit for the same key.
    pub fn update_item(&self, item: Item) -> EditResult<()> {
        let key = item.metadata.key.clone();
        self.inner.edits.update_item(item)?;
        let patch = self
            .inner
            .edits
            .shared()
            .borrow()
            .unsubmitted_entry(&key)
            .map(|entry| entry.item.data.clone())
            .unwrap_or_default();
        let mut data = self
            .inner
            .row_cache
            .borrow()
            .get(&key)
            .cloned()
            .unwrap_or_default();
        data.merge_from(&patch);
        let merged = Item::new(key.clone(), data);
        let mut operation = OperationDetail::for_items([&merged]);
        operation.parent_keys = key.parent().map(|parent| vec![parent]);
        self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
            update: Some(operation),
            ..MutateDetail::default()
        }));
        self.emit_submittable_change();
        Ok(())
    }

    /// Unsubmitted entries across the whole tree with no in-flight
    /// submission for the same key. Deliberately unscoped: the root view
    /// of the edit session covers every subtree.
    pub fn submittable_items(&self) -> Vec<EditItem> {
        self.inner.edits.shared().borrow().submittable_items()
    }

    pub fn reset_all_unsubmitted_items(&self) {
        let drained = self.inner.edits.reset_all_unsubmitted();
        if drained.is_empty() {
            return;
        }
        {
            let mut placement = self.inner.shared.placement.borrow_mut();
            for entry in &drained {
                placement.remove(entry.key());
            }
        }
        self.inner.events.emit(&ProviderEvent::Refresh { keys: None });
        self.emit_submittable_change();
    }

    pub fn reset_unsubmitted_item(&self, key: &KeyPath) -> EditResult<()> {
        let Some(entry) = self.inner.edits.reset_unsubmitted(key) else {
            return Err(EditError::UnknownEdit {
                key: key.clone(),
                status: EditStatus::Unsubmitted,
            });
        };
        self.inner.shared.placement.borrow_mut().remove(key);
        match entry.operation {
            EditOperation::Add => {
                // the staged row disappears from every merged view
                let mut operation = OperationDetail::for_items([&entry.item]);
                operation.parent_keys = key.parent().map(|parent| vec![parent]);
                self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
                    remove: Some(operation),
                    ..MutateDetail::default()
                }));
            }
            EditOperation::Update | EditOperation::Remove => {
                let base_data = self.inner.row_cache.borrow().get(key).cloned();
                match base_data {
                    Some(data) => {
                        let restored = Item::new(key.clone(), data);
                        let mut operation = OperationDetail::for_items([&restored]);
                        operation.parent_keys = key.parent().map(|parent| vec![parent]);
                        self.inner.events.emit(&ProviderEvent::Mutate(MutateDetail {
                            update: Some(operation),
                            ..MutateDetail::default()
                        }));
                    }
                    None => {
                        self.inner.events.emit(&ProviderEvent::Refresh {
                            keys: key.parent().map(|parent| vec![parent]),
                        });
                    }
                }
            }
        }
        self.emit_submittable_change();
        Ok(())
    }

    /// Transitions an edit entry; see [`EditBuffer::set_item_status`].
    pub fn set_item_status(
        &self,
        edit: &EditItem,
        new_status: EditStatus,
        error: Option<Message>,
        new_key: Option<KeyPath>,
    ) -> EditResult<()> {
        let assigned = new_key.is_some();
        self.inner.edits.set_item_status(edit, new_status, error, new_key)?;
        if assigned {
            self.inner
                .shared
                .retired_data
                .borrow_mut()
                .insert(edit.key().clone(), edit.item.data.clone());
        }
        self.emit_submittable_change();
        Ok(())
    }

    pub fn subscribe_submittable_change(
        &self,
        listener: Rc<dyn Fn(&Vec<EditItem>)>,
    ) -> ListenerId {
        self.inner.submittable_events.subscribe(listener)
    }

    pub fn unsubscribe_submittable_change(&self, id: ListenerId) {
        self.inner.submittable_events.unsubscribe(id);
    }

    fn emit_submittable_change(&self) {
        let items = self.inner.edits.shared().borrow().submittable_items();
        self.inner.submittable_events.emit(&items);
    }
}

impl TreeDataProvider for BufferingTreeDataProvider {
    fn key_structure(&self) -> KeyStructure {
        self.inner.base.key_structure()
    }

    fn fetch_first(
        &self,
        params: FetchFirstParams,
    ) -> LocalBoxStream<'static, ProviderResult<FetchPage>> {
        let inner = Rc::clone(&self.inner);
        *inner.shared.last_sort.borrow_mut() = params.sort.clone();
        let overlay = overlay_entries(&inner.shared, Some(inner.edits.scope()));
        let base = inner.base.fetch_first(params.clone());
        let session = FetchSession {
            inner,
            params,
            base,
            overlay,
            emitted: HashSet::new(),
            first_page: true,
            finished: false,
        };
        stream::unfold(session, |mut session| async move {
            if session.finished {
                return None;
            }
            match next_merged_page(&mut session).await {
                Ok(page) => {
                    session.finished = page.done;
                    Some((Ok(page), session))
                }
                Err(err) => {
                    session.finished = true;
                    Some((Err(err), session))
                }
            }
        })
        .boxed_local()
    }

    fn fetch_by_offset(
        &self,
        params: FetchByOffsetParams,
    ) -> LocalBoxFuture<'static, ProviderResult<FetchByOffsetResult>> {
        let inner = Rc::clone(&self.inner);
        async move {
            *inner.shared.last_sort.borrow_mut() = params.sort.clone();
            let overlay = overlay_entries(&inner.shared, Some(inner.edits.scope()));
            let want = params.size.map(|size| params.offset + size);
            let mut base_rows: Vec<Item> = Vec::new();
            let mut base_done;
            loop {
                let chunk = want.map(|target| {
                    (target + overlay.removes.len())
                        .saturating_sub(base_rows.len())
                        .max(1)
                });
                let result = inner
                    .base
                    .fetch_by_offset(FetchByOffsetParams {
                        offset: base_rows.len(),
                        size: chunk,
                        sort: params.sort.clone(),
                    })
                    .await?;
                let progressed = !result.results.is_empty();
                base_rows.extend(result.results);
                base_done = result.done;
                if base_done || !progressed {
                    break;
                }
                if let Some(target) = want {
                    let visible = base_rows
                        .iter()
                        .filter(|row| !overlay.removes.contains(&row.metadata.key))
                        .count()
                        + overlay.adds.len();
                    if visible >= target {
                        break;
                    }
                }
            }
            {
                let mut cache = inner.row_cache.borrow_mut();
                for row in &base_rows {
                    cache.insert(row.metadata.key.clone(), row.data.clone());
                }
            }
            let merged = apply_overlay(base_rows, &overlay, &params.sort);
            let start = params.offset.min(merged.len());
            let end = match params.size {
                Some(size) => (start + size).min(merged.len()),
                None => merged.len(),
            };
            Ok(FetchByOffsetResult {
                results: merged[start..end].to_vec(),
                done: base_done && end >= merged.len(),
            })
        }
        .boxed_local()
    }

    fn fetch_by_keys(
        &self,
        params: FetchByKeysParams,
    ) -> LocalBoxFuture<'static, ProviderResult<FetchByKeysResult>> {
        let inner = Rc::clone(&self.inner);
        async move {
            let overlay = overlay_entries(&inner.shared, None);
            let mut results: HashMap<KeyPath, Item> = HashMap::new();
            let mut remaining: Vec<KeyPath> = Vec::new();
            for key in params.keys {
                if overlay.removes.contains(&key) {
                    continue;
                }
                if let Some((add, _)) = overlay
                    .adds
                    .iter()
                    .find(|(add, _)| add.metadata.key == key)
                {
                    results.insert(key, add.clone());
                } else {
                    remaining.push(key);
                }
            }
            if !remaining.is_empty() {
                let base = inner
                    .base
                    .fetch_by_keys(FetchByKeysParams { keys: remaining })
                    .await?;
                for (key, mut item) in base.results {
                    if let Some(patch) = overlay.updates.get(&key) {
                        item.data.merge_from(patch);
                    }
                    results.insert(key, item);
                }
            }
            Ok(FetchByKeysResult { results })
        }
        .boxed_local()
    }

    fn contains_keys(
        &self,
        params: ContainsKeysParams,
    ) -> LocalBoxFuture<'static, ProviderResult<ContainsKeysResult>> {
        let inner = Rc::clone(&self.inner);
        async move {
            let overlay = overlay_entries(&inner.shared, None);
            let mut results: HashSet<KeyPath> = HashSet::new();
            let mut remaining: Vec<KeyPath> = Vec::new();
            for key in params.keys {
                if overlay.removes.contains(&key) {
                    continue;
                }
                if overlay.adds.iter().any(|(add, _)| add.metadata.key == key) {
                    results.insert(key);
                } else {
                    remaining.push(key);
                }
            }
            if !remaining.is_empty() {
                let base = inner
                    .base
                    .contains_keys(ContainsKeysParams { keys: remaining })
                    .await?;
                results.extend(base.results);
            }
            Ok(ContainsKeysResult { results })
        }
        .boxed_local()
    }

    fn child_provider(&self, parent: &KeyPath) -> Option<Rc<dyn TreeDataProvider>> {
        let base_child = match self.inner.base.child_provider(parent) {
            Some(base_child) => base_child,
            None => {
                if !self.inner.edits.has_buffered_children_under(parent) {
                    return None;
                }
                // the subtree exists only as buffered edits; back it with
                // an empty mutable array so it is still navigable
                Rc::new(ArrayTreeDataProvider::empty_at(parent.clone())) as Rc<dyn TreeDataProvider>
            }
        };
        Some(Rc::new(Self::wrap(
            base_child,
            Rc::clone(&self.inner.shared),
            self.inner.edits.rescope(parent.clone()),
        )))
    }

    fn subscribe(&self, listener: Rc<dyn Fn(&ProviderEvent)>) -> ListenerId {
        self.inner.events.subscribe(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.inner.events.unsubscribe(id);
    }
}

impl Inner {
    fn on_base_event(inner: &Rc<Inner>, event: &ProviderEvent) {
        match event {
            ProviderEvent::Refresh { keys } => {
                inner.row_cache.borrow_mut().clear();
                inner.events.emit(&ProviderEvent::Refresh { keys: keys.clone() });
            }
            ProviderEvent::Mutate(detail) => {
                let (translated, buffer_changed) = inner.reconcile_mutation(detail);
                if buffer_changed {
                    let items = inner.shared.buffer.borrow().submittable_items();
                    inner.submittable_events.emit(&items);
                }
                if !translated.is_empty() {
                    inner.events.emit(&ProviderEvent::Mutate(translated));
                }
            }
        }
    }

    /// Diffs a base mutation against the buffer so a committed row is not
    /// reported twice, and folds placeholder retirements into the event.
    fn reconcile_mutation(&self, detail: &MutateDetail) -> (MutateDetail, bool) {
        let mut translated = detail.clone();
        let mut changed = false;
        {
            let mut buffer = self.shared.buffer.borrow_mut();
            let mut placement = self.shared.placement.borrow_mut();
            let mut log = self.shared.retired_log.borrow_mut();
            if let Some(add) = &detail.add {
                for key in &add.keys {
                    if let Some(generated) = buffer.retire_assigned_key(key) {
                        tracing::debug!(
                            assigned = %key,
                            generated = %generated,
                            "base add confirmed a re-keyed row; retiring placeholder"
                        );
                        let captured = self.shared.retired_data.borrow_mut().remove(&generated);
                        let data = buffer
                            .unsubmitted_entry(&generated)
                            .or_else(|| buffer.submitting_entry(&generated))
                            .map(|entry| entry.item.data.clone())
                            .or(captured)
                            .or_else(|| self.row_cache.borrow_mut().remove(&generated))
                            .unwrap_or_default();
                        changed |= buffer.discard(&generated);
                        placement.remove(&generated);
                        log.push(RetiredPlaceholder {
                            assigned: key.clone(),
                            generated,
                            data,
                        });
                    }
                    changed |= buffer.discard(key);
                    placement.remove(key);
                }
            }
            if let Some(update) = &detail.update {
                for key in &update.keys {
                    if let Some(generated) = buffer.retire_assigned_key(key) {
                        // a committed re-keyed add: buffered children still
                        // recorded under the placeholder path are ghost rows
                        let cleared = buffer.reset_descendants(&generated);
                        if !cleared.is_empty() {
                            changed = true;
                            tracing::debug!(
                                assigned = %key,
                                cleared = cleared.len(),
                                "cleaned buffered children of a committed placeholder parent"
                            );
                        }
                        for entry in &cleared {
                            placement.remove(entry.key());
                        }
                        changed |= buffer.discard(&generated);
                        placement.remove(&generated);
                    }
                    changed |= buffer.discard(key);
                }
            }
            if let Some(remove) = &detail.remove {
                for key in &remove.keys {
                    changed |= buffer.discard(key);
                    let cleared = buffer.reset_descendants(key);
                    changed |= !cleared.is_empty();
                    for entry in &cleared {
                        placement.remove(entry.key());
                    }
                    placement.remove(key);
                }
            }
        }
        // every instance folds the retirements matching this event's adds,
        // not just the one whose listener consumed the key mapping
        let retired: Vec<RetiredPlaceholder> = {
            let log = self.shared.retired_log.borrow();
            let start = self.retired_cursor.get().min(log.len());
            self.retired_cursor.set(log.len());
            let add_keys: &[KeyPath] = detail
                .add
                .as_ref()
                .map(|add| add.keys.as_slice())
                .unwrap_or(&[]);
            log[start..]
                .iter()
                .filter(|entry| add_keys.contains(&entry.assigned))
                .cloned()
                .collect()
        };
        if !retired.is_empty() {
            let mut removal = translated.remove.take().unwrap_or_default();
            let fold_parents = removal.keys.is_empty() || removal.parent_keys.is_some();
            for entry in &retired {
                removal.keys.push(entry.generated.clone());
                removal.data.push(entry.data.clone());
                removal.metadata.push(ItemMetadata::new(entry.generated.clone()));
            }
            if fold_parents {
                let parents = removal.parent_keys.get_or_insert_with(Vec::new);
                for entry in &retired {
                    parents.push(entry.generated.parent().unwrap_or_else(KeyPath::root));
                }
            }
            translated.remove = Some(removal);
        }
        (translated, changed)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(id) = self.base_listener.take() {
            self.base.unsubscribe(id);
        }
    }
}

/// Buffered edits of one parent scope, flattened to their effective view:
/// one add, update or remove per key after layering any unsubmitted entry
/// on top of its in-flight submitting entry.
#[derive(Default)]
struct Overlay {
    adds: Vec<(Item, Option<KeyPath>)>,
    updates: HashMap<KeyPath, RowData>,
    removes: HashSet<KeyPath>,
}

fn overlay_entries(shared: &Shared, scope: Option<&KeyPath>) -> Overlay {
    let buffer = shared.buffer.borrow();
    let placement = shared.placement.borrow();
    let mut order: Vec<KeyPath> = Vec::new();
    let mut effective: HashMap<KeyPath, (EditOperation, Item)> = HashMap::new();
    for entry in buffer.submitting_items().chain(buffer.unsubmitted_items()) {
        let key = entry.key();
        if let Some(scope) = scope {
            if key.parent().as_ref() != Some(scope) {
                continue;
            }
        }
        match effective.get_mut(key) {
            None => {
                order.push(key.clone());
                effective.insert(key.clone(), (entry.operation, entry.item.clone()));
            }
            Some((operation, item)) => match entry.operation {
                EditOperation::Remove => *operation = EditOperation::Remove,
                EditOperation::Add | EditOperation::Update => {
                    item.data.merge_from(&entry.item.data);
                    if *operation != EditOperation::Add {
                        *operation = entry.operation;
                    }
                }
            },
        }
    }
    let mut overlay = Overlay::default();
    for key in order {
        let Some((operation, mut item)) = effective.remove(&key) else {
            continue;
        };
        match operation {
            EditOperation::Add => {
                // a submission error for the staged row rides on its metadata
                if item.metadata.message.is_none() {
                    item.metadata.message = buffer
                        .unsubmitted_entry(&key)
                        .or_else(|| buffer.submitting_entry(&key))
                        .and_then(|entry| entry.error.clone());
                }
                let anchor = placement.get(&key).cloned();
                overlay.adds.push((item, anchor));
            }
            EditOperation::Update => {
                overlay.updates.insert(key, item.data);
            }
            EditOperation::Remove => {
                overlay.removes.insert(key);
            }
        }
    }
    overlay
}

/// Full merged view for offset fetches: removed rows dropped, update data
/// overlaid, buffered adds placed before their anchor (or at the top, in
/// insertion order) or sort-merged when sort criteria are active.
fn apply_overlay(base: Vec<Item>, overlay: &Overlay, sort: &[SortCriterion]) -> Vec<Item> {
    let mut rows: Vec<Item> = Vec::with_capacity(base.len() + overlay.adds.len());
    for mut item in base {
        if overlay.removes.contains(&item.metadata.key) {
            continue;
        }
        if overlay
            .adds
            .iter()
            .any(|(add, _)| add.metadata.key == item.metadata.key)
        {
            continue;
        }
        if let Some(patch) = overlay.updates.get(&item.metadata.key) {
            item.data.merge_from(patch);
        }
        rows.push(item);
    }
    if sort.is_empty() {
        let mut top = 0usize;
        for (add, anchor) in &overlay.adds {
            let position = anchor
                .as_ref()
                .and_then(|before| rows.iter().position(|row| &row.metadata.key == before));
            match position {
                Some(pos) => rows.insert(pos, add.clone()),
                None => {
                    rows.insert(top, add.clone());
                    top += 1;
                }
            }
        }
    } else {
        for (add, _) in &overlay.adds {
            let position = rows
                .iter()
                .position(|row| compare_rows(&add.data, &row.data, sort).is_le())
                .unwrap_or(rows.len());
            rows.insert(position, add.clone());
        }
    }
    rows
}

struct FetchSession {
    inner: Rc<Inner>,
    params: FetchFirstParams,
    base: LocalBoxStream<'static, ProviderResult<FetchPage>>,
    overlay: Overlay,
    emitted: HashSet<KeyPath>,
    first_page: bool,
    finished: bool,
}

async fn next_merged_page(session: &mut FetchSession) -> ProviderResult<FetchPage> {
    let base_page = match session.base.next().await {
        Some(page) => page?,
        None => FetchPage {
            results: Vec::new(),
            done: true,
        },
    };
    let mut rows: Vec<Item> = Vec::with_capacity(base_page.results.len());
    {
        let mut cache = session.inner.row_cache.borrow_mut();
        for mut item in base_page.results {
            cache.insert(item.metadata.key.clone(), item.data.clone());
            if session.overlay.removes.contains(&item.metadata.key) {
                continue;
            }
            if session
                .overlay
                .adds
                .iter()
                .any(|(add, _)| add.metadata.key == item.metadata.key)
            {
                continue;
            }
            if let Some(patch) = session.overlay.updates.get(&item.metadata.key) {
                item.data.merge_from(patch);
            }
            rows.push(item);
        }
    }
    merge_buffered_adds(&mut rows, session, base_page.done);
    session.first_page = false;
    Ok(FetchPage {
        results: rows,
        done: base_page.done,
    })
}

/// Places not-yet-emitted buffered adds into the current page: anchored
/// adds right before their anchor row when it appears, unanchored adds at
/// the top of the first page, leftovers on the final page. With active
/// sort criteria adds are merged at their sorted position instead.
fn merge_buffered_adds(rows: &mut Vec<Item>, session: &mut FetchSession, done: bool) {
    let adds: Vec<(Item, Option<KeyPath>)> = session.overlay.adds.clone();
    if session.params.sort.is_empty() {
        let mut top = 0usize;
        for (add, anchor) in adds {
            let key = add.metadata.key.clone();
            if session.emitted.contains(&key) {
                continue;
            }
            if let Some(before) = &anchor {
                if let Some(position) = rows.iter().position(|row| &row.metadata.key == before) {
                    rows.insert(position, add);
                    session.emitted.insert(key);
                    continue;
                }
            } else if session.first_page {
                rows.insert(top, add);
                top += 1;
                session.emitted.insert(key);
                continue;
            }
            if done {
                rows.push(add);
                session.emitted.insert(key);
            }
        }
    } else {
        let sort = session.params.sort.clone();
        for (add, _) in adds {
            let key = add.metadata.key.clone();
            if session.emitted.contains(&key) {
                continue;
            }
            let position = rows
                .iter()
                .position(|row| compare_rows(&add.data, &row.data, &sort).is_le());
            match position {
                Some(pos) => {
                    rows.insert(pos, add);
                    session.emitted.insert(key);
                }
                None if done => {
                    rows.push(add);
                    session.emitted.insert(key);
                }
                None => {}
            }
        }
    }
}
