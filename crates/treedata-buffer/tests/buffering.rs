use std::cell::RefCell;
use std::rc::Rc;

use futures::StreamExt;
use futures::executor::block_on;

use treedata_buffer::{
    AddItemDetail, BufferingOptions, BufferingTreeDataProvider, EditError, EditStatus,
};
use treedata_model::{
    CellValue, Item, Key, KeyPath, Message, ProviderEvent, RowData, SortCriterion,
};
use treedata_provider::{
    ArrayTreeDataProvider, ContainsKeysParams, FetchByKeysParams, FetchByOffsetParams,
    FetchByOffsetResult, FetchByKeysResult, ContainsKeysResult, FetchFirstParams, FetchPage,
    KeyStructure, ListenerId, ProviderError, ProviderResult, TreeDataProvider, TreeNode,
};

fn path(components: &[&str]) -> KeyPath {
    components.iter().map(|c| Key::from(*c)).collect()
}

fn row(name: &str, size: f64) -> RowData {
    RowData::new()
        .with_field("name", CellValue::from(name))
        .with_field("size", CellValue::from(size))
}

fn base_tree() -> Rc<ArrayTreeDataProvider> {
    Rc::new(ArrayTreeDataProvider::new(vec![
        TreeNode::leaf("a", row("a", 1.0)),
        TreeNode::leaf("b", row("b", 3.0)),
        TreeNode::leaf("c", row("c", 5.0)),
        TreeNode::branch("dir1", row("dir1", 0.0), vec![]),
    ]))
}

fn wrap(base: Rc<ArrayTreeDataProvider>) -> BufferingTreeDataProvider {
    BufferingTreeDataProvider::new(base, BufferingOptions::new()).unwrap()
}

fn fetch_all(provider: &dyn TreeDataProvider) -> Vec<Item> {
    let pages: Vec<_> = block_on(
        provider
            .fetch_first(FetchFirstParams::default())
            .collect::<Vec<_>>(),
    );
    pages
        .into_iter()
        .flat_map(|page| page.unwrap().results)
        .collect()
}

fn keys_of(items: &[Item]) -> Vec<KeyPath> {
    items.iter().map(|item| item.key().clone()).collect()
}

#[test]
fn fetch_merges_staged_edits() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .update_item(Item::new(
            path(&["b"]),
            RowData::new().with_field("size", CellValue::from(4.0)),
        ))
        .unwrap();
    provider
        .remove_item(Item::new(path(&["c"]), row("c", 5.0)))
        .unwrap();
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();

    let items = fetch_all(&provider);
    assert_eq!(
        keys_of(&items),
        vec![path(&["d"]), path(&["a"]), path(&["b"]), path(&["dir1"])]
    );
    // the update is a field patch, not a replacement
    let b = &items[2];
    assert_eq!(b.data.get("size"), Some(&CellValue::from(4.0)));
    assert_eq!(b.data.get("name"), Some(&CellValue::from("b")));
}

#[test]
fn base_data_is_untouched_by_staged_edits() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .remove_item(Item::new(path(&["a"]), row("a", 1.0)))
        .unwrap();
    let underneath = fetch_all(base.as_ref());
    assert_eq!(underneath.len(), 4);
}

#[test]
fn anchored_add_lands_before_its_sibling() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .add_item(
            Item::new(path(&["d"]), row("d", 2.0)),
            AddItemDetail {
                null_parent_key: None,
                add_before_key: Some(path(&["b"])),
            },
        )
        .unwrap();
    let items = fetch_all(&provider);
    assert_eq!(
        keys_of(&items),
        vec![path(&["a"]), path(&["d"]), path(&["b"]), path(&["c"]), path(&["dir1"])]
    );
}

#[test]
fn non_sibling_anchor_is_ignored() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .add_item(
            Item::new(path(&["d"]), row("d", 2.0)),
            AddItemDetail {
                null_parent_key: None,
                add_before_key: Some(path(&["dir1", "file1"])),
            },
        )
        .unwrap();
    let items = fetch_all(&provider);
    // falls back to top placement
    assert_eq!(items[0].key(), &path(&["d"]));
}

#[test]
fn sorted_fetch_places_adds_at_their_sorted_position() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();
    let pages: Vec<_> = block_on(
        provider
            .fetch_first(FetchFirstParams {
                size: None,
                sort: vec![SortCriterion::ascending("size")],
            })
            .collect::<Vec<_>>(),
    );
    let items = pages[0].as_ref().unwrap().results.clone();
    assert_eq!(
        keys_of(&items),
        vec![path(&["dir1"]), path(&["a"]), path(&["d"]), path(&["b"]), path(&["c"])]
    );
}

#[test]
fn paged_fetch_emits_each_add_once() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();
    let pages: Vec<_> = block_on(
        provider
            .fetch_first(FetchFirstParams {
                size: Some(2),
                sort: Vec::new(),
            })
            .collect::<Vec<_>>(),
    );
    let all: Vec<Item> = pages
        .into_iter()
        .flat_map(|page| page.unwrap().results)
        .collect();
    assert_eq!(all.len(), 5);
    assert_eq!(all[0].key(), &path(&["d"]));
    let d_count = all.iter().filter(|item| item.key() == &path(&["d"])).count();
    assert_eq!(d_count, 1);
}

#[test]
fn fetch_by_offset_applies_the_overlay() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .remove_item(Item::new(path(&["b"]), row("b", 3.0)))
        .unwrap();
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();

    // merged view: d, a, c, dir1
    let result = block_on(provider.fetch_by_offset(FetchByOffsetParams {
        offset: 1,
        size: Some(2),
        sort: Vec::new(),
    }))
    .unwrap();
    assert_eq!(keys_of(&result.results), vec![path(&["a"]), path(&["c"])]);
    assert!(!result.done);

    let tail = block_on(provider.fetch_by_offset(FetchByOffsetParams {
        offset: 3,
        size: Some(5),
        sort: Vec::new(),
    }))
    .unwrap();
    assert_eq!(keys_of(&tail.results), vec![path(&["dir1"])]);
    assert!(tail.done);
}

#[test]
fn key_fetches_are_overlay_first() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .remove_item(Item::new(path(&["c"]), row("c", 5.0)))
        .unwrap();
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();
    provider
        .update_item(Item::new(
            path(&["a"]),
            RowData::new().with_field("size", CellValue::from(9.0)),
        ))
        .unwrap();

    let fetched = block_on(provider.fetch_by_keys(FetchByKeysParams {
        keys: vec![path(&["a"]), path(&["c"]), path(&["d"])],
    }))
    .unwrap();
    assert!(!fetched.results.contains_key(&path(&["c"])));
    assert_eq!(
        fetched.results[&path(&["d"])].data.get("name"),
        Some(&CellValue::from("d"))
    );
    assert_eq!(
        fetched.results[&path(&["a"])].data.get("size"),
        Some(&CellValue::from(9.0))
    );

    let contained = block_on(provider.contains_keys(ContainsKeysParams {
        keys: vec![path(&["a"]), path(&["c"]), path(&["d"])],
    }))
    .unwrap();
    assert!(contained.results.contains(&path(&["a"])));
    assert!(!contained.results.contains(&path(&["c"])));
    assert!(contained.results.contains(&path(&["d"])));
}

#[test]
fn add_under_staged_parent_creates_a_buffered_subtree() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));

    let events: Rc<RefCell<Vec<ProviderEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    provider.subscribe(Rc::new(move |event: &ProviderEvent| {
        sink.borrow_mut().push(event.clone());
    }));

    provider
        .add_item(Item::new(path(&["newdir"]), row("newdir", 0.0)), AddItemDetail::default())
        .unwrap();
    provider
        .add_item(
            Item::new(path(&["newdir", "kid"]), row("kid", 1.0)),
            AddItemDetail::default(),
        )
        .unwrap();

    {
        let events = events.borrow();
        assert!(matches!(events[0], ProviderEvent::Mutate(_)));
        // the parent has no base child provider yet, so subscribers get a
        // targeted refresh instead of a mutate
        assert_eq!(
            events[1],
            ProviderEvent::Refresh {
                keys: Some(vec![path(&["newdir"])])
            }
        );
    }

    let children = provider.child_provider(&path(&["newdir"])).unwrap();
    let items = fetch_all(children.as_ref());
    assert_eq!(keys_of(&items), vec![path(&["newdir", "kid"])]);

    // removing the staged parent cascades to its buffered descendants
    provider
        .remove_item(Item::new(path(&["newdir"]), row("newdir", 0.0)))
        .unwrap();
    assert!(provider.submittable_items().is_empty());
    assert!(provider.child_provider(&path(&["newdir"])).is_none());
}

#[test]
fn unkeyed_add_requires_a_parent_key() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    let result = provider.add_item(
        Item::new(KeyPath::root(), row("x", 0.0)),
        AddItemDetail::default(),
    );
    assert!(matches!(result, Err(EditError::MissingKey)));
}

#[test]
fn generated_keys_are_distinct() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    let detail = AddItemDetail {
        null_parent_key: Some(path(&["dir1"])),
        add_before_key: None,
    };
    let first = provider
        .add_item(Item::new(KeyPath::root(), row("x", 0.0)), detail.clone())
        .unwrap();
    let second = provider
        .add_item(Item::new(KeyPath::root(), row("y", 0.0)), detail)
        .unwrap();
    assert_eq!(first.metadata.key.parent(), Some(path(&["dir1"])));
    assert_eq!(second.metadata.key.parent(), Some(path(&["dir1"])));
    assert_ne!(first.metadata.key, second.metadata.key);
}

#[test]
fn duplicate_staged_add_conflicts() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();
    assert!(matches!(
        provider.add_item(Item::new(path(&["d"]), row("d2", 2.0)), AddItemDetail::default()),
        Err(EditError::DuplicateEdit(_))
    ));
}

#[test]
fn deferred_key_commit_does_not_duplicate_the_row() {
    let base = base_tree();
    let provider = BufferingTreeDataProvider::new(
        Rc::clone(&base) as Rc<dyn TreeDataProvider>,
        BufferingOptions::new().with_key_generator(|_| Key::from("temp-1")),
    )
    .unwrap();

    let staged = provider
        .add_item(
            Item::new(KeyPath::root(), row("new file", 7.0)),
            AddItemDetail {
                null_parent_key: Some(path(&["dir1"])),
                add_before_key: None,
            },
        )
        .unwrap();
    assert_eq!(staged.metadata.key, path(&["dir1", "temp-1"]));

    // the child view surfaces the staged row under its generated key
    let children = provider.child_provider(&path(&["dir1"])).unwrap();
    let items = fetch_all(children.as_ref());
    assert_eq!(keys_of(&items), vec![path(&["dir1", "temp-1"])]);

    // commit: submit, then report the key the data source assigned
    let submittable = provider.submittable_items();
    assert_eq!(submittable.len(), 1);
    let entry = &submittable[0];
    provider
        .set_item_status(entry, EditStatus::Submitting, None, None)
        .unwrap();
    provider
        .set_item_status(
            entry,
            EditStatus::Submitted,
            None,
            Some(path(&["dir1", "real-7"])),
        )
        .unwrap();
    assert!(provider.submittable_items().is_empty());

    let events: Rc<RefCell<Vec<ProviderEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    provider.subscribe(Rc::new(move |event: &ProviderEvent| {
        sink.borrow_mut().push(event.clone());
    }));

    // the base confirms the add under the assigned key; the placeholder
    // retirement rides along as a remove in the translated event
    base.append_child(&path(&["dir1"]), TreeNode::leaf("real-7", row("new file", 7.0)))
        .unwrap();
    {
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        let ProviderEvent::Mutate(detail) = &events[0] else {
            panic!("expected a mutate event");
        };
        assert_eq!(
            detail.add.as_ref().unwrap().keys,
            vec![path(&["dir1", "real-7"])]
        );
        assert_eq!(
            detail.remove.as_ref().unwrap().keys,
            vec![path(&["dir1", "temp-1"])]
        );
    }

    let items = fetch_all(provider.child_provider(&path(&["dir1"])).unwrap().as_ref());
    assert_eq!(keys_of(&items), vec![path(&["dir1", "real-7"])]);
}

#[test]
fn every_live_instance_folds_the_placeholder_removal() {
    let base = base_tree();
    let provider = BufferingTreeDataProvider::new(
        Rc::clone(&base) as Rc<dyn TreeDataProvider>,
        BufferingOptions::new().with_key_generator(|_| Key::from("temp-1")),
    )
    .unwrap();

    provider
        .add_item(
            Item::new(KeyPath::root(), row("new file", 7.0)),
            AddItemDetail {
                null_parent_key: Some(path(&["dir1"])),
                add_before_key: None,
            },
        )
        .unwrap();

    // a long-lived child view of the subtree rendering the placeholder row
    let children = provider.child_provider(&path(&["dir1"])).unwrap();
    let child_events: Rc<RefCell<Vec<ProviderEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&child_events);
    children.subscribe(Rc::new(move |event: &ProviderEvent| {
        sink.borrow_mut().push(event.clone());
    }));

    let entry = provider.submittable_items().remove(0);
    provider
        .set_item_status(&entry, EditStatus::Submitting, None, None)
        .unwrap();
    provider
        .set_item_status(
            &entry,
            EditStatus::Submitted,
            None,
            Some(path(&["dir1", "real-7"])),
        )
        .unwrap();

    base.append_child(&path(&["dir1"]), TreeNode::leaf("real-7", row("new file", 7.0)))
        .unwrap();

    // the child instance reconciles after the root consumed the key
    // mapping; it must still report the placeholder removal
    let events = child_events.borrow();
    assert_eq!(events.len(), 1);
    let ProviderEvent::Mutate(detail) = &events[0] else {
        panic!("expected a mutate event");
    };
    assert_eq!(
        detail.add.as_ref().unwrap().keys,
        vec![path(&["dir1", "real-7"])]
    );
    let removal = detail.remove.as_ref().unwrap();
    assert_eq!(removal.keys, vec![path(&["dir1", "temp-1"])]);
    assert_eq!(removal.data[0].get("name"), Some(&CellValue::from("new file")));
}

#[test]
fn rejected_submission_surfaces_its_message_on_the_row() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();
    let entry = provider.submittable_items().remove(0);
    provider
        .set_item_status(&entry, EditStatus::Submitting, None, None)
        .unwrap();
    provider
        .set_item_status(
            &entry,
            EditStatus::Unsubmitted,
            Some(Message::error("backend rejected the row")),
            None,
        )
        .unwrap();

    let items = fetch_all(&provider);
    let staged = items.iter().find(|item| item.key() == &path(&["d"])).unwrap();
    let message = staged.metadata.message.as_ref().unwrap();
    assert_eq!(message.summary, "backend rejected the row");
    // base rows carry no message
    assert!(items[1].metadata.message.is_none());
}

#[test]
fn base_remove_discards_the_buffered_edit_for_that_key() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .update_item(Item::new(
            path(&["a"]),
            RowData::new().with_field("size", CellValue::from(9.0)),
        ))
        .unwrap();
    assert_eq!(provider.submittable_items().len(), 1);

    let events: Rc<RefCell<Vec<ProviderEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    provider.subscribe(Rc::new(move |event: &ProviderEvent| {
        sink.borrow_mut().push(event.clone());
    }));

    base.remove_node(&path(&["a"])).unwrap();
    assert!(provider.submittable_items().is_empty());
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(fetch_all(&provider).len(), 3);
}

#[test]
fn reset_restores_the_base_view() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    // populate the row cache so the reset can emit the base data
    fetch_all(&provider);

    provider
        .update_item(Item::new(
            path(&["a"]),
            RowData::new().with_field("size", CellValue::from(9.0)),
        ))
        .unwrap();

    let events: Rc<RefCell<Vec<ProviderEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    provider.subscribe(Rc::new(move |event: &ProviderEvent| {
        sink.borrow_mut().push(event.clone());
    }));

    provider.reset_unsubmitted_item(&path(&["a"])).unwrap();
    {
        let events = events.borrow();
        let ProviderEvent::Mutate(detail) = &events[0] else {
            panic!("expected a mutate event");
        };
        let update = detail.update.as_ref().unwrap();
        assert_eq!(update.data[0].get("size"), Some(&CellValue::from(1.0)));
    }

    let items = fetch_all(&provider);
    assert_eq!(items[0].data.get("size"), Some(&CellValue::from(1.0)));
    assert!(provider.submittable_items().is_empty());

    // resetting an untracked key is an error
    assert!(provider.reset_unsubmitted_item(&path(&["a"])).is_err());
}

#[test]
fn reset_all_clears_everything_and_refreshes() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();
    provider
        .remove_item(Item::new(path(&["a"]), row("a", 1.0)))
        .unwrap();

    let events: Rc<RefCell<Vec<ProviderEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    provider.subscribe(Rc::new(move |event: &ProviderEvent| {
        sink.borrow_mut().push(event.clone());
    }));

    provider.reset_all_unsubmitted_items();
    assert_eq!(
        events.borrow().as_slice(),
        &[ProviderEvent::Refresh { keys: None }]
    );
    assert_eq!(fetch_all(&provider).len(), 4);
}

#[test]
fn submittable_listener_tracks_the_buffer() {
    let base = base_tree();
    let provider = wrap(Rc::clone(&base));
    let counts: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&counts);
    let id = provider.subscribe_submittable_change(Rc::new(move |items: &Vec<_>| {
        sink.borrow_mut().push(items.len());
    }));

    provider
        .add_item(Item::new(path(&["d"]), row("d", 2.0)), AddItemDetail::default())
        .unwrap();
    provider
        .remove_item(Item::new(path(&["a"]), row("a", 1.0)))
        .unwrap();
    provider.reset_all_unsubmitted_items();
    assert_eq!(counts.borrow().as_slice(), &[1, 2, 0]);

    provider.unsubscribe_submittable_change(id);
    provider
        .add_item(Item::new(path(&["e"]), row("e", 2.0)), AddItemDetail::default())
        .unwrap();
    assert_eq!(counts.borrow().len(), 3);
}

struct OpaqueProvider(ArrayTreeDataProvider);

impl TreeDataProvider for OpaqueProvider {
    fn key_structure(&self) -> KeyStructure {
        KeyStructure::Opaque
    }

    fn fetch_first(
        &self,
        params: FetchFirstParams,
    ) -> futures::stream::LocalBoxStream<'static, ProviderResult<FetchPage>> {
        self.0.fetch_first(params)
    }

    fn fetch_by_offset(
        &self,
        params: FetchByOffsetParams,
    ) -> futures::future::LocalBoxFuture<'static, ProviderResult<FetchByOffsetResult>> {
        self.0.fetch_by_offset(params)
    }

    fn fetch_by_keys(
        &self,
        params: FetchByKeysParams,
    ) -> futures::future::LocalBoxFuture<'static, ProviderResult<FetchByKeysResult>> {
        self.0.fetch_by_keys(params)
    }

    fn contains_keys(
        &self,
        params: ContainsKeysParams,
    ) -> futures::future::LocalBoxFuture<'static, ProviderResult<ContainsKeysResult>> {
        self.0.contains_keys(params)
    }

    fn child_provider(&self, parent: &KeyPath) -> Option<Rc<dyn TreeDataProvider>> {
        self.0.child_provider(parent)
    }

    fn subscribe(&self, listener: Rc<dyn Fn(&ProviderEvent)>) -> ListenerId {
        self.0.subscribe(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.0.unsubscribe(id);
    }
}

#[test]
fn opaque_key_structure_is_rejected() {
    let base = Rc::new(OpaqueProvider(ArrayTreeDataProvider::new(Vec::new())));
    let result = BufferingTreeDataProvider::new(base, BufferingOptions::new());
    assert!(matches!(result, Err(ProviderError::UnsupportedKeyStructure)));
}
