//! Integration tests for the in-memory store family.

use serde_json::{json, Value};

use cbstore::store::hierarchy::{Hierarchy, HierarchyConfig, MultiParented};
use cbstore::store::{LoadOptions, ObjectStore, PutOptions, StoreEvent};
use cbstore::{Query, QueryOptions, StoreError, StoreObject};

fn obj(value: Value) -> StoreObject {
    StoreObject::from_value(value).unwrap()
}

fn ids(objects: &[StoreObject]) -> Vec<String> {
    objects.iter().filter_map(|o| o.identity("id")).collect()
}

async fn file_tree() -> Hierarchy {
    let mut store = Hierarchy::new(HierarchyConfig::default());
    store
        .load(&LoadOptions::from_data(vec![
            json!({"id": "root", "name": "Root"}),
            json!({"id": "docs", "name": "Docs", "parent": "root"}),
            json!({"id": "src", "name": "Src", "parent": "root"}),
            json!({"id": "a", "name": "a.txt", "parent": "docs"}),
            json!({"id": "b", "name": "b.txt", "parent": "docs"}),
        ]))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn identity_is_unique_across_the_store() {
    let mut store = file_tree().await;
    let err = store
        .add(obj(json!({"id": "docs", "parent": "root"})), &PutOptions::default())
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateIdentity(id) if id == "docs"));

    let opts = PutOptions { overwrite: Some(false), ..Default::default() };
    let err = store.put(obj(json!({"id": "docs"})), &opts).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateIdentity(_)));
}

#[tokio::test]
async fn child_index_and_parent_references_agree() {
    let mut store = file_tree().await;
    // shake the tree a little before checking
    store
        .put(obj(json!({"id": "b", "name": "b.txt", "parent": "src"})), &PutOptions::default())
        .unwrap();
    store
        .put(obj(json!({"id": "c", "name": "c.txt", "parent": "docs"})), &PutOptions::default())
        .unwrap();
    store.remove("a");

    let all = store.query(&Query::new(), &QueryOptions::default());
    for object in &all {
        let id = object.identity("id").unwrap();
        // every parent reference is reflected in that parent's child list
        for parent in object.parent_ids("parent") {
            let children = ids(&store.get_children(&parent, &QueryOptions::default()));
            assert!(children.contains(&id), "{parent} does not list {id}");
        }
        // every listed child references this object as a parent
        for child in store.get_children(&id, &QueryOptions::default()) {
            assert!(
                child.parent_ids("parent").contains(&id),
                "{:?} does not reference {id}",
                child.identity("id")
            );
        }
    }
}

#[tokio::test]
async fn natural_order_controls_sibling_placement() {
    let mut store = file_tree().await;
    let mut opts = PutOptions::before("b");
    opts.parent = Some(vec!["docs".to_owned()]);
    store.put(obj(json!({"id": "new", "name": "new.txt"})), &opts).unwrap();
    assert_eq!(
        ids(&store.get_children("docs", &QueryOptions::default())),
        ["a", "new", "b"]
    );

    // moving an existing sibling keeps the list consistent
    let mut opts = PutOptions::before("a");
    opts.parent = Some(vec!["docs".to_owned()]);
    store.put(obj(json!({"id": "b", "name": "b.txt"})), &opts).unwrap();
    assert_eq!(
        ids(&store.get_children("docs", &QueryOptions::default())),
        ["b", "a", "new"]
    );
}

#[tokio::test]
async fn shared_children_live_under_every_parent() {
    let mut store = Hierarchy::new(HierarchyConfig {
        multi_parented: MultiParented::Auto,
        ..Default::default()
    });
    store
        .load(&LoadOptions::from_data(vec![
            json!({"id": "p1"}),
            json!({"id": "p2"}),
            json!({"id": "shared", "parent": ["p1"]}),
        ]))
        .await
        .unwrap();
    assert!(store.multi_parented());

    let shared = store.get("shared").unwrap();
    assert!(store.add_parent(&shared, &["p2".to_owned()]).unwrap());
    assert_eq!(ids(&store.get_children("p1", &QueryOptions::default())), ["shared"]);
    assert_eq!(ids(&store.get_children("p2", &QueryOptions::default())), ["shared"]);

    // detaching one parent leaves the other untouched
    let shared = store.get("shared").unwrap();
    assert!(store.remove_parent(&shared, &["p1".to_owned()]).unwrap());
    assert!(store.get_children("p1", &QueryOptions::default()).is_empty());
    assert_eq!(ids(&store.get_children("p2", &QueryOptions::default())), ["shared"]);
}

#[tokio::test]
async fn events_reflect_every_mutation() {
    let mut store = file_tree().await;
    store.take_events();

    store.put(obj(json!({"id": "x", "parent": "root"})), &PutOptions::default()).unwrap();
    store
        .put(obj(json!({"id": "x", "parent": "root", "name": "x.txt"})), &PutOptions::default())
        .unwrap();
    store.remove("x");

    let events = store.take_events();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], StoreEvent::New { id } if id == "x"));
    match &events[1] {
        StoreEvent::Change { old, new, .. } => {
            assert_eq!(old.get("name"), None);
            assert_eq!(new.get("name"), Some(&json!("x.txt")));
        }
        other => panic!("expected change, got {other:?}"),
    }
    match &events[2] {
        StoreEvent::Delete { id, object } => {
            assert_eq!(id, "x");
            assert_eq!(object.get("name"), Some(&json!("x.txt")));
        }
        other => panic!("expected delete, got {other:?}"),
    }
}

#[tokio::test]
async fn query_filters_sorts_and_paginates() {
    let store = file_tree().await;
    let hits = store.query(&Query::new().eq("parent", "docs"), &QueryOptions::default());
    assert_eq!(ids(&hits), ["a", "b"]);

    let hits = store.query(&Query::new().pattern("name", "*.txt"), &QueryOptions::default());
    assert_eq!(hits.len(), 2);

    let options = QueryOptions {
        sort: vec![cbstore::SortSpec::descending("name")],
        start: 0,
        count: Some(1),
    };
    let hits = store.query(&Query::new().pattern("name", "*.txt"), &options);
    assert_eq!(ids(&hits), ["b"]);
}

#[tokio::test]
async fn close_and_reload_cycle() {
    let mut store = file_tree().await;
    assert!(matches!(
        store.load(&LoadOptions::from_data(vec![])).await,
        Err(StoreError::Access(_))
    ));

    store.close(Some(true));
    assert_eq!(store.total(), 0);

    store
        .load(&LoadOptions::from_data(vec![
            json!({"id": "solo"}),
        ]))
        .await
        .unwrap();
    assert_eq!(store.total(), 1);
    assert!(store.get("solo").is_some());
}
