//! Integration tests for the tree model and the checked-state engine.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use cbstore::model::tree::TreeModel;
use cbstore::model::{ModelConfig, TreeEvent, FOREST_ROOT_ID};
use cbstore::store::hierarchy::{Hierarchy, HierarchyConfig};
use cbstore::store::{LoadOptions, PutOptions};
use cbstore::{CheckedState, Query, StoreError, StoreObject};

type EventLog = Arc<Mutex<Vec<TreeEvent>>>;

fn recording(model: &mut TreeModel) -> EventLog {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    model.observe(move |event| sink.lock().push(event.clone()));
    log
}

fn checked_changes(log: &EventLog) -> usize {
    log.lock()
        .iter()
        .filter(|e| matches!(e, TreeEvent::Change { property, .. } if property == "checked"))
        .count()
}

fn tree_data() -> Vec<Value> {
    vec![
        json!({"id": "root", "name": "Root"}),
        json!({"id": "a", "name": "A", "parent": "root"}),
        json!({"id": "b", "name": "B", "parent": "root"}),
        json!({"id": "a1", "name": "A1", "parent": "a"}),
        json!({"id": "a2", "name": "A2", "parent": "a"}),
    ]
}

fn single_root_config() -> ModelConfig {
    ModelConfig {
        query: Query::new().eq("id", "root"),
        checked_root: true,
        ..Default::default()
    }
}

async fn tree_model(data: Vec<Value>, cfg: ModelConfig) -> TreeModel {
    let store = Hierarchy::new(HierarchyConfig::default());
    let mut model = TreeModel::new(store, cfg);
    model.ready(&LoadOptions::from_data(data)).await.unwrap();
    model
}

#[tokio::test]
async fn ready_resolves_root_and_children() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    assert_eq!(model.root_id().map(String::as_str), Some("root"));
    assert_eq!(model.children("root"), ["a", "b"]);
    assert_eq!(model.children("a"), ["a1", "a2"]);
    assert!(model.may_have_children("a"));
    assert!(!model.may_have_children("a2"));
    assert_eq!(model.label("a1").as_deref(), Some("A1"));
}

#[tokio::test]
async fn root_query_must_match_exactly_one() {
    let store = Hierarchy::new(HierarchyConfig::default());
    let mut model = TreeModel::new(
        store,
        ModelConfig { query: Query::new().eq("id", "nope"), ..Default::default() },
    );
    assert!(model.ready(&LoadOptions::from_data(tree_data())).await.is_err());
}

#[tokio::test]
async fn checking_a_branch_cascades_to_descendants() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    model.set_checked("a", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked("a"), Some(CheckedState::Checked));
    assert_eq!(model.get_checked("a1"), Some(CheckedState::Checked));
    assert_eq!(model.get_checked("a2"), Some(CheckedState::Checked));
    // sibling untouched, so the root reports a mixed subtree
    assert_eq!(model.get_checked("b"), Some(CheckedState::Unchecked));
    assert_eq!(model.get_checked("root"), Some(CheckedState::Mixed));
}

#[tokio::test]
async fn checking_every_child_settles_the_ancestors() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    model.set_checked("a1", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked("a"), Some(CheckedState::Mixed));
    assert_eq!(model.get_checked("root"), Some(CheckedState::Mixed));

    model.set_checked("a2", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked("a"), Some(CheckedState::Checked));
    assert_eq!(model.get_checked("root"), Some(CheckedState::Mixed));

    model.set_checked("b", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked("root"), Some(CheckedState::Checked));
}

#[tokio::test]
async fn checking_an_unknown_id_errors() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    let err = model.set_checked("ghost", CheckedState::Checked).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn repeating_a_checked_write_is_silent() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    model.set_checked("a", CheckedState::Checked).unwrap();

    let log = recording(&mut model);
    model.set_checked("a", CheckedState::Checked).unwrap();
    assert_eq!(checked_changes(&log), 0);
}

#[tokio::test]
async fn validation_repairs_inconsistent_input() {
    let data = vec![
        json!({"id": "root", "name": "Root", "checked": false}),
        json!({"id": "a", "name": "A", "parent": "root", "checked": false}),
        json!({"id": "a1", "name": "A1", "parent": "a", "checked": true}),
        json!({"id": "a2", "name": "A2", "parent": "a", "checked": "mixed"}),
    ];
    let mut model = tree_model(data, single_root_config()).await;
    // the stray mixed leaf collapses, then the parents catch up
    assert_eq!(model.get_checked("a2"), Some(CheckedState::Checked));
    assert_eq!(model.get_checked("a"), Some(CheckedState::Checked));
    assert_eq!(model.get_checked("root"), Some(CheckedState::Checked));
}

#[tokio::test]
async fn validation_computes_mixed_parents() {
    let data = vec![
        json!({"id": "root", "name": "Root"}),
        json!({"id": "a", "name": "A", "parent": "root", "checked": true}),
        json!({"id": "b", "name": "B", "parent": "root", "checked": false}),
    ];
    let mut model = tree_model(data, single_root_config()).await;
    assert_eq!(model.get_checked("root"), Some(CheckedState::Mixed));
}

#[tokio::test]
async fn leaves_never_hold_mixed() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    model.set_checked("a1", CheckedState::Mixed).unwrap();
    assert_eq!(model.get_checked("a1"), Some(CheckedState::Checked));
}

#[tokio::test]
async fn validation_signals_completion_once() {
    let store = Hierarchy::new(HierarchyConfig::default());
    let mut model = TreeModel::new(store, single_root_config());
    let log = recording(&mut model);
    model.ready(&LoadOptions::from_data(tree_data())).await.unwrap();
    let validated = log
        .lock()
        .iter()
        .filter(|e| matches!(e, TreeEvent::DataValidated))
        .count();
    assert_eq!(validated, 1);
}

#[tokio::test]
async fn new_items_reopen_settled_branches() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    model.set_checked("root", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked("a"), Some(CheckedState::Checked));

    let log = recording(&mut model);
    model.update(|store| {
        store
            .put(
                StoreObject::from_value(json!({"id": "a3", "name": "A3", "parent": "a"}))
                    .unwrap(),
                &PutOptions::default(),
            )
            .unwrap();
    });
    assert_eq!(model.children("a"), ["a1", "a2", "a3"]);
    // the unchecked newcomer drags its ancestors back to mixed
    assert_eq!(model.get_checked("a"), Some(CheckedState::Mixed));
    assert_eq!(model.get_checked("root"), Some(CheckedState::Mixed));
    assert!(log.lock().iter().any(|e| matches!(e, TreeEvent::NewItem { id } if id == "a3")));
    assert!(log.lock().iter().any(
        |e| matches!(e, TreeEvent::ChildrenChange { parent, .. } if parent == "a")
    ));
}

#[tokio::test]
async fn reparenting_updates_both_child_lists() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    let log = recording(&mut model);
    model.update(|store| {
        store
            .put(
                StoreObject::from_value(json!({"id": "b", "name": "B", "parent": "a"})).unwrap(),
                &PutOptions::default(),
            )
            .unwrap();
    });
    assert_eq!(model.children("root"), ["a"]);
    assert_eq!(model.children("a"), ["a1", "a2", "b"]);
    let touched: Vec<String> = log
        .lock()
        .iter()
        .filter_map(|e| match e {
            TreeEvent::ChildrenChange { parent, .. } => Some(parent.clone()),
            _ => None,
        })
        .collect();
    assert!(touched.iter().any(|p| p == "root"));
    assert!(touched.iter().any(|p| p == "a"));
}

#[tokio::test]
async fn reordering_siblings_refreshes_child_lists() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    assert_eq!(model.children("root"), ["a", "b"]);

    let log = recording(&mut model);
    model.update(|store| {
        let mut opts = PutOptions::before("a");
        opts.parent = Some(vec!["root".to_owned()]);
        store
            .put(StoreObject::from_value(json!({"id": "b", "name": "B"})).unwrap(), &opts)
            .unwrap();
    });
    assert_eq!(model.children("root"), ["b", "a"]);
    assert!(log.lock().iter().any(|e| matches!(
        e,
        TreeEvent::ChildrenChange { parent, children } if parent == "root" && *children == ["b", "a"]
    )));
}

#[tokio::test]
async fn recursive_delete_removes_the_subtree() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    let log = recording(&mut model);
    assert!(model.delete_item("a", true).unwrap());
    assert_eq!(model.children("root"), ["b"]);
    assert!(model.get("a").is_none());
    assert!(model.get("a1").is_none());
    let deleted = log
        .lock()
        .iter()
        .filter(|e| matches!(e, TreeEvent::DeleteItem { .. }))
        .count();
    assert_eq!(deleted, 3);
}

#[tokio::test]
async fn label_changes_are_announced() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    let log = recording(&mut model);
    assert!(model.set_value("a1", "name", json!("renamed")).unwrap());
    assert_eq!(model.label("a1").as_deref(), Some("renamed"));
    assert!(log.lock().iter().any(
        |e| matches!(e, TreeEvent::Change { id, property } if id == "a1" && property == "name")
    ));
    // writing the same value again changes nothing
    assert!(!model.set_value("a1", "name", json!("renamed")).unwrap());
}

#[tokio::test]
async fn forest_mode_fabricates_a_root_over_the_query() {
    let data = vec![
        json!({"id": "t1", "name": "T1", "top": true}),
        json!({"id": "t2", "name": "T2", "top": true}),
        json!({"id": "c1", "name": "C1", "parent": "t1"}),
    ];
    let cfg = ModelConfig {
        query: Query::new().eq("top", true),
        forest: true,
        root_label: Some("Everything".to_owned()),
        ..Default::default()
    };
    let mut model = tree_model(data, cfg).await;
    assert_eq!(model.root_id().map(String::as_str), Some(FOREST_ROOT_ID));
    assert_eq!(model.label(FOREST_ROOT_ID).as_deref(), Some("Everything"));
    assert_eq!(model.children(FOREST_ROOT_ID), ["t1", "t2"]);
    assert!(model.may_have_children(FOREST_ROOT_ID));

    let log = recording(&mut model);
    model.update(|store| {
        store
            .put(
                StoreObject::from_value(json!({"id": "t3", "name": "T3", "top": true})).unwrap(),
                &PutOptions::default(),
            )
            .unwrap();
    });
    assert_eq!(model.children(FOREST_ROOT_ID), ["t1", "t2", "t3"]);
    assert!(log.lock().iter().any(|e| matches!(
        e,
        TreeEvent::ChildrenChange { parent, .. } if parent == FOREST_ROOT_ID
    )));
}

#[tokio::test]
async fn forest_children_roll_up_into_the_synthetic_root() {
    let data = vec![
        json!({"id": "t1", "name": "T1", "top": true}),
        json!({"id": "t2", "name": "T2", "top": true}),
    ];
    let cfg = ModelConfig {
        query: Query::new().eq("top", true),
        forest: true,
        checked_root: true,
        ..Default::default()
    };
    let mut model = tree_model(data, cfg).await;
    model.set_checked("t1", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked(FOREST_ROOT_ID), Some(CheckedState::Mixed));
    model.set_checked("t2", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked(FOREST_ROOT_ID), Some(CheckedState::Checked));
}

#[tokio::test]
async fn two_state_mode_never_reports_mixed() {
    let cfg = ModelConfig { multi_state: false, ..single_root_config() };
    let mut model = tree_model(tree_data(), cfg).await;
    model.set_checked("a1", CheckedState::Checked).unwrap();
    // a mixed composite collapses to checked in two-state mode
    assert_eq!(model.get_checked("a"), Some(CheckedState::Checked));
}

#[tokio::test]
async fn non_strict_mode_leaves_relatives_alone() {
    let cfg = ModelConfig { checked_strict: false, ..single_root_config() };
    let mut model = tree_model(tree_data(), cfg).await;
    model.set_checked("a", CheckedState::Checked).unwrap();
    assert_eq!(model.get_checked("a"), Some(CheckedState::Checked));
    assert_eq!(model.get_checked("a1"), Some(CheckedState::Unchecked));
    assert_eq!(model.get_checked("root"), Some(CheckedState::Unchecked));
}

#[tokio::test]
async fn hidden_root_checkbox() {
    let cfg = ModelConfig { checked_root: false, ..single_root_config() };
    let mut model = tree_model(tree_data(), cfg).await;
    assert_eq!(model.get_checked("root"), None);
    assert_eq!(model.get_checked("a"), Some(CheckedState::Unchecked));
}

#[tokio::test]
async fn close_resets_the_model() {
    let mut model = tree_model(tree_data(), single_root_config()).await;
    let log = recording(&mut model);
    model.close(Some(true));
    assert!(model.root_id().is_none());
    assert!(log.lock().iter().any(|e| matches!(e, TreeEvent::Reset)));
}
