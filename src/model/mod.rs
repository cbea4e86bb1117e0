//! Tree models over the hierarchy store: store-to-tree adaptation and the
//! tri-state checked engine.

pub mod checked;
pub mod tree;

use crate::object::{CheckedState, Id};
use crate::query::Query;

/// Identity of the synthetic root fabricated in forest mode.
pub const FOREST_ROOT_ID: &str = "$root$";

/// Construction-time settings for [`tree::TreeModel`].
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Root query. In forest mode it selects the top-level objects; in
    /// single-root mode it must resolve exactly one object.
    pub query: Query,
    /// Property used for display labels.
    pub label_attr: String,
    /// Label override for the root.
    pub root_label: Option<String>,
    /// Fabricate a synthetic root over the query results.
    pub forest: bool,
    /// Give every object a checkbox, writing the default state on first
    /// read.
    pub checked_all: bool,
    /// Property holding the checked state.
    pub checked_attr: String,
    /// Whether the root itself carries a checkbox.
    pub checked_root: bool,
    /// Default state written when `checked_all` materializes a checkbox.
    pub checked_state: CheckedState,
    /// Keep parent states consistent with their children.
    pub checked_strict: bool,
    /// Allow the mixed state; otherwise mixed collapses to checked.
    pub multi_state: bool,
    /// Collapse mixed to checked on childless objects.
    pub normalize: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            query: Query::new(),
            label_attr: "name".to_owned(),
            root_label: None,
            forest: false,
            checked_all: true,
            checked_attr: "checked".to_owned(),
            checked_root: false,
            checked_state: CheckedState::Unchecked,
            checked_strict: true,
            multi_state: true,
            normalize: true,
        }
    }
}

/// Notification delivered to model observers.
#[derive(Debug, Clone)]
pub enum TreeEvent {
    NewItem { id: Id },
    DeleteItem { id: Id },
    /// A non-structural property changed.
    Change { id: Id, property: String },
    /// A parent's child list changed; carries the new list.
    ChildrenChange { parent: Id, children: Vec<Id> },
    /// Startup validation finished; fired exactly once per validation run.
    DataValidated,
    /// The underlying store was closed and the model state dropped.
    Reset,
}
