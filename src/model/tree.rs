//! Store-to-tree adaptation: root resolution, per-parent children cache,
//! store-event translation and mediated mutation.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{ModelConfig, TreeEvent, FOREST_ROOT_ID};
use crate::object::{Id, StoreObject};
use crate::query::QueryOptions;
use crate::store::hierarchy::Hierarchy;
use crate::store::{LoadOptions, ObjectStore, StoreEvent, StoreState};

/// Presents a [`Hierarchy`] store as a tree. All mutation flows through
/// the model so observers stay consistent; store events queued during a
/// mutation are drained only after the store call returns.
pub struct TreeModel {
    pub(crate) store: Hierarchy,
    pub(crate) cfg: ModelConfig,
    pub(crate) root_id: Option<Id>,
    pub(crate) forest_root: Option<StoreObject>,
    children_cache: HashMap<Id, Vec<Id>>,
    observers: Vec<Box<dyn Fn(&TreeEvent) + Send + Sync>>,
    pub(crate) validating: usize,
    pub(crate) validated: bool,
}

impl TreeModel {
    pub fn new(store: Hierarchy, cfg: ModelConfig) -> Self {
        let (root_id, forest_root) = if cfg.forest {
            let mut root = StoreObject::new();
            root.set(store.base.config().id_property.as_str(), FOREST_ROOT_ID);
            root.set(
                cfg.label_attr.as_str(),
                cfg.root_label.clone().unwrap_or_else(|| "ROOT".to_owned()),
            );
            (Some(FOREST_ROOT_ID.to_owned()), Some(root))
        } else {
            (None, None)
        };
        TreeModel {
            store,
            cfg,
            root_id,
            forest_root,
            children_cache: HashMap::new(),
            observers: Vec::new(),
            validating: 0,
            validated: false,
        }
    }

    pub fn observe(&mut self, observer: impl Fn(&TreeEvent) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub(crate) fn notify(&self, event: &TreeEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }

    /// Load the store if needed, resolve the root and run validation.
    pub async fn ready(&mut self, options: &LoadOptions) -> Result<()> {
        if self.store.state() != StoreState::Active {
            self.store.load(options).await?;
        }
        self.resolve_root()?;
        self.validate();
        Ok(())
    }

    fn resolve_root(&mut self) -> Result<()> {
        if self.cfg.forest {
            return Ok(());
        }
        let hits = self.store.query(&self.cfg.query, &QueryOptions::default());
        match &hits[..] {
            [root] => {
                self.root_id = self.store.identity_of(root);
                debug!(root = ?self.root_id, "root resolved");
                Ok(())
            }
            _ => Err(StoreError::InvalidResponse(format!(
                "root query matched {} objects, expected exactly 1",
                hits.len()
            ))),
        }
    }

    pub fn root_id(&self) -> Option<&Id> {
        self.root_id.as_ref()
    }

    pub fn root(&self) -> Option<StoreObject> {
        if self.cfg.forest {
            self.forest_root.clone()
        } else {
            self.root_id.as_ref().and_then(|id| self.store.get(id))
        }
    }

    pub(crate) fn is_forest_root(&self, id: &str) -> bool {
        self.cfg.forest && id == FOREST_ROOT_ID
    }

    pub fn get(&self, id: &str) -> Option<StoreObject> {
        if self.is_forest_root(id) {
            self.forest_root.clone()
        } else {
            self.store.get(id)
        }
    }

    /// Child ids of an object, cached per parent until an event touches it.
    pub fn children(&mut self, parent_id: &str) -> Vec<Id> {
        if let Some(ids) = self.children_cache.get(parent_id) {
            return ids.clone();
        }
        let ids = self.compute_children(parent_id);
        self.children_cache.insert(parent_id.to_owned(), ids.clone());
        ids
    }

    fn compute_children(&self, parent_id: &str) -> Vec<Id> {
        let objects = if self.is_forest_root(parent_id) {
            self.store.query(&self.cfg.query, &QueryOptions::default())
        } else {
            self.store.get_children(parent_id, &QueryOptions::default())
        };
        objects.iter().filter_map(|o| self.store.identity_of(o)).collect()
    }

    pub fn may_have_children(&mut self, id: &str) -> bool {
        if self.is_forest_root(id) {
            return true;
        }
        if let Some(ids) = self.children_cache.get(id) {
            return !ids.is_empty();
        }
        self.store.has_children(id)
    }

    /// Display label; the root honors the configured override.
    pub fn label(&self, id: &str) -> Option<String> {
        if self.root_id.as_deref() == Some(id) {
            if let Some(label) = &self.cfg.root_label {
                return Some(label.clone());
            }
        }
        self.get(id)?
            .get(&self.cfg.label_attr)
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// Run a mutation against the store, then dispatch the events it
    /// queued.
    pub fn update<R>(&mut self, mutation: impl FnOnce(&mut Hierarchy) -> R) -> R {
        let result = mutation(&mut self.store);
        self.pump();
        result
    }

    /// Write one property and dispatch.
    pub fn set_value(&mut self, id: &str, property: &str, value: Value) -> Result<bool> {
        let changed = self.set_value_raw(id, property, value)?;
        self.pump();
        Ok(changed)
    }

    /// Write one property without dispatching; events stay queued. The
    /// synthetic forest root is not store-backed, so it is updated and
    /// announced directly.
    pub(crate) fn set_value_raw(
        &mut self,
        id: &str,
        property: &str,
        value: Value,
    ) -> Result<bool> {
        if self.is_forest_root(id) {
            let root = match self.forest_root.as_mut() {
                Some(root) => root,
                None => return Err(StoreError::NotFound(id.to_owned())),
            };
            if root.get(property) == Some(&value) {
                return Ok(false);
            }
            root.set(property, value);
            self.notify(&TreeEvent::Change { id: id.to_owned(), property: property.to_owned() });
            return Ok(true);
        }
        let mut object =
            self.store.get(id).ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        if object.get(property) == Some(&value) {
            return Ok(false);
        }
        object.set(property, value);
        self.store.put(object, &Default::default())?;
        Ok(true)
    }

    /// Delete an object, optionally its whole subtree (children first).
    pub fn delete_item(&mut self, id: &str, recursive: bool) -> Result<bool> {
        if self.is_forest_root(id) {
            return Err(StoreError::Access("the synthetic root cannot be deleted".to_owned()));
        }
        let removed = self.delete_raw(id, recursive);
        self.pump();
        if self.root_id.as_deref() == Some(id) {
            self.root_id = None;
        }
        Ok(removed)
    }

    fn delete_raw(&mut self, id: &str, recursive: bool) -> bool {
        if recursive {
            for child in self.compute_children(id) {
                self.delete_raw(&child, true);
            }
        }
        self.store.remove(id)
    }

    /// Close the underlying store and drop all model state.
    pub fn close(&mut self, clear: Option<bool>) {
        self.store.close(clear);
        self.children_cache.clear();
        if !self.cfg.forest {
            self.root_id = None;
        }
        self.validated = false;
        self.notify(&TreeEvent::Reset);
    }

    /// Drain and dispatch store events until the queue is empty. Handlers
    /// may write back to the store; their events are picked up by the next
    /// round.
    pub(crate) fn pump(&mut self) {
        loop {
            let events = self.store.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.handle_store_event(event);
            }
        }
    }

    fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::New { id } => {
                let object = self.store.get(&id);
                self.notify(&TreeEvent::NewItem { id: id.clone() });
                if let Some(object) = &object {
                    for parent in object.parent_ids(self.store.parent_property()) {
                        self.children_changed(&parent);
                    }
                    if self.cfg.forest && self.cfg.query.matches(object) {
                        self.children_changed(FOREST_ROOT_ID);
                    }
                }
            }
            StoreEvent::Delete { id, object } => {
                self.children_cache.remove(&id);
                self.notify(&TreeEvent::DeleteItem { id: id.clone() });
                for parent in object.parent_ids(self.store.parent_property()) {
                    self.children_changed(&parent);
                }
                if self.cfg.forest && self.cfg.query.matches(&object) {
                    self.children_changed(FOREST_ROOT_ID);
                }
            }
            StoreEvent::Reorder { parent } => self.children_changed(&parent),
            StoreEvent::Change { id, old, new } => {
                let mut properties: Vec<String> = Vec::new();
                for key in old.fields().keys().chain(new.fields().keys()) {
                    if !properties.iter().any(|p| p == key) && old.get(key) != new.get(key) {
                        properties.push(key.clone());
                    }
                }
                for property in properties {
                    self.property_changed(&id, &property, &old, &new);
                }
            }
        }
    }

    /// A parent-reference change recomputes exactly the affected parents'
    /// child lists; any other change is announced as-is, with checked
    /// changes additionally propagated upward.
    fn property_changed(&mut self, id: &str, property: &str, old: &StoreObject, new: &StoreObject) {
        if property == self.store.parent_property() {
            let before: HashSet<Id> =
                old.parent_ids(self.store.parent_property()).into_iter().collect();
            let after: HashSet<Id> =
                new.parent_ids(self.store.parent_property()).into_iter().collect();
            for parent in before.symmetric_difference(&after) {
                self.children_changed(&parent.clone());
            }
            if self.cfg.forest && self.cfg.query.matches(old) != self.cfg.query.matches(new) {
                self.children_changed(FOREST_ROOT_ID);
            }
            return;
        }
        self.notify(&TreeEvent::Change { id: id.to_owned(), property: property.to_owned() });
        if property == self.cfg.checked_attr && self.cfg.checked_strict {
            self.update_checked_parent(id, false);
        }
    }

    /// Invalidate and re-announce one parent's child list. In strict mode
    /// the parent's own state is recomputed from the surviving children, or
    /// renormalized when the last child went away.
    pub(crate) fn children_changed(&mut self, parent_id: &str) {
        self.children_cache.remove(parent_id);
        let children = self.children(parent_id);
        self.notify(&TreeEvent::ChildrenChange {
            parent: parent_id.to_owned(),
            children: children.clone(),
        });
        if self.cfg.checked_strict {
            match children.first() {
                Some(first) => {
                    let first = first.clone();
                    self.update_checked_parent(&first, true);
                }
                None => {
                    if let Some(current) = self.get_checked(parent_id) {
                        self.set_checked_internal(parent_id, current);
                    }
                }
            }
        }
    }
}
