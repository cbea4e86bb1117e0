//! Hierarchy layer: parent/child indexing over the natural-order store,
//! multi-parent support and incremental re-indexing on every write.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::object::{Id, StoreObject};
use crate::query::{apply_options, Query, QueryOptions};
use crate::store::memory::MemoryConfig;
use crate::store::natural::Natural;
use crate::store::{LoadOptions, ObjectStore, PutOptions, StoreEvent, StoreState};

/// Whether objects may reference more than one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiParented {
    Yes,
    No,
    /// Resolved from the shape of the data: an array-valued parent
    /// reference anywhere switches the store to multi-parent mode.
    Auto,
}

/// Construction-time settings for [`Hierarchy`].
#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    pub base: MemoryConfig,
    /// Property holding an object's parent reference(s).
    pub parent_property: String,
    pub multi_parented: MultiParented,
    /// Maintain the child index; without it `get_children` falls back to a
    /// linear query.
    pub index_children: bool,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        HierarchyConfig {
            base: MemoryConfig::default(),
            parent_property: "parent".to_owned(),
            multi_parented: MultiParented::Auto,
            index_children: true,
        }
    }
}

/// [`Natural`] plus parent/child bookkeeping.
pub struct Hierarchy {
    pub(crate) base: Natural,
    parent_property: String,
    multi: bool,
    multi_resolved: bool,
    index_children: bool,
    /// parent id -> ordered child ids.
    child_index: HashMap<Id, Vec<Id>>,
    /// child id -> parent ids as last indexed, for diffing on rewrite.
    parent_index: HashMap<Id, Vec<Id>>,
}

impl Hierarchy {
    pub fn new(cfg: HierarchyConfig) -> Self {
        let (multi, multi_resolved) = match cfg.multi_parented {
            MultiParented::Yes => (true, true),
            MultiParented::No => (false, true),
            MultiParented::Auto => (false, false),
        };
        Hierarchy {
            base: Natural::new(cfg.base),
            parent_property: cfg.parent_property,
            multi,
            multi_resolved,
            index_children: cfg.index_children,
            child_index: HashMap::new(),
            parent_index: HashMap::new(),
        }
    }

    pub fn parent_property(&self) -> &str {
        &self.parent_property
    }

    pub fn multi_parented(&self) -> bool {
        self.multi
    }

    pub fn is_item(&self, object: &StoreObject) -> bool {
        self.base.is_item(object)
    }

    pub fn add(&mut self, object: StoreObject, options: &PutOptions) -> Result<Id> {
        self.write(object, options, true)
    }

    pub fn put(&mut self, object: StoreObject, options: &PutOptions) -> Result<Id> {
        self.write(object, options, false)
    }

    fn write(&mut self, mut object: StoreObject, options: &PutOptions, add: bool) -> Result<Id> {
        let id = self.base.base.object_id(&object, options)?;
        if let Some(parents) = &options.parent {
            let parents = self.sanitize_parents(parents, &id);
            object.set(&self.parent_property, self.parent_value(&parents));
        } else if let Some(value) = object.get(&self.parent_property).cloned() {
            let parents = self.sanitize_value(&value, &id);
            object.set(&self.parent_property, self.parent_value(&parents));
        }
        let options = PutOptions { id: Some(id.clone()), ..options.clone() };
        if add {
            self.base.add(object, &options)?;
        } else {
            self.base.put(object, &options)?;
        }
        self.update_hierarchy(&id, options.before.as_deref());
        Ok(id)
    }

    /// Drop duplicates and self-references; resolve auto multi-parent mode
    /// from the shape of the first reference seen.
    fn sanitize_parents(&mut self, parents: &[Id], own_id: &str) -> Vec<Id> {
        if !self.multi_resolved && parents.len() > 1 {
            self.multi = true;
            self.multi_resolved = true;
        }
        let mut seen = HashSet::new();
        parents
            .iter()
            .filter(|p| p.as_str() != own_id && seen.insert((*p).clone()))
            .cloned()
            .collect()
    }

    fn sanitize_value(&mut self, value: &Value, own_id: &str) -> Vec<Id> {
        if !self.multi_resolved && value.is_array() {
            self.multi = true;
            self.multi_resolved = true;
        }
        let probe = StoreObject::from({
            let mut m = serde_json::Map::new();
            m.insert(self.parent_property.clone(), value.clone());
            m
        });
        let ids = probe.parent_ids(&self.parent_property);
        self.sanitize_parents(&ids, own_id)
    }

    /// Encode a parent set for storage: an array in multi-parent mode, a
    /// scalar (first reference wins) otherwise.
    fn parent_value(&self, parents: &[Id]) -> Value {
        if self.multi {
            Value::Array(parents.iter().map(|p| Value::String(p.clone())).collect())
        } else {
            match parents.first() {
                Some(p) => Value::String(p.clone()),
                None => Value::Null,
            }
        }
    }

    /// Re-index one object after a write: detach from dropped parents,
    /// attach to gained ones, honoring a natural-order anchor.
    fn update_hierarchy(&mut self, id: &str, before: Option<&str>) {
        if !self.index_children {
            return;
        }
        let new_parents = match self.base.get(id) {
            Some(object) => object.parent_ids(&self.parent_property),
            None => Vec::new(),
        };
        let old_parents = self.parent_index.get(id).cloned().unwrap_or_default();
        let old_set: HashSet<&Id> = old_parents.iter().collect();
        let new_set: HashSet<&Id> = new_parents.iter().collect();

        for parent in old_parents.iter().filter(|p| !new_set.contains(*p)) {
            self.detach_child(parent, id);
        }
        let changed = old_set != new_set;
        for parent in &new_parents {
            if changed || before.is_some() {
                let moved = self.insert_child(parent, id, before);
                // a pure reposition leaves every property untouched, so the
                // change event alone would not reach the parent's observers
                if moved && !changed {
                    self.base
                        .base
                        .events
                        .push_back(StoreEvent::Reorder { parent: parent.clone() });
                }
            }
        }
        if new_parents.is_empty() {
            self.parent_index.remove(id);
        } else {
            self.parent_index.insert(id.to_owned(), new_parents);
        }
    }

    fn detach_child(&mut self, parent: &str, child: &str) {
        if let Some(children) = self.child_index.get_mut(parent) {
            children.retain(|c| c != child);
            if children.is_empty() {
                self.child_index.remove(parent);
            }
        }
    }

    /// Returns true when the child's position in the list changed.
    fn insert_child(&mut self, parent: &str, child: &str, before: Option<&str>) -> bool {
        let children = self.child_index.entry(parent.to_owned()).or_default();
        let at = children.iter().position(|c| c == child);
        match before.and_then(|b| children.iter().position(|c| c == b)) {
            Some(mut anchor) => {
                if let Some(at) = at {
                    children.remove(at);
                    if at < anchor {
                        anchor -= 1;
                    }
                }
                children.insert(anchor, child.to_owned());
                at != Some(anchor)
            }
            None => {
                if at.is_none() {
                    children.push(child.to_owned());
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Children of a parent, in child-index order when indexed.
    pub fn get_children(&self, parent_id: &str, options: &QueryOptions) -> Vec<StoreObject> {
        if self.index_children {
            let children = match self.child_index.get(parent_id) {
                Some(children) => children,
                None => return Vec::new(),
            };
            let objects = children.iter().filter_map(|id| self.base.get(id)).collect();
            apply_options(objects, options)
        } else {
            self.base
                .query(&Query::new().eq(&self.parent_property, parent_id), options)
        }
    }

    /// Resolvable parents of an object; dangling references are skipped.
    pub fn get_parents(&self, child: &StoreObject) -> Vec<StoreObject> {
        child
            .parent_ids(&self.parent_property)
            .iter()
            .filter_map(|id| self.base.get(id))
            .collect()
    }

    /// True when every parent reference of the object resolves.
    pub fn valid_parents(&self, child: &StoreObject) -> bool {
        child
            .parent_ids(&self.parent_property)
            .iter()
            .all(|id| self.base.get(id).is_some())
    }

    pub fn has_children(&self, parent_id: &str) -> bool {
        if self.index_children {
            self.child_index.get(parent_id).map_or(false, |c| !c.is_empty())
        } else {
            !self
                .base
                .query(&Query::new().eq(&self.parent_property, parent_id), &QueryOptions::default())
                .is_empty()
        }
    }

    /// Attach additional parents to an object. Missing references are
    /// prepended; the write flows through `put` so it is observable.
    /// Returns false when nothing changed.
    pub fn add_parent(&mut self, child: &StoreObject, parents: &[Id]) -> Result<bool> {
        let id = self
            .base
            .identity_of(child)
            .ok_or_else(|| StoreError::InvalidObject("object has no identity".to_owned()))?;
        let mut object = self
            .base
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let current = object.parent_ids(&self.parent_property);
        let additions = self.sanitize_parents(parents, &id);
        let mut updated = current.clone();
        for parent in additions.iter().rev() {
            if !updated.contains(parent) {
                updated.insert(0, parent.clone());
            }
        }
        if updated == current {
            return Ok(false);
        }
        if !self.multi && updated.len() > 1 {
            warn!(id = %id, "single-parent store, extra parent references dropped");
            updated.truncate(1);
            if updated == current {
                return Ok(false);
            }
        }
        object.set(&self.parent_property, self.parent_value(&updated));
        self.put(object, &PutOptions::default())?;
        Ok(true)
    }

    /// Detach parents from an object. Observable through `put`. Returns
    /// false when nothing changed.
    pub fn remove_parent(&mut self, child: &StoreObject, parents: &[Id]) -> Result<bool> {
        let id = self
            .base
            .identity_of(child)
            .ok_or_else(|| StoreError::InvalidObject("object has no identity".to_owned()))?;
        let mut object = self
            .base
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let current = object.parent_ids(&self.parent_property);
        let drop: HashSet<&Id> = parents.iter().collect();
        let updated: Vec<Id> = current.iter().filter(|p| !drop.contains(*p)).cloned().collect();
        if updated == current {
            return Ok(false);
        }
        object.set(&self.parent_property, self.parent_value(&updated));
        self.put(object, &PutOptions::default())?;
        Ok(true)
    }

    /// Delete an object, detaching it from its parents' child lists. Its
    /// own child list is kept so re-adding the object restores the
    /// subtree's reachability.
    pub fn remove(&mut self, id: &str) -> bool {
        if self.index_children {
            if let Some(parents) = self.parent_index.remove(id) {
                for parent in parents {
                    self.detach_child(&parent, id);
                }
            }
        }
        self.base.remove(id)
    }

    /// Load the store, then resolve multi-parent mode from the data shape
    /// and rebuild both indexes.
    pub async fn load(&mut self, options: &LoadOptions) -> Result<()> {
        self.child_index.clear();
        self.parent_index.clear();
        self.base.load(options).await?;
        if !self.multi_resolved {
            self.multi = self
                .base
                .base
                .data
                .iter()
                .any(|o| o.get(&self.parent_property).map_or(false, Value::is_array));
            self.multi_resolved = true;
        }
        let ids: Vec<Id> = self
            .base
            .base
            .data
            .iter()
            .filter_map(|o| self.base.identity_of(o))
            .collect();
        for id in &ids {
            if let Some(at) = self.base.base.position(id) {
                let value = self.base.base.data[at].get(&self.parent_property).cloned();
                if let Some(value) = value {
                    let parents = self.sanitize_value(&value, id);
                    let encoded = self.parent_value(&parents);
                    self.base.base.data[at].set(&self.parent_property, encoded);
                }
            }
            self.update_hierarchy(id, None);
        }
        Ok(())
    }

    pub fn close(&mut self, clear: Option<bool>) {
        if clear.unwrap_or(self.base.config().clear_on_close) {
            self.child_index.clear();
            self.parent_index.clear();
            self.base.close(Some(true));
        } else {
            self.base.close(clear);
        }
    }
}

impl ObjectStore for Hierarchy {
    fn get(&self, id: &str) -> Option<StoreObject> {
        self.base.get(id)
    }

    fn identity_of(&self, object: &StoreObject) -> Option<Id> {
        self.base.identity_of(object)
    }

    fn total(&self) -> usize {
        self.base.total()
    }

    fn state(&self) -> StoreState {
        self.base.state()
    }

    fn query(&self, query: &Query, options: &QueryOptions) -> Vec<StoreObject> {
        self.base.query(query, options)
    }

    fn take_events(&mut self) -> Vec<StoreEvent> {
        self.base.take_events()
    }
}
