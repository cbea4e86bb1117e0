//! Indexed in-memory store: ordered object list with an id index, CRUD with
//! duplicate-identity enforcement, and an async load path.

use std::collections::HashMap;
use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::object::{Id, StoreObject};
use crate::query::{apply_options, Query, QueryOptions};
use crate::store::{
    DataHandler, JsonHandler, LoadOptions, ObjectStore, PutOptions, StoreEvent, StoreState,
};

/// Construction-time settings for [`Memory`].
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Property holding an object's identity.
    pub id_property: String,
    /// Reject objects without an identity instead of synthesizing one.
    pub require_identity: bool,
    /// Properties applied to newly added objects that lack them.
    pub default_properties: serde_json::Map<String, Value>,
    /// Whether `close(None)` discards the dataset.
    pub clear_on_close: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            id_property: "id".to_owned(),
            require_identity: false,
            default_properties: serde_json::Map::new(),
            clear_on_close: false,
        }
    }
}

/// The base store. Objects keep insertion order; the index maps identity to
/// position.
pub struct Memory {
    pub(crate) cfg: MemoryConfig,
    pub(crate) data: Vec<StoreObject>,
    pub(crate) index: HashMap<Id, usize>,
    pub(crate) state: StoreState,
    pub(crate) events: VecDeque<StoreEvent>,
}

impl Memory {
    pub fn new(cfg: MemoryConfig) -> Self {
        Memory {
            cfg,
            data: Vec::new(),
            index: HashMap::new(),
            state: StoreState::WaitOnLoad,
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.cfg
    }

    /// Position of an object in insertion order.
    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn get_ref(&self, id: &str) -> Option<&StoreObject> {
        self.position(id).map(|at| &self.data[at])
    }

    /// True if the object is the store's current record for its identity.
    pub fn is_item(&self, object: &StoreObject) -> bool {
        match object.identity(&self.cfg.id_property) {
            Some(id) => self.get_ref(&id).map_or(false, |held| held == object),
            None => false,
        }
    }

    /// Resolve the identity for a write: explicit option, then the object's
    /// own field, then a synthesized random id unless identity is required.
    pub(crate) fn object_id(&self, object: &StoreObject, options: &PutOptions) -> Result<Id> {
        if let Some(id) = &options.id {
            return Ok(id.clone());
        }
        if let Some(id) = object.identity(&self.cfg.id_property) {
            return Ok(id);
        }
        if self.cfg.require_identity {
            return Err(StoreError::InvalidObject(format!(
                "object has no [{}] property",
                self.cfg.id_property
            )));
        }
        Ok(format!("{:x}", rand::random::<u64>()))
    }

    /// Insert a new object. Fails if the identity is already taken.
    pub fn add(&mut self, object: StoreObject, options: &PutOptions) -> Result<Id> {
        let id = self.object_id(&object, options)?;
        if self.index.contains_key(&id) {
            return Err(StoreError::DuplicateIdentity(id));
        }
        self.write_object(id.clone(), object, None);
        Ok(id)
    }

    /// Insert or replace. `overwrite: Some(false)` turns replacement into a
    /// duplicate-identity error.
    pub fn put(&mut self, object: StoreObject, options: &PutOptions) -> Result<Id> {
        let id = self.object_id(&object, options)?;
        let at = self.position(&id);
        if at.is_some() && options.overwrite == Some(false) {
            return Err(StoreError::DuplicateIdentity(id));
        }
        self.write_object(id.clone(), object, at);
        Ok(id)
    }

    /// Append or replace in place, applying defaults and recording the
    /// mutation event.
    pub(crate) fn write_object(&mut self, id: Id, mut object: StoreObject, at: Option<usize>) {
        object.set(&self.cfg.id_property, Value::String(id.clone()));
        match at {
            Some(at) => {
                let old = std::mem::replace(&mut self.data[at], object.clone());
                self.events.push_back(StoreEvent::Change { id, old, new: object });
            }
            None => {
                for (key, value) in &self.cfg.default_properties {
                    if object.get(key).is_none() {
                        object.set(key, value.clone());
                    }
                }
                self.data.push(object);
                self.index.insert(id.clone(), self.data.len() - 1);
                self.events.push_back(StoreEvent::New { id });
            }
        }
    }

    /// Delete by identity. Returns false when absent.
    pub fn remove(&mut self, id: &str) -> bool {
        let at = match self.position(id) {
            Some(at) => at,
            None => return false,
        };
        let object = self.data.remove(at);
        self.index.remove(id);
        for slot in self.index.values_mut() {
            if *slot > at {
                *slot -= 1;
            }
        }
        self.events.push_back(StoreEvent::Delete { id: id.to_owned(), object });
        true
    }

    /// Load the store from in-memory data or a URL. Empty datasets are
    /// valid. Duplicate identities within the dataset are skipped with a
    /// warning.
    pub async fn load(&mut self, options: &LoadOptions) -> Result<()> {
        match self.state {
            StoreState::Loading => return Err(StoreError::LoadPending),
            StoreState::Active => {
                return Err(StoreError::Access("store already loaded".to_owned()))
            }
            StoreState::WaitOnLoad | StoreState::Closed => {}
        }
        self.state = StoreState::Loading;
        match self.fetch_values(options).await {
            Ok(values) => {
                self.load_values(values, options.filter.as_ref())?;
                self.state = StoreState::Active;
                debug!(total = self.data.len(), "store loaded");
                Ok(())
            }
            Err(err) => {
                self.state = StoreState::Closed;
                Err(err)
            }
        }
    }

    async fn fetch_values(&self, options: &LoadOptions) -> Result<Vec<Value>> {
        if let Some(data) = &options.data {
            return Ok(data.clone());
        }
        if let Some(url) = &options.url {
            let text = reqwest::get(url).await?.error_for_status()?.text().await?;
            return match &options.handler {
                Some(handler) => handler.parse(&text),
                None => JsonHandler.parse(&text),
            };
        }
        Ok(Vec::new())
    }

    /// Populate the dataset without emitting events. Loading is not a
    /// mutation stream; observers attach after `ready`.
    pub(crate) fn load_values(&mut self, values: Vec<Value>, filter: Option<&Query>) -> Result<()> {
        self.data.clear();
        self.index.clear();
        for value in values {
            let mut object = StoreObject::from_value(value)?;
            if let Some(filter) = filter {
                if !filter.matches(&object) {
                    continue;
                }
            }
            let id = match object.identity(&self.cfg.id_property) {
                Some(id) => id,
                None if self.cfg.require_identity => {
                    return Err(StoreError::InvalidObject(format!(
                        "loaded object has no [{}] property",
                        self.cfg.id_property
                    )));
                }
                None => {
                    let id = format!("{:x}", rand::random::<u64>());
                    object.set(&self.cfg.id_property, Value::String(id.clone()));
                    id
                }
            };
            if self.index.contains_key(&id) {
                warn!(id = %id, "duplicate identity in dataset, object skipped");
                continue;
            }
            for (key, value) in &self.cfg.default_properties {
                if object.get(key).is_none() {
                    object.set(key, value.clone());
                }
            }
            self.data.push(object);
            self.index.insert(id, self.data.len() - 1);
        }
        Ok(())
    }

    /// Close the store. `clear` overrides the configured `clear_on_close`.
    pub fn close(&mut self, clear: Option<bool>) {
        if clear.unwrap_or(self.cfg.clear_on_close) {
            self.data.clear();
            self.index.clear();
            self.events.clear();
        }
        self.state = StoreState::Closed;
    }
}

impl ObjectStore for Memory {
    fn get(&self, id: &str) -> Option<StoreObject> {
        self.get_ref(id).cloned()
    }

    fn identity_of(&self, object: &StoreObject) -> Option<Id> {
        object.identity(&self.cfg.id_property)
    }

    fn total(&self) -> usize {
        self.data.len()
    }

    fn state(&self) -> StoreState {
        self.state
    }

    fn query(&self, query: &Query, options: &QueryOptions) -> Vec<StoreObject> {
        let hits = self.data.iter().filter(|o| query.matches(o)).cloned().collect();
        apply_options(hits, options)
    }

    fn take_events(&mut self) -> Vec<StoreEvent> {
        self.events.drain(..).collect()
    }
}
