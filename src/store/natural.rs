//! Natural-order layer: writes may place an object before another instead
//! of appending.

use crate::error::Result;
use crate::object::{Id, StoreObject};
use crate::query::{Query, QueryOptions};
use crate::store::memory::{Memory, MemoryConfig};
use crate::store::{LoadOptions, ObjectStore, PutOptions, StoreEvent, StoreState};

/// [`Memory`] plus the `before` put option.
pub struct Natural {
    pub(crate) base: Memory,
}

impl Natural {
    pub fn new(cfg: MemoryConfig) -> Self {
        Natural { base: Memory::new(cfg) }
    }

    pub fn config(&self) -> &MemoryConfig {
        self.base.config()
    }

    pub fn add(&mut self, object: StoreObject, options: &PutOptions) -> Result<Id> {
        let id = self.base.add(object, options)?;
        if let Some(before) = &options.before {
            self.reposition(&id, before);
        }
        Ok(id)
    }

    pub fn put(&mut self, object: StoreObject, options: &PutOptions) -> Result<Id> {
        let id = self.base.put(object, options)?;
        if let Some(before) = &options.before {
            self.reposition(&id, before);
        }
        Ok(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.base.remove(id)
    }

    pub async fn load(&mut self, options: &LoadOptions) -> Result<()> {
        self.base.load(options).await
    }

    pub fn close(&mut self, clear: Option<bool>) {
        self.base.close(clear)
    }

    pub fn is_item(&self, object: &StoreObject) -> bool {
        self.base.is_item(object)
    }

    /// Move an object so it sits immediately before another. The anchor is
    /// located after removal so its index is already adjusted; an unknown
    /// anchor appends.
    fn reposition(&mut self, id: &str, before: &str) {
        if id == before {
            return;
        }
        let from = match self.base.position(id) {
            Some(at) => at,
            None => return,
        };
        let object = self.base.data.remove(from);
        let to = self.base.position_after_removal(before, from).unwrap_or(self.base.data.len());
        self.base.data.insert(to, object);
        self.base.reindex();
    }
}

impl Memory {
    /// Index of an object after one element before-or-at `removed_from` was
    /// taken out of `data` without reindexing yet.
    fn position_after_removal(&self, id: &str, removed_from: usize) -> Option<usize> {
        let at = self.position(id)?;
        Some(if at > removed_from { at - 1 } else { at })
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (at, object) in self.data.iter().enumerate() {
            if let Some(id) = object.identity(&self.cfg.id_property) {
                self.index.insert(id, at);
            }
        }
    }
}

impl ObjectStore for Natural {
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
