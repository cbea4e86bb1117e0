//! Store family: indexed base store, natural-order and hierarchy layers,
//! and the remote file store.

pub mod hierarchy;
pub mod memory;
pub mod natural;
pub mod remote;
pub mod source;

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::object::{Id, StoreObject};
use crate::query::{Query, QueryOptions};

/// Lifecycle of a loadable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Created, no load started yet.
    WaitOnLoad,
    /// A load request is in flight.
    Loading,
    /// Loaded and serving.
    Active,
    /// Closed; a new load may reopen it.
    Closed,
}

/// Mutation record queued by a store and drained by its observers.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    New { id: Id },
    /// Carries the removed object so observers can still read its fields.
    Delete { id: Id, object: StoreObject },
    /// `old` is a shallow copy taken before the write, so observers compare
    /// against the true prior state even if the caller mutated in place.
    Change { id: Id, old: StoreObject, new: StoreObject },
    /// A `before` placement moved a child within an unchanged parent set.
    /// No object property differs, so the affected parent is named instead.
    Reorder { parent: Id },
}

/// Directives accompanying a `put` or `add`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Identity override; takes precedence over the object's own id field.
    pub id: Option<Id>,
    /// `Some(false)` forbids replacing an existing object.
    pub overwrite: Option<bool>,
    /// Natural-order placement: insert before this object.
    pub before: Option<Id>,
    /// Parent set to attach the object under.
    pub parent: Option<Vec<Id>>,
}

impl PutOptions {
    pub fn with_id(id: &str) -> Self {
        PutOptions { id: Some(id.to_owned()), ..Default::default() }
    }

    pub fn before(id: &str) -> Self {
        PutOptions { before: Some(id.to_owned()), ..Default::default() }
    }

    pub fn parents(ids: &[&str]) -> Self {
        PutOptions {
            parent: Some(ids.iter().map(|s| (*s).to_owned()).collect()),
            ..Default::default()
        }
    }
}

/// Turns a fetched payload into raw objects. JSON is the default; other
/// formats plug in here.
pub trait DataHandler: Send + Sync {
    fn parse(&self, text: &str) -> Result<Vec<Value>>;
}

/// Default handler: the payload is a JSON array of objects.
pub struct JsonHandler;

impl DataHandler for JsonHandler {
    fn parse(&self, text: &str) -> Result<Vec<Value>> {
        match serde_json::from_str::<Value>(text)? {
            Value::Array(values) => Ok(values),
            other => Err(StoreError::InvalidResponse(format!(
                "expected a JSON array of objects, got {other}"
            ))),
        }
    }
}

/// Where a load gets its data from and how it is filtered.
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// In-memory dataset; takes precedence over `url`.
    pub data: Option<Vec<Value>>,
    /// Remote dataset fetched over HTTP.
    pub url: Option<String>,
    /// Objects failing this filter are dropped during load.
    pub filter: Option<Query>,
    /// Payload parser; JSON when absent.
    pub handler: Option<Arc<dyn DataHandler>>,
}

impl LoadOptions {
    pub fn from_data(data: Vec<Value>) -> Self {
        LoadOptions { data: Some(data), ..Default::default() }
    }

    pub fn from_url(url: &str) -> Self {
        LoadOptions { url: Some(url.to_owned()), ..Default::default() }
    }
}

/// Read surface shared by every in-memory store layer.
pub trait ObjectStore {
    fn get(&self, id: &str) -> Option<StoreObject>;
    fn identity_of(&self, object: &StoreObject) -> Option<Id>;
    fn total(&self) -> usize;
    fn state(&self) -> StoreState;
    fn query(&self, query: &Query, options: &QueryOptions) -> Vec<StoreObject>;
    /// Drain the pending mutation events in dispatch order.
    fn take_events(&mut self) -> Vec<StoreEvent>;
}
