//! cbstore: Hierarchical Observable Object Store
//!
//! An in-memory object store family with incremental parent/child indexing,
//! natural (insertion-controlled) ordering, a remote file-store variant, and
//! a tree model that maintains tri-state (checked / unchecked / mixed)
//! checkbox consistency across a live, mutable hierarchy.

pub mod error;
pub mod logging;
pub mod model;
pub mod object;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use object::{CheckedState, Id, StoreObject};
pub use query::{Query, QueryOptions, SortSpec};
