//! Remote file store: a read-mostly cache over a file server. Directory
//! listings arrive lazily through an expansion flag, server responses are
//! merged into existing records so client-side attributes survive, and
//! stale references (404/410) trigger an upward resynchronization walk.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::object::{Id, StoreObject};
use crate::query::{apply_options, Query, QueryOptions, SortSpec};
use crate::store::source::{Envelope, FileRecord, RemoteSource, RequestGate};
use crate::store::{PutOptions, StoreEvent};

/// Identity property of file records.
pub const PATH_ATTR: &str = "path";
/// Expansion marker: the children of this directory are known.
pub const EXPANDED_ATTR: &str = "_EX";
/// Derived icon class, present when icon derivation is enabled.
pub const ICON_ATTR: &str = "icon";

/// Server-owned properties; they cannot be defaulted or written by clients.
const RESERVED_PROPERTIES: [&str; 6] =
    ["name", "path", "directory", "size", "modified", ICON_ATTR];

/// Construction-time settings for [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Server-side directory the store is rooted at.
    pub base_path: String,
    /// Options forwarded to the server with every list request.
    pub options: Vec<String>,
    /// Only expose directories.
    pub dirs_only: bool,
    /// Derive an icon class from each record's extension.
    pub icon_class: bool,
    /// Default sort applied when a query carries none.
    pub sort: Vec<SortSpec>,
    /// Client-side properties applied to newly cached records.
    pub default_properties: serde_json::Map<String, Value>,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        FileStoreConfig {
            base_path: ".".to_owned(),
            options: Vec::new(),
            dirs_only: false,
            icon_class: false,
            sort: Vec::new(),
            default_properties: serde_json::Map::new(),
        }
    }
}

#[derive(Default)]
struct FileCache {
    data: HashMap<Id, StoreObject>,
    child_index: HashMap<Id, Vec<Id>>,
    loaded: bool,
    events: VecDeque<StoreEvent>,
}

/// File store over a [`RemoteSource`]. One remote request runs at a time;
/// callers queue on the gate in arrival order.
pub struct FileStore {
    source: Arc<dyn RemoteSource>,
    base_path: String,
    server_options: Vec<String>,
    dirs_only: bool,
    icon_class: bool,
    sort: Vec<SortSpec>,
    default_properties: serde_json::Map<String, Value>,
    gate: RequestGate,
    cache: Mutex<FileCache>,
}

impl FileStore {
    pub fn new(source: Arc<dyn RemoteSource>, cfg: FileStoreConfig) -> Result<Self> {
        for key in cfg.default_properties.keys() {
            if RESERVED_PROPERTIES.contains(&key.as_str()) || key == EXPANDED_ATTR {
                return Err(StoreError::Access(format!(
                    "property [{key}] is reserved and cannot be defaulted"
                )));
            }
        }
        let mut server_options = Vec::new();
        for option in &cfg.options {
            // iconClass is client-side only
            if option == "iconClass" {
                continue;
            }
            server_options.push(option.clone());
        }
        if cfg.dirs_only && !server_options.iter().any(|o| o == "dirsOnly") {
            server_options.push("dirsOnly".to_owned());
        }
        Ok(FileStore {
            source,
            base_path: normalize_base_path(&cfg.base_path),
            server_options,
            dirs_only: cfg.dirs_only,
            icon_class: cfg.icon_class || cfg.options.iter().any(|o| o == "iconClass"),
            sort: cfg.sort,
            default_properties: cfg.default_properties,
            gate: RequestGate::new(),
            cache: Mutex::new(FileCache::default()),
        })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Fetch the root listing. With `deep` the whole subtree arrives in one
    /// round trip. Loading twice is a no-op.
    pub async fn load(&self, deep: bool) -> Result<()> {
        if self.cache.lock().loaded {
            return Ok(());
        }
        let _permit = self.gate.acquire().await?;
        if self.cache.lock().loaded {
            return Ok(());
        }
        let env = self
            .source
            .list(&self.base_path, None, deep, &self.server_options)
            .await?;
        let mut cache = self.cache.lock();
        self.merge_envelope(&mut cache, &env);
        cache.loaded = true;
        info!(base_path = %self.base_path, records = cache.data.len(), "file store loaded");
        Ok(())
    }

    /// Cached record, or a single-path fetch on a miss. A stale reference
    /// surfaces as `NotFound`.
    pub async fn get(&self, path: &str) -> Result<StoreObject> {
        if let Some(object) = self.cache.lock().data.get(path).cloned() {
            return Ok(object);
        }
        let _permit = self.gate.acquire().await?;
        if let Some(object) = self.cache.lock().data.get(path).cloned() {
            return Ok(object);
        }
        match self
            .source
            .list(&self.base_path, Some(path), false, &self.server_options)
            .await
        {
            Ok(env) => {
                let mut cache = self.cache.lock();
                self.merge_envelope(&mut cache, &env);
                cache
                    .data
                    .get(path)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(path.to_owned()))
            }
            Err(err) if err.is_stale_reference() => Err(StoreError::NotFound(path.to_owned())),
            Err(err) => Err(err),
        }
    }

    /// Children of a directory. Unexpanded directories are listed remotely
    /// first; a stale directory is resynchronized and reported childless.
    pub async fn get_children(
        &self,
        path: &str,
        options: &QueryOptions,
    ) -> Result<Vec<StoreObject>> {
        let (is_dir, expanded) = {
            let cache = self.cache.lock();
            match cache.data.get(path) {
                Some(object) => (
                    object.get("directory") == Some(&Value::Bool(true)),
                    object.get(EXPANDED_ATTR) == Some(&Value::Bool(true)),
                ),
                None => return Err(StoreError::NotFound(path.to_owned())),
            }
        };
        if !is_dir {
            return Ok(Vec::new());
        }
        if !expanded {
            let _permit = self.gate.acquire().await?;
            let expanded_now = {
                let cache = self.cache.lock();
                cache
                    .data
                    .get(path)
                    .map_or(false, |o| o.get(EXPANDED_ATTR) == Some(&Value::Bool(true)))
            };
            if !expanded_now {
                match self
                    .source
                    .list(&self.base_path, Some(path), false, &self.server_options)
                    .await
                {
                    Ok(env) => {
                        let mut cache = self.cache.lock();
                        self.merge_envelope(&mut cache, &env);
                    }
                    Err(err) if err.is_stale_reference() => {
                        self.resync(path).await?;
                        return Ok(Vec::new());
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        let cache = self.cache.lock();
        let children = cache.child_index.get(path).cloned().unwrap_or_default();
        let mut objects: Vec<StoreObject> =
            children.iter().filter_map(|id| cache.data.get(id).cloned()).collect();
        if self.dirs_only {
            objects.retain(|o| o.get("directory") == Some(&Value::Bool(true)));
        }
        let mut options = options.clone();
        if options.sort.is_empty() {
            options.sort = self.sort.clone();
        }
        Ok(apply_options(objects, &options))
    }

    /// Delete a file or directory server-side, then drop its whole subtree
    /// from the cache in one batch. Returns false when the server reported
    /// the path already gone (the cache is resynchronized instead).
    pub async fn remove(&self, path: &str) -> Result<bool> {
        if self.cache.lock().data.get(path).is_none() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let _permit = self.gate.acquire().await?;
        match self.source.delete(&self.base_path, path).await {
            Ok(_) => {
                let mut cache = self.cache.lock();
                self.delete_subtree(&mut cache, path);
                Ok(true)
            }
            Err(err) if err.is_stale_reference() => {
                warn!(path, "delete target already gone, resynchronizing");
                self.resync(path).await?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Rename or move. On success the old subtree is dropped from the
    /// cache and the server's view of the new records is merged in.
    pub async fn rename(&self, path: &str, new_path: &str) -> Result<Id> {
        if new_path.is_empty() {
            return Err(StoreError::InvalidType("new path is empty".to_owned()));
        }
        if self.cache.lock().data.get(path).is_none() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let _permit = self.gate.acquire().await?;
        match self.source.rename(&self.base_path, path, new_path).await {
            Ok(env) => {
                let mut cache = self.cache.lock();
                self.delete_subtree(&mut cache, path);
                self.merge_envelope(&mut cache, &env);
                Ok(new_path.to_owned())
            }
            Err(err) if err.is_stale_reference() => {
                warn!(path, "rename source gone, resynchronizing");
                self.resync(path).await?;
                Err(StoreError::NotFound(path.to_owned()))
            }
            Err(err) => Err(err),
        }
    }

    /// Update the client-side attributes of a cached record. Server-owned
    /// properties are read-only; unknown records cannot be fabricated.
    pub fn put(&self, object: StoreObject, options: &PutOptions) -> Result<Id> {
        let id = match options.id.clone().or_else(|| object.identity(PATH_ATTR)) {
            Some(id) => id,
            None => {
                return Err(StoreError::InvalidObject(format!(
                    "object has no [{PATH_ATTR}] property"
                )))
            }
        };
        let mut cache = self.cache.lock();
        let existing = cache
            .data
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut updated = existing.clone();
        for (key, value) in object.fields() {
            if RESERVED_PROPERTIES.contains(&key.as_str()) || key == EXPANDED_ATTR {
                if existing.get(key).map_or(true, |held| held != value) {
                    return Err(StoreError::Access(format!("property [{key}] is read-only")));
                }
                continue;
            }
            updated.set(key, value.clone());
        }
        if updated != existing {
            cache.data.insert(id.clone(), updated.clone());
            cache.events.push_back(StoreEvent::Change {
                id: id.clone(),
                old: existing,
                new: updated,
            });
        }
        Ok(id)
    }

    /// Files are created server-side only.
    pub fn add(&self, _object: StoreObject, _options: &PutOptions) -> Result<Id> {
        Err(StoreError::Access("file store does not accept new objects".to_owned()))
    }

    /// Query the cached records.
    pub fn query(&self, query: &Query, options: &QueryOptions) -> Vec<StoreObject> {
        let cache = self.cache.lock();
        let mut hits: Vec<StoreObject> =
            cache.data.values().filter(|o| query.matches(o)).cloned().collect();
        if self.dirs_only {
            hits.retain(|o| o.get("directory") == Some(&Value::Bool(true)));
        }
        let mut options = options.clone();
        if options.sort.is_empty() {
            options.sort = self.sort.clone();
        }
        apply_options(hits, &options)
    }

    pub fn total(&self) -> usize {
        self.cache.lock().data.len()
    }

    /// Close the store. Queued requests are cancelled; the cache is
    /// dropped.
    pub fn close(&self) {
        self.gate.close();
        let mut cache = self.cache.lock();
        cache.data.clear();
        cache.child_index.clear();
        cache.events.clear();
        cache.loaded = false;
    }

    /// Drain the pending mutation events in dispatch order.
    pub fn take_events(&self) -> Vec<StoreEvent> {
        self.cache.lock().events.drain(..).collect()
    }

    /// Walk upward from a stale path: drop the local subtree and reload the
    /// parent directory; if the parent is stale too, climb. A missing root
    /// is unrecoverable. Runs inside the caller's gate slot.
    async fn resync(&self, path: &str) -> Result<()> {
        let mut current = path.to_owned();
        loop {
            {
                let mut cache = self.cache.lock();
                self.delete_subtree(&mut cache, &current);
            }
            let parent = match parent_path(&current) {
                Some(parent) => parent,
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "root of [{}] is gone", self.base_path
                    )))
                }
            };
            debug!(stale = %current, parent = %parent, "resynchronizing");
            match self
                .source
                .list(&self.base_path, Some(&parent), false, &self.server_options)
                .await
            {
                Ok(env) => {
                    let mut cache = self.cache.lock();
                    self.merge_envelope(&mut cache, &env);
                    return Ok(());
                }
                Err(err) if err.is_stale_reference() => {
                    current = parent;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn merge_envelope(&self, cache: &mut FileCache, env: &Envelope) {
        for record in &env.items {
            self.merge_record(cache, record);
        }
    }

    /// Merge one server record into the cache. Existing records keep their
    /// client-side attributes; an expanded directory listing reconciles the
    /// child set, dropping subtrees the server no longer reports.
    fn merge_record(&self, cache: &mut FileCache, record: &FileRecord) {
        let id = record.path.clone();
        let expanded = record.children.is_some() || record.expanded == Some(true);

        let mut incoming = StoreObject::new();
        incoming.set("name", record.name.clone());
        incoming.set(PATH_ATTR, record.path.clone());
        incoming.set("directory", record.directory);
        incoming.set("size", record.size);
        incoming.set("modified", record.modified);
        if expanded {
            incoming.set(EXPANDED_ATTR, true);
        }

        match cache.data.get(&id).cloned() {
            Some(existing) => {
                if let Some(children) = &record.children {
                    let listed: HashSet<&str> =
                        children.iter().map(|c| c.path.as_str()).collect();
                    let stale: Vec<Id> = cache
                        .child_index
                        .get(&id)
                        .map(|held| {
                            held.iter()
                                .filter(|c| !listed.contains(c.as_str()))
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default();
                    for child in stale {
                        self.delete_subtree(cache, &child);
                    }
                }
                let mut merged = existing.clone();
                merged.merge_from(&incoming);
                if merged != existing {
                    cache.data.insert(id.clone(), merged.clone());
                    cache.events.push_back(StoreEvent::Change {
                        id: id.clone(),
                        old: existing,
                        new: merged,
                    });
                }
            }
            None => {
                let mut object = incoming;
                for (key, value) in &self.default_properties {
                    if object.get(key).is_none() {
                        object.set(key, value.clone());
                    }
                }
                if self.icon_class {
                    object.set(ICON_ATTR, icon_class_for(&record.name, record.directory));
                }
                cache.data.insert(id.clone(), object);
                cache.events.push_back(StoreEvent::New { id: id.clone() });
            }
        }

        if let Some(parent) = parent_path(&id) {
            if cache.data.contains_key(&parent) {
                let children = cache.child_index.entry(parent).or_default();
                if !children.iter().any(|c| c == &id) {
                    children.push(id.clone());
                }
            }
        }

        if let Some(children) = &record.children {
            for child in children {
                self.merge_record(cache, child);
            }
        }
    }

    /// Remove a record and everything below it from the cache, detaching
    /// it from its parent's child list. All events land in one batch.
    fn delete_subtree(&self, cache: &mut FileCache, path: &str) {
        let mut pending = vec![path.to_owned()];
        let mut order = Vec::new();
        while let Some(current) = pending.pop() {
            if let Some(children) = cache.child_index.remove(&current) {
                pending.extend(children);
            }
            order.push(current);
        }
        // leaves first
        for id in order.into_iter().rev() {
            if let Some(object) = cache.data.remove(&id) {
                cache.events.push_back(StoreEvent::Delete { id, object });
            }
        }
        if let Some(parent) = parent_path(path) {
            if let Some(children) = cache.child_index.get_mut(&parent) {
                children.retain(|c| c != path);
                if children.is_empty() {
                    cache.child_index.remove(&parent);
                }
            }
        }
    }
}

/// Normalize a base path: forward slashes, no empty or `.` segments, always
/// relative to the server root.
fn normalize_base_path(base_path: &str) -> String {
    let cleaned = base_path.replace('\\', "/");
    let segments: Vec<&str> =
        cleaned.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    if segments.is_empty() {
        ".".to_owned()
    } else {
        format!("./{}", segments.join("/"))
    }
}

/// Parent of a relative path; `None` at the root.
fn parent_path(path: &str) -> Option<String> {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => Some(parent.to_owned()),
        _ => None,
    }
}

/// CSS-style icon class from a file name. The extension is capitalized on
/// its first character so `a.txt` yields `fileIconTxt fileIcon`.
pub fn icon_class_for(name: &str, directory: bool) -> String {
    if directory {
        return "fileIconDIR fileIcon".to_owned();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            let mut chars = ext.chars();
            let first = chars.next().map(|c| c.to_uppercase().to_string()).unwrap_or_default();
            format!("fileIcon{}{} fileIcon", first, chars.as_str().to_lowercase())
        }
        _ => "fileIconUnknown fileIcon".to_owned(),
    }
}
