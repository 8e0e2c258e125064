//! C4 DBC Store: a named collection of loaded DBC files, reference
//! counted so a bus port can lock one against replacement while it is
//! attached (§4.4, `DbcAttachment` on the net side).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::model::DbcFile;
use crate::parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    AlreadyExists,
    LockBusy,
    Io,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "no dbc file with that name is loaded"),
            StoreError::AlreadyExists => write!(f, "a dbc file with that name is already loaded"),
            StoreError::LockBusy => write!(f, "dbc file is locked by an attached bus port"),
            StoreError::Io => write!(f, "dbc file could not be read"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A loaded DBC file plus the lock count bus ports hold against it.
struct Entry {
    file: Arc<DbcFile>,
    lock_count: AtomicU32,
}

/// Named collection of loaded DBC files (C4). Internally synchronised so
/// it can be shared behind an `Arc` between the CLI/host layer and
/// whatever composes bus ports with DBC attachments.
#[derive(Default)]
pub struct DbcStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl DbcStore {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Parse `text` under `name` and insert it. Fails if `name` is
    /// already loaded; use [`DbcStore::replace`] to overwrite.
    pub fn load(&self, name: &str, text: &str, path: Option<&Path>) -> Result<Arc<DbcFile>, StoreError> {
        let mut entries = self.entries.write().expect("dbc store lock poisoned");
        if entries.contains_key(name) {
            return Err(StoreError::AlreadyExists);
        }
        let file = Arc::new(parser::parse(name, path.map(Path::to_path_buf), text));
        entries.insert(name.to_string(), Entry { file: file.clone(), lock_count: AtomicU32::new(0) });
        Ok(file)
    }

    /// Re-parse `text` over an existing entry, refusing while any bus
    /// port holds a lock on it (§4.4).
    pub fn replace(&self, name: &str, text: &str, path: Option<&Path>) -> Result<Arc<DbcFile>, StoreError> {
        let mut entries = self.entries.write().expect("dbc store lock poisoned");
        let entry = entries.get(name).ok_or(StoreError::NotFound)?;
        if entry.lock_count.load(Ordering::Acquire) > 0 {
            return Err(StoreError::LockBusy);
        }
        let file = Arc::new(parser::parse(name, path.map(Path::to_path_buf), text));
        entries.insert(name.to_string(), Entry { file: file.clone(), lock_count: AtomicU32::new(0) });
        Ok(file)
    }

    /// Remove `name` from the store, refusing while locked.
    pub fn unload(&self, name: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().expect("dbc store lock poisoned");
        let entry = entries.get(name).ok_or(StoreError::NotFound)?;
        if entry.lock_count.load(Ordering::Acquire) > 0 {
            return Err(StoreError::LockBusy);
        }
        entries.remove(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<DbcFile>> {
        let entries = self.entries.read().expect("dbc store lock poisoned");
        entries.get(name).map(|e| e.file.clone())
    }

    pub fn list(&self) -> Vec<String> {
        let entries = self.entries.read().expect("dbc store lock poisoned");
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Increment `name`'s lock count. A bus port calls this when it
    /// attaches and arranges (via `DbcAttachment`'s `Drop`) to call
    /// [`DbcStore::unlock`] when it detaches.
    pub fn lock(&self, name: &str) -> Result<(), StoreError> {
        let entries = self.entries.read().expect("dbc store lock poisoned");
        let entry = entries.get(name).ok_or(StoreError::NotFound)?;
        entry.lock_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn unlock(&self, name: &str) {
        let entries = self.entries.read().expect("dbc store lock poisoned");
        if let Some(entry) = entries.get(name) {
            entry.lock_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1))).ok();
        }
    }

    pub fn lock_count(&self, name: &str) -> Option<u32> {
        let entries = self.entries.read().expect("dbc store lock poisoned");
        entries.get(name).map(|e| e.lock_count.load(Ordering::Acquire))
    }
}
