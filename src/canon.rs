//! Canonical reference programs, keyed by task identifier.
//!
//! The canon store is an injected service object (an in-memory map for
//! tests, a JSON-file directory for production runs) accessed only
//! through `CanonSystem::get_or_create`. There is no process-wide
//! singleton. First creation for a task id is serialized so two racing
//! callers can never persist divergent canons; the loser observes and
//! adopts the winner's record.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::program::{ParseError, Program};
use crate::properties::{extract_properties, PropertyBag, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("no canon recorded for task `{0}` and no source was supplied")]
    NotFound(String),
    #[error("canon source for task `{task_id}` rejected: {source}")]
    Parse {
        task_id: String,
        #[source]
        source: ParseError,
    },
    #[error("canon store failure: {0}")]
    Store(String),
}

/// Persisted canon record, tagged with the extractor schema version so a
/// stale record can be detected and re-extracted on load.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoredCanon {
    pub schema_version: u32,
    pub task_id: String,
    pub source: String,
    pub properties: PropertyBag,
}

/// Hydrated canon: the reference program plus its precomputed bag.
/// Read-only to every component except the creation path.
#[derive(Debug, Clone)]
pub struct Canon {
    pub task_id: String,
    pub program: Program,
    pub properties: PropertyBag,
}

/// Backing store with get / create-if-absent / replace semantics.
pub trait CanonStore: Send + Sync {
    fn get(&self, task_id: &str) -> Result<Option<StoredCanon>, CanonError>;

    /// Persist `record` only if no record exists for its task id yet.
    /// Returns the record now in the store, which is the existing one when
    /// another writer won the race.
    fn create(&self, record: StoredCanon) -> Result<StoredCanon, CanonError>;

    /// Overwrite an existing record (schema migration path only).
    fn replace(&self, record: StoredCanon) -> Result<(), CanonError>;
}

/// In-memory store for tests and single-run experiments.
#[derive(Default)]
pub struct MemoryCanonStore {
    records: RwLock<HashMap<String, StoredCanon>>,
}

impl MemoryCanonStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanonStore for MemoryCanonStore {
    fn get(&self, task_id: &str) -> Result<Option<StoredCanon>, CanonError> {
        Ok(self.records.read().get(task_id).cloned())
    }

    fn create(&self, record: StoredCanon) -> Result<StoredCanon, CanonError> {
        let mut records = self.records.write();
        match records.get(&record.task_id) {
            Some(existing) => Ok(existing.clone()),
            None => {
                records.insert(record.task_id.clone(), record.clone());
                Ok(record)
            }
        }
    }

    fn replace(&self, record: StoredCanon) -> Result<(), CanonError> {
        self.records.write().insert(record.task_id.clone(), record);
        Ok(())
    }
}

/// Directory of JSON records, one file per task id. File names are the
/// sanitized task id plus a short content hash of the full id, so
/// distinct ids can never collide after sanitization.
pub struct DirCanonStore {
    root: PathBuf,
}

impl DirCanonStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CanonError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|err| CanonError::Store(format!("create {}: {err}", root.display())))?;
        Ok(Self { root })
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        let sanitized: String = task_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(64)
            .collect();
        let digest = blake3::hash(task_id.as_bytes()).to_hex();
        self.root.join(format!("{sanitized}-{}.json", &digest.as_str()[..8]))
    }
}

impl CanonStore for DirCanonStore {
    fn get(&self, task_id: &str) -> Result<Option<StoredCanon>, CanonError> {
        let path = self.record_path(task_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CanonError::Store(format!("read {}: {err}", path.display())))
            }
        };
        let record: StoredCanon = serde_json::from_slice(&data)
            .map_err(|err| CanonError::Store(format!("decode {}: {err}", path.display())))?;
        Ok(Some(record))
    }

    fn create(&self, record: StoredCanon) -> Result<StoredCanon, CanonError> {
        let path = self.record_path(&record.task_id);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return self.get(&record.task_id)?.ok_or_else(|| {
                    CanonError::Store(format!(
                        "record for `{}` vanished during creation race",
                        record.task_id
                    ))
                });
            }
            Err(err) => {
                return Err(CanonError::Store(format!("create {}: {err}", path.display())))
            }
        };
        let data = serde_json::to_vec_pretty(&record)
            .map_err(|err| CanonError::Store(format!("encode canon record: {err}")))?;
        file.write_all(&data)
            .map_err(|err| CanonError::Store(format!("write {}: {err}", path.display())))?;
        Ok(record)
    }

    fn replace(&self, record: StoredCanon) -> Result<(), CanonError> {
        let path = self.record_path(&record.task_id);
        let data = serde_json::to_vec_pretty(&record)
            .map_err(|err| CanonError::Store(format!("encode canon record: {err}")))?;
        fs::write(&path, data)
            .map_err(|err| CanonError::Store(format!("write {}: {err}", path.display())))
    }
}

/// Service object owning canon lookup and creation.
pub struct CanonSystem {
    store: Arc<dyn CanonStore>,
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CanonSystem {
    pub fn new(store: Arc<dyn CanonStore>) -> Self {
        Self {
            store,
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Load the canon for `task_id`, creating it from `supplied` when no
    /// record exists yet. A record written by an older extractor schema
    /// is re-extracted from its stored source and replaced in place.
    pub fn get_or_create(
        &self,
        task_id: &str,
        supplied: Option<&str>,
    ) -> Result<Canon, CanonError> {
        if let Some(record) = self.store.get(task_id)? {
            return self.hydrate(record);
        }
        let Some(source) = supplied else {
            return Err(CanonError::NotFound(task_id.to_string()));
        };

        let lock = self.creation_lock(task_id);
        let _guard = lock.lock();
        // Re-check under the lock: a racing creator may have won.
        if let Some(record) = self.store.get(task_id)? {
            return self.hydrate(record);
        }
        let program = Program::parse(source).map_err(|err| CanonError::Parse {
            task_id: task_id.to_string(),
            source: err,
        })?;
        let record = StoredCanon {
            schema_version: SCHEMA_VERSION,
            task_id: task_id.to_string(),
            source: program.source().to_string(),
            properties: extract_properties(&program),
        };
        let stored = self.store.create(record)?;
        self.hydrate(stored)
    }

    fn creation_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.creation_locks.lock();
        locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn hydrate(&self, record: StoredCanon) -> Result<Canon, CanonError> {
        let program = Program::parse(&record.source).map_err(|err| CanonError::Parse {
            task_id: record.task_id.clone(),
            source: err,
        })?;
        let properties = if record.schema_version == SCHEMA_VERSION {
            record.properties
        } else {
            let properties = extract_properties(&program);
            self.store.replace(StoredCanon {
                schema_version: SCHEMA_VERSION,
                task_id: record.task_id.clone(),
                source: record.source.clone(),
                properties: properties.clone(),
            })?;
            properties
        };
        Ok(Canon {
            task_id: record.task_id,
            program,
            properties,
        })
    }
}
