//! The lake facade: a blob store, a catalog and a base directory.

use crate::catalog::{Catalog, SqliteCatalog};
use crate::config::{CONFIG_FILE, LakeConfig};
use crate::encode::encode;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::query::Query;
use crate::store::{BlobStore, LocalStore};
use crate::transaction::Transaction;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Normalize a base directory so it ends in exactly one `/`.
///
/// An empty (or all-separator) input becomes `/`.
pub fn normalize_base_dir(base_dir: &str) -> String {
    format!("{}/", base_dir.trim_end_matches('/'))
}

/// Content-addressed object lake.
///
/// Committed objects live at `base_dir + content_hash + file_extension`.
/// At most one [`Transaction`] can be open at a time; the busy flag is a guard
/// against reentrant use, not a lock for concurrent callers.
#[derive(Debug)]
pub struct Lake<S, C> {
    store: S,
    catalog: C,
    base_dir: String,
    busy: AtomicBool,
}

/// A lake on the local filesystem with a SQLite catalog.
pub type LocalLake = Lake<LocalStore, SqliteCatalog>;

impl<S: BlobStore, C: Catalog> Lake<S, C> {
    pub fn new(store: S, catalog: C, base_dir: &str) -> Self {
        Self {
            store,
            catalog,
            base_dir: normalize_base_dir(base_dir),
            busy: AtomicBool::new(false),
        }
    }

    /// Open a transaction. Fails with [`Error::TransactionInProgress`] while
    /// another transaction on this lake is still alive.
    pub fn transaction<M>(&self) -> Result<Transaction<'_, S, C, M>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::TransactionInProgress)?;
        Ok(Transaction::begin(self))
    }

    /// Run `f` inside a transaction. Anything `f` leaves uncommitted is rolled
    /// back when it returns, whether it succeeded or not.
    pub fn with_transaction<M, T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_, S, C, M>) -> Result<T>,
    {
        let mut tx = self.transaction()?;
        f(&mut tx)
    }

    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Whether a transaction is currently open.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run a catalog query.
    pub fn select<M: DeserializeOwned>(&self, query: &Query) -> Result<Vec<Entry<M>>> {
        let entries = self.catalog.query(query)?;
        debug!(count = entries.len(), "select");
        Ok(entries)
    }

    /// Stored path of a committed entry.
    pub fn to_path<M>(&self, entry: &Entry<M>) -> Result<String> {
        let hash = entry
            .content_hash()
            .ok_or_else(|| Error::not_committed(entry.file_extension()))?;
        Ok(self.final_path(hash, entry.file_extension()))
    }

    /// Read a committed entry's bytes.
    pub fn read_bytes<M>(&self, entry: &Entry<M>) -> Result<Vec<u8>> {
        self.store.read_bytes(&self.to_path(entry)?)
    }

    /// Open a committed entry's bytes for streaming reads.
    pub fn open<M>(&self, entry: &Entry<M>) -> Result<Box<dyn Read + Send>> {
        self.store.open(&self.to_path(entry)?)
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Temporary path an object is staged under before commit.
    pub fn staging_path(&self, id: &Uuid) -> String {
        format!("{}{}", self.base_dir, encode(id.as_bytes()))
    }

    pub(crate) fn final_path(&self, hash: &ContentHash, file_extension: &str) -> String {
        format!("{}{}{}", self.base_dir, hash.to_b32(), file_extension)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::invalid_lake(path, "path is not valid UTF-8"))
}

impl LocalLake {
    /// Initialize a new lake directory with the default configuration.
    pub fn init<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::init_with(root, LakeConfig::default())
    }

    /// Initialize a new lake directory.
    ///
    /// Creates:
    /// - `config` with the given settings
    /// - the store directory
    /// - the SQLite catalog with its table
    pub fn init_with<P: AsRef<Path>>(root: P, config: LakeConfig) -> Result<Self> {
        let root = root.as_ref();
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(Error::invalid_lake(root, "lake already initialized"));
        }

        fs::create_dir_all(root)?;
        config.save(&config_path)?;
        fs::create_dir_all(root.join(&config.store_dir))?;

        Self::from_config(root, &config)
    }

    /// Open an existing lake directory.
    ///
    /// Validates the layout and reads the configuration.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();

        if !root.exists() {
            return Err(Error::invalid_lake(root, "directory does not exist"));
        }

        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(Error::invalid_lake(root, "config file not found"));
        }
        let config = LakeConfig::load(&config_path)?;

        if !root.join(&config.store_dir).is_dir() {
            return Err(Error::invalid_lake(root, "store directory missing"));
        }
        if !root.join(&config.catalog_file).is_file() {
            return Err(Error::invalid_lake(root, "catalog file missing"));
        }

        Self::from_config(root, &config)
    }

    fn from_config(root: &Path, config: &LakeConfig) -> Result<Self> {
        let store_dir: PathBuf = root.join(&config.store_dir);
        let mut catalog = SqliteCatalog::open(root.join(&config.catalog_file), &config.table)?;
        for field in &config.unique_fields {
            catalog = catalog.with_unique_field(field)?;
        }

        debug!(root = %root.display(), "opened lake");
        Ok(Lake::new(LocalStore::new(), catalog, path_str(&store_dir)?))
    }
}
