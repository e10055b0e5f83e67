//! # Caslake Core
//!
//! A transactional content-addressed object lake.
//!
//! Objects are staged under random temporary names while their SHA-256 is
//! computed from the byte stream, then moved to `base_dir + hash + extension`
//! on commit, alongside a metadata entry in a catalog. Uncommitted work is
//! rolled back when the transaction goes out of scope.
//!
//! ## Features
//!
//! - Single-pass hashing while streaming to storage
//! - Commit/rollback with a drop guard
//! - Pluggable blob stores (local filesystem, in-memory)
//! - Pluggable catalogs (SQLite, in-memory) with typed caller fields
//! - Directory migration and symlink projections
//!
//! ## Example
//!
//! ```no_run
//! use caslake_core::{Entry, LocalLake, Query};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct File {
//!     name: String,
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let lake = LocalLake::init("./my-lake")?;
//!
//! let mut tx = lake.transaction()?;
//! for i in 0..10 {
//!     let name = i.to_string();
//!     tx.put(name.as_bytes(), Entry::new(".txt", File { name: name.clone() }))?;
//! }
//! tx.commit()?;
//! drop(tx);
//!
//! let entries = lake.select::<File>(&Query::all().where_eq("name", "3"))?;
//! println!("{}", lake.to_path(&entries[0])?);
//! assert_eq!(lake.read_bytes(&entries[0])?, b"3");
//! # Ok(())
//! # }
//! ```

mod catalog;
mod config;
mod encode;
mod entry;
mod error;
mod hash;
mod lake;
#[cfg(unix)]
mod links;
mod migrate;
mod query;
mod store;
mod transaction;

pub use catalog::{Catalog, MemoryCatalog, SqliteCatalog};
pub use config::{CONFIG_FILE, LakeConfig};
pub use encode::{decode, encode};
pub use entry::{Entry, Fields};
pub use error::{Error, Result};
pub use hash::{Algorithm, ContentHash, HashingReader};
pub use lake::{Lake, LocalLake, normalize_base_dir};
#[cfg(unix)]
pub use links::project_links;
pub use migrate::{MigrateStats, SourceFile, extension_of, migrate_tree};
pub use query::{CompareOp, Field, Filter, Order, Query};
pub use store::{BlobStore, LocalStore, MemoryStore};
pub use transaction::{Transaction, TxState};
