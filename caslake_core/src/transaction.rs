//! Staged writes and the commit/rollback protocol.

use crate::catalog::Catalog;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::hash::{ContentHash, HashingReader};
use crate::lake::Lake;
use crate::store::BlobStore;
use serde::Serialize;
use std::fmt;
use std::io::Read;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a transaction. `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::Open => "open",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// An object written under its staging path, waiting for commit.
#[derive(Debug)]
struct StagedObject<M> {
    id: Uuid,
    entry: Entry<M>,
    digest: ContentHash,
}

/// A unit of work against a [`Lake`].
///
/// Obtained from [`Lake::transaction`]. Objects added with [`put`](Self::put)
/// live under temporary paths until [`commit`](Self::commit) moves them to
/// their hash-derived paths and catalogs them in one batch. Dropping the
/// transaction rolls back anything still staged and frees the lake for the
/// next transaction.
pub struct Transaction<'a, S: BlobStore, C: Catalog, M> {
    lake: &'a Lake<S, C>,
    staged: Vec<StagedObject<M>>,
    state: TxState,
}

impl<'a, S: BlobStore, C: Catalog, M> Transaction<'a, S, C, M> {
    /// Only called by the lake once it has marked itself busy.
    pub(crate) fn begin(lake: &'a Lake<S, C>) -> Self {
        debug!(base_dir = %lake.base_dir(), "transaction opened");
        Self {
            lake,
            staged: Vec::new(),
            state: TxState::Open,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Number of staged objects.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Staging identifiers in put order.
    pub fn staged_ids(&self) -> Vec<Uuid> {
        self.staged.iter().map(|s| s.id).collect()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            TxState::Open => Ok(()),
            state => Err(Error::transaction_closed(state.to_string())),
        }
    }

    /// Stream `reader` into the store under a fresh staging path.
    ///
    /// The content hash is computed while the bytes are written and kept
    /// until commit; `entry` stays uncommitted. If the write fails nothing is
    /// staged.
    pub fn put<R: Read>(&mut self, reader: R, mut entry: Entry<M>) -> Result<Uuid> {
        self.ensure_open()?;

        let id = Uuid::new_v4();
        let path = self.lake.staging_path(&id);
        let mut hashing = HashingReader::new(reader);
        let size = self.lake.store().write(&path, &mut hashing)?;
        let digest = hashing.digest();

        debug!(%id, %path, hash = %digest, size, "staged object");
        entry.clear_content_hash();
        self.staged.push(StagedObject { id, entry, digest });
        Ok(id)
    }

    /// Promote every staged object and catalog the entries.
    ///
    /// Objects are moved to `base_dir + hash + extension` first, then all
    /// entries are inserted in one batch. Returns the committed entries.
    ///
    /// On failure the transaction rolls back whatever is still staged and
    /// ends up `RolledBack`. Objects already moved stay at their final paths
    /// without catalog rows; they are not reconciled.
    pub fn commit(&mut self) -> Result<Vec<Entry<M>>>
    where
        M: Serialize,
    {
        self.ensure_open()?;

        match self.promote() {
            Ok(entries) => {
                self.state = TxState::Committed;
                info!(count = entries.len(), "transaction committed");
                Ok(entries)
            }
            Err(err) => {
                warn!(%err, "commit failed, rolling back staged objects");
                if let Err(rollback_err) = self.rollback() {
                    warn!(err = %rollback_err, "rollback after failed commit was incomplete");
                }
                self.state = TxState::RolledBack;
                Err(err)
            }
        }
    }

    fn promote(&mut self) -> Result<Vec<Entry<M>>>
    where
        M: Serialize,
    {
        let mut committed = Vec::with_capacity(self.staged.len());
        let mut pending = std::mem::take(&mut self.staged).into_iter();

        while let Some(mut staged) = pending.next() {
            let from = self.lake.staging_path(&staged.id);
            let to = self.lake.final_path(&staged.digest, staged.entry.file_extension());

            if let Err(err) = self.lake.store().move_object(&from, &to) {
                // Not moved: leave it and everything after it staged for rollback
                self.staged.push(staged);
                self.staged.extend(pending);
                return Err(err);
            }

            debug!(id = %staged.id, %from, %to, "promoted object");
            staged.entry.set_content_hash(staged.digest);
            committed.push(staged.entry);
        }

        if let Err(err) = self.lake.catalog().insert_many(&committed) {
            warn!(
                %err,
                orphans = committed.len(),
                "catalog insert failed; promoted objects have no catalog rows"
            );
            return Err(err);
        }

        Ok(committed)
    }

    /// Delete every staged object.
    ///
    /// Missing staging objects are skipped. Objects whose deletion fails stay
    /// staged, so calling this again retries them. After a commit this is a
    /// no-op.
    pub fn rollback(&mut self) -> Result<()> {
        let mut first_err = None;
        let mut remaining = Vec::new();

        for staged in std::mem::take(&mut self.staged) {
            let path = self.lake.staging_path(&staged.id);
            match self.lake.store().delete(&path) {
                Ok(()) => debug!(id = %staged.id, %path, "discarded staged object"),
                Err(err) if err.is_not_found() => {
                    debug!(id = %staged.id, %path, "staged object already absent")
                }
                Err(err) => {
                    warn!(id = %staged.id, %path, %err, "failed to discard staged object");
                    first_err.get_or_insert(err);
                    remaining.push(staged);
                }
            }
        }

        self.staged = remaining;
        if self.state == TxState::Open {
            self.state = TxState::RolledBack;
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<S: BlobStore, C: Catalog, M> Drop for Transaction<'_, S, C, M> {
    fn drop(&mut self) {
        if self.state == TxState::Open || !self.staged.is_empty() {
            if let Err(err) = self.rollback() {
                warn!(%err, leaked = self.staged.len(), "rollback on drop failed");
            }
        }
        self.lake.release();
        debug!(state = %self.state, "transaction closed");
    }
}

impl<S: BlobStore, C: Catalog, M> fmt::Debug for Transaction<'_, S, C, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("staged", &self.staged_ids())
            .finish()
    }
}
