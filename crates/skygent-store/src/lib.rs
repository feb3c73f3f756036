//! Per-store storage engine.
//!
//! # Data model overview
//!
//! Each named store owns a single SQLite file. The authoritative data is
//! the append-only `event_log` table: PostUpsert / PostDelete records, each
//! assigned a strictly monotone, gap-free `event_seq` by the database. The
//! `posts` table (plus `post_hashtag`, `post_lang` and the `posts_fts`
//! full-text index) is a projection of the latest upsert per post URI, kept
//! consistent with the log by committing both in one transaction. Replaying
//! the log from seq 0 reconstructs the projection exactly; that replay is
//! the canonical recovery procedure.
//!
//! ## Key concepts
//!
//! - **Committer**: the `append_*` methods on [`Store`] are the only code
//!   path that writes. Each call holds the store's single write permit and
//!   runs one transaction covering (index mutation + log append).
//! - **Checkpoints**: `index_checkpoints` remembers the last event applied
//!   to the projection (applying is idempotent by seq);
//!   `sync_checkpoints` / `derivation_checkpoints` remember how far
//!   external consumers got. Checkpoint rows are overwritten in place.
//! - **Manager**: [`StoreManager`] owns the set of stores under one root
//!   directory and caches one open handle per name.

mod checkpoint_ops;
mod committer;
mod event_log_ops;
mod index_ops;
mod manager;
mod merge;
mod migration_ops;
mod query;
mod source_ops;

use std::path::PathBuf;
use std::sync::Mutex;
use std::{io, result};

use rusqlite::Connection;
use skygent_core::{EventLogEntry, StoreName};
use snafu::{Location, ResultExt as _, Snafu};
use tokio::sync::{Semaphore, broadcast};
use tracing::debug;

pub use self::checkpoint_ops::{DerivationCheckpoint, EvaluationMode, IndexCheckpoint, SyncCheckpoint};
pub use self::manager::{StoreManager, StoreManagerError, StoreManagerResult};
pub use self::merge::{QueryHit, merge_stores};
pub use self::query::{PostCursor, QueryOpts, SortOrder};

pub const LOG_TARGET: &str = "skygent::store";

/// File name of the database inside a store's directory.
pub const STORE_DB_FILE: &str = "index.sqlite";

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("Store database error"))]
    Database {
        source: rusqlite::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Store I/O error at {}", path.display()))]
    Io {
        source: io::Error,
        path: PathBuf,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Corrupt record in store"))]
    Decode {
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "Store schema version {db_version} is newer than this build supports ({code_version})"
    ))]
    DbVersionTooHigh {
        db_version: u32,
        code_version: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Query filters must be pure; `{capability}` leaves cannot run in a query"))]
    EffectfulQueryFilter { capability: &'static str },
}

pub type StoreResult<T> = result::Result<T, StoreError>;

/// A write transaction plus hooks to run after it commits.
///
/// Broadcast notifications must not fire for transactions that roll back,
/// so they are queued on the context and drained by [`commit`].
///
/// [`commit`]: WriteTransactionCtx::commit
pub struct WriteTransactionCtx<'c> {
    tx: rusqlite::Transaction<'c>,
    on_commit: Mutex<Vec<Box<dyn FnOnce() + 'static>>>,
}

impl<'c> From<rusqlite::Transaction<'c>> for WriteTransactionCtx<'c> {
    fn from(tx: rusqlite::Transaction<'c>) -> Self {
        Self {
            tx,
            on_commit: Mutex::new(vec![]),
        }
    }
}

impl<'c> std::ops::Deref for WriteTransactionCtx<'c> {
    type Target = rusqlite::Transaction<'c>;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl WriteTransactionCtx<'_> {
    pub fn on_commit(&self, f: impl FnOnce() + 'static) {
        self.on_commit
            .lock()
            .expect("Locking failed")
            .push(Box::new(f));
    }

    fn commit(self) -> result::Result<(), rusqlite::Error> {
        let Self { tx, on_commit } = self;

        tx.commit()?;

        for hook in on_commit.lock().expect("Locking failed").drain(..) {
            hook();
        }
        Ok(())
    }
}

/// An open store: one connection, one write permit.
///
/// Readers share the connection under its mutex; writers additionally hold
/// the async `write_permit` for the whole transaction, which is what gives
/// `event_seq` its strict happens-before order under concurrent callers.
/// The permit is never held across a network call; the committer only
/// touches local state.
pub struct Store {
    name: StoreName,
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    write_permit: Semaphore,
    new_events_tx: broadcast::Sender<EventLogEntry>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub async fn open(name: StoreName, path: impl Into<PathBuf>) -> StoreResult<Store> {
        let path = path.into();
        debug!(target: LOG_TARGET, store = %name, path = %path.display(), "Opening store database");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(IoSnafu { path: parent })?;
        }

        let conn = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || Connection::open(path))
                .await
                .expect("Join failed")
                .context(DatabaseSnafu)?
        };

        Self::open_inner(name, Some(path), conn)
    }

    pub fn open_in_memory(name: StoreName) -> StoreResult<Store> {
        debug!(target: LOG_TARGET, store = %name, "Opening in-memory store database");
        let conn = Connection::open_in_memory().context(DatabaseSnafu)?;
        Self::open_inner(name, None, conn)
    }

    fn open_inner(
        name: StoreName,
        path: Option<PathBuf>,
        mut conn: Connection,
    ) -> StoreResult<Store> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context(DatabaseSnafu)?;

        // Migrations run in their own transaction; open fails rather than
        // touching a database from a newer build.
        let tx = conn.transaction().context(DatabaseSnafu)?;
        migration_ops::run_migrations_tx(&tx)?;
        tx.commit().context(DatabaseSnafu)?;

        let (new_events_tx, _) = broadcast::channel(128);

        Ok(Store {
            name,
            path,
            conn: Mutex::new(conn),
            write_permit: Semaphore::new(1),
            new_events_tx,
        })
    }

    pub fn name(&self) -> &StoreName {
        &self.name
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Events committed to this store, in append order. Lagging receivers
    /// miss events; the event log itself is the reliable source.
    pub fn new_events_subscribe(&self) -> broadcast::Receiver<EventLogEntry> {
        self.new_events_tx.subscribe()
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        tokio::task::block_in_place(|| {
            let conn = self.conn.lock().expect("Locking failed");
            f(&conn)
        })
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&WriteTransactionCtx) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _permit = self
            .write_permit
            .acquire()
            .await
            .expect("Semaphore never closed");
        tokio::task::block_in_place(|| {
            let mut conn = self.conn.lock().expect("Locking failed");
            let tx = conn.transaction().context(DatabaseSnafu)?;
            let ctx = WriteTransactionCtx::from(tx);
            let res = f(&ctx)?;
            ctx.commit().context(DatabaseSnafu)?;
            Ok(res)
        })
    }
}
