//! The store manager: creates, opens, lists and deletes named stores under
//! one root directory, caching one open handle per name.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use skygent_core::{StoreName, Timestamp};
use snafu::{ResultExt as _, Snafu};
use tokio::sync::RwLock;
use tracing::info;

use crate::{LOG_TARGET, STORE_DB_FILE, Store, StoreError};

#[derive(Debug, Snafu)]
pub enum StoreManagerError {
    #[snafu(display("Store `{name}` not found"))]
    StoreNotFound { name: StoreName },
    #[snafu(display("Store `{name}` already exists"))]
    StoreAlreadyExists { name: StoreName },
    #[snafu(transparent)]
    Store { source: StoreError },
    #[snafu(display("Store root I/O error at {}", path.display()))]
    RootIo { source: io::Error, path: PathBuf },
}

pub type StoreManagerResult<T> = std::result::Result<T, StoreManagerError>;

pub struct StoreManager {
    root: PathBuf,
    inner: RwLock<HashMap<StoreName, Arc<Store>>>,
}

impl StoreManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: RwLock::new(Default::default()),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn stores_dir(&self) -> PathBuf {
        self.root.join("stores")
    }

    pub fn store_dir(&self, name: &StoreName) -> PathBuf {
        self.stores_dir().join(name.as_str())
    }

    fn db_path(&self, name: &StoreName) -> PathBuf {
        self.store_dir(name).join(STORE_DB_FILE)
    }

    pub async fn create(&self, name: &StoreName) -> StoreManagerResult<Arc<Store>> {
        let dir = self.store_dir(name);
        if dir.exists() {
            return StoreAlreadyExistsSnafu { name: name.clone() }.fail();
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .context(RootIoSnafu { path: dir })?;

        let store = Arc::new(Store::open(name.clone(), self.db_path(name)).await?);
        store
            .write_with(|tx| {
                use snafu::ResultExt as _;
                tx.execute(
                    "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('created_at', ?1)",
                    [Timestamp::now().to_rfc3339()],
                )
                .context(crate::DatabaseSnafu)?;
                Ok(())
            })
            .await?;

        self.inner
            .write()
            .await
            .insert(name.clone(), store.clone());
        info!(target: LOG_TARGET, store = %name, "Created store");
        Ok(store)
    }

    /// Open (or fetch the cached handle of) an existing store.
    pub async fn open(&self, name: &StoreName) -> StoreManagerResult<Arc<Store>> {
        let mut write = self.inner.write().await;
        if let Some(store) = write.get(name) {
            return Ok(store.clone());
        }

        if !self.db_path(name).exists() {
            return StoreNotFoundSnafu { name: name.clone() }.fail();
        }

        let store = Arc::new(Store::open(name.clone(), self.db_path(name)).await?);
        write.insert(name.clone(), store.clone());
        Ok(store)
    }

    /// Drop the cached handle (closing the connection once the last user
    /// releases it).
    pub async fn remove_client(&self, name: &StoreName) {
        self.inner.write().await.remove(name);
    }

    /// Stores are discovered by enumerating the `stores/` directory.
    pub async fn list(&self) -> StoreManagerResult<Vec<StoreName>> {
        let dir = self.stores_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .context(RootIoSnafu { path: dir.clone() })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context(RootIoSnafu { path: dir.clone() })?
        {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<StoreName>().ok())
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a store and every artefact it owns.
    pub async fn delete(&self, name: &StoreName) -> StoreManagerResult<()> {
        let dir = self.store_dir(name);
        if !dir.exists() {
            return StoreNotFoundSnafu { name: name.clone() }.fail();
        }

        // Drop our cached handle first so the file is released promptly on
        // platforms that care.
        self.inner.write().await.remove(name);

        tokio::fs::remove_dir_all(&dir)
            .await
            .context(RootIoSnafu { path: dir })?;
        info!(target: LOG_TARGET, store = %name, "Deleted store");
        Ok(())
    }

    /// Total bytes on disk under the store's directory.
    pub async fn store_disk_usage(&self, name: &StoreName) -> StoreManagerResult<u64> {
        let dir = self.store_dir(name);
        if !dir.exists() {
            return StoreNotFoundSnafu { name: name.clone() }.fail();
        }
        dir_size(dir).await
    }
}

async fn dir_size(dir: PathBuf) -> StoreManagerResult<u64> {
    let mut total = 0u64;
    let mut pending = vec![dir];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .context(RootIoSnafu { path: dir.clone() })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context(RootIoSnafu { path: dir.clone() })?
        {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}
