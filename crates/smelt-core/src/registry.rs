//! In-memory registry of finished compilations.
//!
//! The registry is the only owner of post-compilation state: each entry
//! holds a [`CompilationResult`] together with the request directory its
//! artifacts live in.
//!
//! The map lock only guards membership and is never held across file
//! system work. Each entry has its own lock: readers hold it for as long
//! as they use the entry's files, and removal unlinks the entry from the
//! map first, then deletes its files under the entry's write lock. A
//! reader therefore sees either the whole entry with its files or nothing.
//!
//! Request directories still being compiled are tracked as in flight
//! until their result is stored, so the orphan scan leaves them alone.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::paths::remove_dir_if_exists;
use crate::result::CompilationResult;

/// One stored compilation.
#[derive(Debug)]
pub struct RegistryEntry {
    pub compilation_id: String,
    pub result: CompilationResult,

    /// Cached archive, present under the eager archive policy.
    pub archive_path: Option<PathBuf>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Monotonic expiry used for eviction.
    expires: Instant,
}

impl RegistryEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires
    }

    /// Directory holding every artifact of this entry.
    pub fn root_dir(&self) -> &Path {
        &self.result.root_dir
    }
}

/// Read access to one entry. Its files stay in place until dropped.
pub type EntryGuard = OwnedRwLockReadGuard<Option<RegistryEntry>, RegistryEntry>;

/// Map value. `None` once the entry has been removed.
#[derive(Debug, Clone)]
struct Slot {
    root: PathBuf,
    expires: Instant,
    entry: Arc<RwLock<Option<RegistryEntry>>>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires
    }

    /// Wait for readers to finish, then drop the entry and its files.
    async fn remove(self) -> Result<()> {
        let mut entry = self.entry.write().await;
        entry.take();
        remove_dir_if_exists(&self.root).await
    }
}

/// What [`ArtifactRegistry::store_with_archive`] assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub compilation_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of evicting expired entries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Ids removed from the registry.
    pub removed: Vec<String>,

    /// Ids whose files could not be fully deleted. They are removed from
    /// the registry regardless.
    pub failed_deletes: Vec<String>,
}

/// A request directory marked in flight. Unmarked on drop.
#[derive(Debug)]
pub struct InFlight<'a> {
    registry: &'a ArtifactRegistry,
    root: PathBuf,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry.in_flight().remove(&self.root);
    }
}

/// Concurrent map from compilation id to [`RegistryEntry`].
#[derive(Debug)]
pub struct ArtifactRegistry {
    entries: RwLock<FxHashMap<String, Slot>>,
    in_flight: Mutex<FxHashSet<PathBuf>>,
    retention: Duration,
}

impl ArtifactRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            in_flight: Mutex::new(FxHashSet::default()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn in_flight(&self) -> MutexGuard<'_, FxHashSet<PathBuf>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `root` as owned by a request that has not been stored yet.
    ///
    /// Keep the returned guard alive until after the result is stored.
    pub fn claim(&self, root: impl Into<PathBuf>) -> InFlight<'_> {
        let root = root.into();
        self.in_flight().insert(root.clone());
        InFlight {
            registry: self,
            root,
        }
    }

    /// Take ownership of `result` and return its new compilation id.
    pub async fn store(&self, result: CompilationResult) -> String {
        self.store_with_archive(result, None).await.compilation_id
    }

    /// Like [`store`](Self::store), recording a prebuilt archive.
    pub async fn store_with_archive(
        &self,
        result: CompilationResult,
        archive_path: Option<PathBuf>,
    ) -> Stored {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or(chrono::Duration::MAX);
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let now = Instant::now();
        let expires = now.checked_add(self.retention).unwrap_or(now);
        let root = result.root_dir.clone();

        let mut entries = self.entries.write().await;
        let compilation_id = loop {
            let id = Uuid::new_v4().simple().to_string();
            if !entries.contains_key(&id) {
                break id;
            }
        };

        tracing::info!(
            "Stored compilation {} (request {}, {} modules)",
            compilation_id,
            result.request_id,
            result.succeeded_count()
        );

        let entry = RegistryEntry {
            compilation_id: compilation_id.clone(),
            result,
            archive_path,
            created_at,
            expires_at,
            expires,
        };
        entries.insert(
            compilation_id.clone(),
            Slot {
                root,
                expires,
                entry: Arc::new(RwLock::new(Some(entry))),
            },
        );
        Stored {
            compilation_id,
            created_at,
            expires_at,
        }
    }

    /// Look up a live entry.
    ///
    /// The returned guard keeps the entry and its files in place until it
    /// is dropped; removal of this entry waits for it, nothing else does.
    /// Expired entries that the sweeper has not reached yet are reported
    /// as not found.
    pub async fn get(&self, compilation_id: &str) -> Result<EntryGuard> {
        let now = Instant::now();
        let slot = self
            .entries
            .read()
            .await
            .get(compilation_id)
            .filter(|slot| !slot.is_expired(now))
            .cloned()
            .ok_or_else(|| Error::NotFound(compilation_id.to_string()))?;

        OwnedRwLockReadGuard::try_map(slot.entry.read_owned().await, Option::as_ref)
            .map_err(|_| Error::NotFound(compilation_id.to_string()))
    }

    /// Remove an entry and delete its files.
    ///
    /// An expired entry is reclaimed too but reported as not found.
    pub async fn delete(&self, compilation_id: &str) -> Result<()> {
        let now = Instant::now();
        let slot = self
            .entries
            .write()
            .await
            .remove(compilation_id)
            .ok_or_else(|| Error::NotFound(compilation_id.to_string()))?;
        let expired = slot.is_expired(now);

        if let Err(e) = slot.remove().await {
            tracing::warn!("Failed to delete files of {}: {}", compilation_id, e);
        }
        tracing::info!("Deleted compilation {}", compilation_id);

        if expired {
            return Err(Error::NotFound(compilation_id.to_string()));
        }
        Ok(())
    }

    /// Remove every entry expired at `now`, deleting its files.
    ///
    /// A failed file deletion is logged and does not stop the pass.
    pub async fn evict_expired(&self, now: Instant) -> Eviction {
        let expired: Vec<(String, Slot)> = {
            let mut entries = self.entries.write().await;
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, slot)| slot.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        let mut eviction = Eviction::default();
        for (id, slot) in expired {
            if let Err(e) = slot.remove().await {
                tracing::warn!("Failed to delete files of expired {}: {}", id, e);
                eviction.failed_deletes.push(id.clone());
            }
            tracing::debug!("Evicted compilation {}", id);
            eviction.removed.push(id);
        }
        eviction
    }

    /// Request directories owned by an entry or by a request in flight.
    pub async fn owned_dirs(&self) -> FxHashSet<PathBuf> {
        // In flight first: a claim is released only after its entry is in
        // the map, so reading the map second cannot miss it.
        let mut owned = self.in_flight().clone();
        owned.extend(
            self.entries
                .read()
                .await
                .values()
                .map(|slot| slot.root.clone()),
        );
        owned
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
