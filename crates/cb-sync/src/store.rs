//! Extension state store
//!
//! Per-target distribution state plus the in-progress marker set. State is
//! persisted before it becomes visible: readers see either the previous
//! committed value or the new one, never a write that failed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use cb_core::target::{DistributionTarget, TargetMask};
use cb_core::types::DistributionState;

use crate::error::{Result, SyncError};

// =============================================================================
// Persistence
// =============================================================================

#[async_trait]
pub trait StatePersistence: Send + Sync {
    async fn load_all(&self) -> Result<BTreeMap<DistributionTarget, DistributionState>>;
    async fn save(&self, target: DistributionTarget, state: &DistributionState) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// One JSON file per target. Writes go to a temporary file that is renamed
/// over the old one.
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, target: DistributionTarget) -> PathBuf {
        self.dir.join(format!("{}.json", target.id()))
    }
}

#[async_trait]
impl StatePersistence for FilePersistence {
    async fn load_all(&self) -> Result<BTreeMap<DistributionTarget, DistributionState>> {
        let mut states = BTreeMap::new();
        for target in DistributionTarget::ALL {
            let path = self.path(target);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<DistributionState>(&bytes) {
                Ok(state) => {
                    states.insert(target, state);
                }
                Err(e) => log::warn!("Ignoring unreadable state {}: {}", path.display(), e),
            }
        }
        Ok(states)
    }

    async fn save(&self, target: DistributionTarget, state: &DistributionState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(target);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        for target in DistributionTarget::ALL {
            match tokio::fs::remove_file(self.path(target)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// In-memory persistence that can be switched to fail every write.
#[derive(Default)]
pub struct MemoryPersistence {
    states: Mutex<BTreeMap<DistributionTarget, DistributionState>>,
    failing: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn saved(&self, target: DistributionTarget) -> Option<DistributionState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .cloned()
    }
}

#[async_trait]
impl StatePersistence for MemoryPersistence {
    async fn load_all(&self) -> Result<BTreeMap<DistributionTarget, DistributionState>> {
        Ok(self.states.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn save(&self, target: DistributionTarget, state: &DistributionState) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence(format!("write for {target} rejected")));
        }
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, state.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct ExtensionStateStore {
    persistence: Arc<dyn StatePersistence>,
    states: RwLock<BTreeMap<DistributionTarget, DistributionState>>,
    in_progress: AtomicU8,
    /// Serializes persist-then-swap sequences
    write_lock: tokio::sync::Mutex<()>,
}

impl ExtensionStateStore {
    /// Hydrate the store from `persistence`.
    pub async fn open(persistence: Arc<dyn StatePersistence>) -> Result<Self> {
        let states = persistence.load_all().await?;
        log::debug!("Loaded state for {} targets", states.len());
        Ok(Self {
            persistence,
            states: RwLock::new(states),
            in_progress: AtomicU8::new(0),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get_state(&self, target: DistributionTarget) -> Option<DistributionState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .cloned()
    }

    /// Committed state of every target that has one.
    pub fn snapshot(&self) -> BTreeMap<DistributionTarget, DistributionState> {
        self.states.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_in_progress(&self, target: DistributionTarget) -> bool {
        self.in_progress_targets().contains(TargetMask::from(target))
    }

    pub fn in_progress_targets(&self) -> TargetMask {
        TargetMask::from_bits_truncate(self.in_progress.load(Ordering::SeqCst))
    }

    /// Not persisted: a restart clears every marker.
    pub fn set_in_progress(&self, target: DistributionTarget, in_progress: bool) {
        let bit = TargetMask::from(target).bits();
        if in_progress {
            self.in_progress.fetch_or(bit, Ordering::SeqCst);
        } else {
            self.in_progress.fetch_and(!bit, Ordering::SeqCst);
        }
    }

    /// Persist `state`, then make it visible. Returns `false` and keeps the
    /// previous value when the write fails.
    pub async fn update_state(&self, target: DistributionTarget, state: DistributionState) -> bool {
        self.update_with(target, |_| state).await
    }

    /// Derive the next state from the committed one and store it like
    /// [`update_state`](Self::update_state). Concurrent updates of one
    /// target are applied one after another.
    pub async fn update_with<F>(&self, target: DistributionTarget, update: F) -> bool
    where
        F: FnOnce(&DistributionState) -> DistributionState + Send,
    {
        let _guard = self.write_lock.lock().await;
        let current = self.get_state(target).unwrap_or_default();
        let next = update(&current);

        match self.persistence.save(target, &next).await {
            Ok(()) => {
                self.states
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(target, next);
                true
            }
            Err(e) => {
                log::error!("Failed to persist state for {}: {}", target, e);
                false
            }
        }
    }

    /// Drop every stored state and marker. The only deletion path.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persistence.clear().await?;
        self.states.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.in_progress.store(0, Ordering::SeqCst);
        log::info!("Distribution state reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cb_core::types::ErrorKind;

    use super::*;

    fn applied(count: usize) -> DistributionState {
        DistributionState {
            last_applied_rule_count: count,
            last_reload_succeeded: true,
            ..Default::default()
        }
    }

    async fn memory_store() -> (Arc<MemoryPersistence>, ExtensionStateStore) {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = ExtensionStateStore::open(persistence.clone())
            .await
            .expect("memory store should open");
        (persistence, store)
    }

    #[tokio::test]
    async fn update_commits_after_persisting() {
        let (persistence, store) = memory_store().await;
        assert_eq!(store.get_state(DistributionTarget::General), None);

        assert!(store.update_state(DistributionTarget::General, applied(10)).await);
        assert_eq!(store.get_state(DistributionTarget::General), Some(applied(10)));
        assert_eq!(persistence.saved(DistributionTarget::General), Some(applied(10)));
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_state() {
        let (persistence, store) = memory_store().await;
        assert!(store.update_state(DistributionTarget::Privacy, applied(5)).await);

        persistence.set_failing(true);
        assert!(!store.update_state(DistributionTarget::Privacy, applied(7)).await);
        assert_eq!(store.get_state(DistributionTarget::Privacy), Some(applied(5)));
    }

    #[tokio::test]
    async fn update_with_sees_committed_state() {
        let (_, store) = memory_store().await;
        let over_limit = DistributionState {
            last_error: Some(ErrorKind::CompilationOverLimit),
            ..applied(50_000)
        };
        store.update_state(DistributionTarget::General, over_limit).await;

        store
            .update_with(DistributionTarget::General, |state| state.with_reload_outcome(false))
            .await;
        let state = store.get_state(DistributionTarget::General).expect("state");
        assert_eq!(state.last_applied_rule_count, 50_000);
        assert_eq!(state.last_error, Some(ErrorKind::HostReloadFailure));
    }

    #[tokio::test]
    async fn in_progress_markers_are_per_target() {
        let (_, store) = memory_store().await;
        store.set_in_progress(DistributionTarget::Security, true);
        store.set_in_progress(DistributionTarget::Custom, true);
        assert!(store.is_in_progress(DistributionTarget::Security));
        assert!(!store.is_in_progress(DistributionTarget::General));

        store.set_in_progress(DistributionTarget::Security, false);
        assert!(!store.is_in_progress(DistributionTarget::Security));
        assert_eq!(store.in_progress_targets(), TargetMask::CUSTOM);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let (persistence, store) = memory_store().await;
        store.update_state(DistributionTarget::Other, applied(1)).await;
        store.set_in_progress(DistributionTarget::Other, true);

        store.reset().await.expect("reset");
        assert!(store.snapshot().is_empty());
        assert!(!store.is_in_progress(DistributionTarget::Other));
        assert_eq!(persistence.saved(DistributionTarget::Other), None);
    }

    #[tokio::test]
    async fn file_persistence_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let persistence = Arc::new(FilePersistence::new(dir.path().join("state")));
        let store = ExtensionStateStore::open(persistence.clone()).await.expect("open");
        assert!(store.update_state(DistributionTarget::Advanced, applied(3)).await);
        assert!(persistence.dir().join("advanced.json").exists());

        let reopened = ExtensionStateStore::open(Arc::new(FilePersistence::new(dir.path().join("state"))))
            .await
            .expect("reopen");
        assert_eq!(reopened.get_state(DistributionTarget::Advanced), Some(applied(3)));
        assert_eq!(reopened.get_state(DistributionTarget::General), None);
    }

    #[tokio::test]
    async fn unreadable_state_file_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("general.json"), "{ not json").expect("write");
        let store = ExtensionStateStore::open(Arc::new(FilePersistence::new(dir.path())))
            .await
            .expect("open");
        assert!(store.snapshot().is_empty());
    }
}
