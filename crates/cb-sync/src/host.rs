//! Host and payload storage seams
//!
//! The platform that loads payloads into the sandboxed extensions is a
//! collaborator behind [`ContentBlockerHost`]. Compiled payloads reach it
//! through [`RulesStorage`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use cb_compiler::Payload;
use cb_core::target::DistributionTarget;

use crate::error::{Result, SyncError};

/// Asks the host to reload one target from its stored payload.
///
/// Resolves when the host reports the outcome; the host's own timeout
/// bounds the wait.
#[async_trait]
pub trait ContentBlockerHost: Send + Sync {
    async fn reload(&self, target: DistributionTarget) -> Result<()>;
}

#[async_trait]
pub trait RulesStorage: Send + Sync {
    async fn save_payload(&self, target: DistributionTarget, payload: &Payload) -> Result<()>;
    async fn load_payload(&self, target: DistributionTarget) -> Result<Option<String>>;
}

/// Payload files under one directory, named after the target id.
pub struct DirectoryStorage {
    dir: PathBuf,
}

impl DirectoryStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, target: DistributionTarget) -> PathBuf {
        self.dir.join(format!("{}.json", target.id()))
    }
}

#[async_trait]
impl RulesStorage for DirectoryStorage {
    async fn save_payload(&self, target: DistributionTarget, payload: &Payload) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(target);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload.as_str()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        log::debug!("Saved {} payload to {}", target, path.display());
        Ok(())
    }

    async fn load_payload(&self, target: DistributionTarget) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path(target)).await {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryRulesStorage {
    payloads: Mutex<BTreeMap<DistributionTarget, String>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryRulesStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn payload(&self, target: DistributionTarget) -> Option<String> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .cloned()
    }
}

#[async_trait]
impl RulesStorage for MemoryRulesStorage {
    async fn save_payload(&self, target: DistributionTarget, payload: &Payload) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence(format!("payload write for {target} rejected")));
        }
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, payload.as_str().to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_payload(&self, target: DistributionTarget) -> Result<Option<String>> {
        Ok(self.payload(target))
    }
}

#[cfg(test)]
mod tests {
    use cb_compiler::EMPTY_PAYLOAD;

    use super::*;

    #[tokio::test]
    async fn directory_storage_round_trips_payloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = DirectoryStorage::new(dir.path().join("rules"));

        assert_eq!(storage.load_payload(DistributionTarget::Privacy).await.expect("load"), None);

        let payload = Payload::RuleList(EMPTY_PAYLOAD.to_string());
        storage
            .save_payload(DistributionTarget::Privacy, &payload)
            .await
            .expect("save");
        assert!(storage.path(DistributionTarget::Privacy).ends_with("privacy.json"));
        assert_eq!(
            storage.load_payload(DistributionTarget::Privacy).await.expect("load").as_deref(),
            Some(EMPTY_PAYLOAD)
        );
    }

    #[tokio::test]
    async fn memory_storage_can_fail() {
        let storage = MemoryRulesStorage::new();
        storage.set_failing(true);
        let payload = Payload::ScriptBundle("[]".to_string());
        assert!(storage.save_payload(DistributionTarget::Advanced, &payload).await.is_err());
        assert_eq!(storage.save_count(), 0);
        assert_eq!(storage.payload(DistributionTarget::Advanced), None);
    }
}
