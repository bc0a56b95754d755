//! Directory-backed host
//!
//! Stands in for the platform host: a reload reads the stored payload and
//! checks that a content blocker would accept it.

use std::sync::Arc;

use async_trait::async_trait;
use cb_core::target::DistributionTarget;
use cb_sync::{ContentBlockerHost, RulesStorage, SyncError};

pub struct DirectoryHost {
    storage: Arc<dyn RulesStorage>,
}

impl DirectoryHost {
    pub fn new(storage: Arc<dyn RulesStorage>) -> Self {
        Self { storage }
    }
}

fn rejected(target: DistributionTarget, reason: impl Into<String>) -> SyncError {
    SyncError::HostReload {
        target,
        reason: reason.into(),
    }
}

#[async_trait]
impl ContentBlockerHost for DirectoryHost {
    async fn reload(&self, target: DistributionTarget) -> cb_sync::Result<()> {
        let payload = self
            .storage
            .load_payload(target)
            .await?
            .ok_or_else(|| rejected(target, "no payload stored"))?;

        let entries: Vec<serde_json::Value> = serde_json::from_str(&payload)
            .map_err(|e| rejected(target, format!("payload is not a JSON list: {e}")))?;

        if target.is_content() {
            if entries.is_empty() {
                return Err(rejected(target, "empty rule list"));
            }
            if let Some(limit) = target.rule_limit() {
                if entries.len() > limit {
                    return Err(rejected(
                        target,
                        format!("{} rules over the {} limit", entries.len(), limit),
                    ));
                }
            }
        }

        tracing::info!("{}: host loaded {} entries", target, entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cb_compiler::{Payload, EMPTY_PAYLOAD};
    use cb_sync::MemoryRulesStorage;

    use super::*;

    async fn host_with(target: DistributionTarget, payload: Option<Payload>) -> DirectoryHost {
        let storage = Arc::new(MemoryRulesStorage::new());
        if let Some(payload) = payload {
            storage.save_payload(target, &payload).await.expect("save");
        }
        DirectoryHost::new(storage)
    }

    #[tokio::test]
    async fn accepts_empty_payload_placeholder() {
        let host = host_with(
            DistributionTarget::General,
            Some(Payload::RuleList(EMPTY_PAYLOAD.to_string())),
        )
        .await;
        assert!(host.reload(DistributionTarget::General).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_payloads() {
        let missing = host_with(DistributionTarget::Privacy, None).await;
        assert!(missing.reload(DistributionTarget::Privacy).await.is_err());

        let bare = host_with(
            DistributionTarget::Privacy,
            Some(Payload::RuleList("[]".to_string())),
        )
        .await;
        assert!(bare.reload(DistributionTarget::Privacy).await.is_err());

        let broken = host_with(
            DistributionTarget::Privacy,
            Some(Payload::RuleList("{".to_string())),
        )
        .await;
        assert!(broken.reload(DistributionTarget::Privacy).await.is_err());
    }

    #[tokio::test]
    async fn empty_bundle_is_fine_for_scripted_target() {
        let host = host_with(
            DistributionTarget::Advanced,
            Some(Payload::ScriptBundle("[]".to_string())),
        )
        .await;
        assert!(host.reload(DistributionTarget::Advanced).await.is_ok());
    }
}
