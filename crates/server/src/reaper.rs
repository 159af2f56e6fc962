//! Background expiry: kills every instance whose `expires_at` has passed.

use chainyard_backend::InstanceManager;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Reaper tick
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the reaper loop. Must run in exactly one process per
/// instance-set; see [`crate::worker::FirstWorker`].
pub fn spawn_reaper(manager: InstanceManager) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            ticker.tick().await;
            reap_once(&manager).await;
        }
    })
}

/// One sweep over the expiry index. Failures are logged and swallowed so
/// the loop never dies.
pub async fn reap_once(manager: &InstanceManager) {
    let now = chrono::Utc::now().timestamp() as u64;
    let expired = match manager.store().get_expired(now).await {
        Ok(expired) => expired,
        Err(err) => {
            warn!(%err, "failed to scan for expired instances");
            return;
        }
    };

    for record in expired {
        info!(instance_id = %record.instance_id, "pruning expired instance");
        if let Err(err) = manager.kill(&record.instance_id).await {
            warn!(instance_id = %record.instance_id, %err, "failed to prune instance");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainyard_backend::{Backend, BackendError};
    use chainyard_store::{Store, StoreError};
    use chainyard_types::{CreateInstanceRequest, InstanceRecord, generate_external_id};
    use parking_lot::Mutex;
    use std::{
        collections::BTreeMap,
        sync::Arc,
    };

    /// Minimal store with a working expiry index.
    #[derive(Default)]
    struct MemStore {
        records: Mutex<BTreeMap<String, InstanceRecord>>,
    }

    #[async_trait::async_trait]
    impl Store for MemStore {
        async fn register(&self, record: &InstanceRecord) -> Result<(), StoreError> {
            let mut records = self.records.lock();
            if records.contains_key(&record.instance_id) {
                return Err(StoreError::AlreadyExists);
            }
            records.insert(record.instance_id.clone(), record.clone());
            Ok(())
        }

        async fn unregister(
            &self,
            instance_id: &str,
        ) -> Result<Option<InstanceRecord>, StoreError> {
            Ok(self.records.lock().remove(instance_id))
        }

        async fn get(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
            Ok(self.records.lock().get(instance_id).cloned())
        }

        async fn get_by_external(
            &self,
            external_id: &str,
        ) -> Result<Option<InstanceRecord>, StoreError> {
            Ok(self
                .records
                .lock()
                .values()
                .find(|record| record.external_id == external_id)
                .cloned())
        }

        async fn get_expired(&self, now: u64) -> Result<Vec<InstanceRecord>, StoreError> {
            Ok(self
                .records
                .lock()
                .values()
                .filter(|record| record.expires_at <= now)
                .cloned()
                .collect())
        }

        async fn update_metadata(
            &self,
            _instance_id: &str,
            _patch: &BTreeMap<String, serde_json::Value>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct NullBackend;

    #[async_trait::async_trait]
    impl Backend for NullBackend {
        async fn provision(
            &self,
            _request: &CreateInstanceRequest,
        ) -> Result<InstanceRecord, BackendError> {
            unreachable!("the reaper never provisions")
        }

        async fn cleanup(&self, _instance_id: &str, _node_ids: &[String], _daemon_ids: &[String]) {
        }
    }

    fn record(instance_id: &str, expires_at: u64) -> InstanceRecord {
        InstanceRecord {
            instance_id: instance_id.to_string(),
            external_id: generate_external_id(),
            created_at: 0,
            expires_at,
            anvil_instances: BTreeMap::new(),
            daemon_instances: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn sweep_kills_only_expired_instances() {
        let store = Arc::new(MemStore::default());
        store.register(&record("stale", 1)).await.unwrap();
        store.register(&record("live", u64::MAX)).await.unwrap();

        let manager = InstanceManager::new(store.clone(), Arc::new(NullBackend));
        reap_once(&manager).await;

        assert!(store.get("stale").await.unwrap().is_none());
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_with_empty_index_is_a_noop() {
        let store = Arc::new(MemStore::default());
        let manager = InstanceManager::new(store.clone(), Arc::new(NullBackend));
        reap_once(&manager).await;
        assert!(store.get_expired(u64::MAX).await.unwrap().is_empty());
    }
}
