//! Container fabric backends: launching node/daemon containers for an
//! instance, discovering their endpoints, and tearing them down again.

use chainyard_store::{Store, StoreError};
use chainyard_types::{
    CreateInstanceRequest, DaemonEndpoint, InstanceRecord, NodeEndpoint, generate_external_id,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::info;

mod docker;
mod kubernetes;
mod primer;

pub use docker::DockerBackend;
pub use kubernetes::KubernetesBackend;

/// Errors surfaced by fabric operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Docker(#[from] docker_api::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("node at {0} never became reachable")]
    NodeUnresponsive(String),
    #[error("admin call {method} rejected: {error}")]
    Admin { method: &'static str, error: chainyard_rpc::error::RpcError },
    #[error("failed to derive account: {0}")]
    Derivation(String),
    #[error("{0}")]
    Fabric(String),
}

/// A container fabric that can start and remove the containers of one
/// instance. The registration/rollback protocol lives in
/// [`InstanceManager`]; implementations only talk to the fabric.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Starts every node and daemon container of `request`, waits for the
    /// nodes to come up, seeds their balances, and returns the populated
    /// record (fresh external id, `expires_at = now + timeout`).
    async fn provision(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRecord, BackendError>;

    /// Best-effort removal of every named resource of the instance.
    /// Missing resources are fine; other failures are logged and skipped.
    async fn cleanup(&self, instance_id: &str, node_ids: &[String], daemon_ids: &[String]);
}

/// Errors of the full launch protocol.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("instance already exists")]
    AlreadyExists,
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<StoreError> for LaunchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists => Self::AlreadyExists,
            other => Self::Store(other),
        }
    }
}

/// Drives instance lifecycle against a [`Store`] and a [`Backend`]: the
/// store row is the source of truth, fabric cleanup is best-effort.
#[derive(Clone)]
pub struct InstanceManager {
    store: Arc<dyn Store>,
    backend: Arc<dyn Backend>,
}

impl InstanceManager {
    pub fn new(store: Arc<dyn Store>, backend: Arc<dyn Backend>) -> Self {
        Self { store, backend }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Launches the instance: idempotency check, fabric provisioning,
    /// registration. Any failure past provisioning tears the fabric
    /// resources down before the error is returned; no partial record is
    /// ever persisted.
    pub async fn launch(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRecord, LaunchError> {
        if self.store.get(&request.instance_id).await?.is_some() {
            return Err(LaunchError::AlreadyExists);
        }

        let record = match self.backend.provision(request).await {
            Ok(record) => record,
            Err(err) => {
                self.rollback(request).await;
                return Err(err.into());
            }
        };

        if let Err(err) = self.store.register(&record).await {
            // lost a creation race after provisioning
            self.rollback(request).await;
            return Err(err.into());
        }

        info!(instance_id = %record.instance_id, external_id = %record.external_id, "instance launched");
        Ok(record)
    }

    /// Kills the instance: the record is unregistered first, then the
    /// fabric resources are swept. Returns the removed record, `None` when
    /// nothing was registered under `instance_id`.
    pub async fn kill(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let Some(record) = self.store.unregister(instance_id).await? else {
            return Ok(None);
        };

        let node_ids: Vec<String> = record.anvil_instances.keys().cloned().collect();
        let daemon_ids: Vec<String> = record.daemon_instances.keys().cloned().collect();
        self.backend.cleanup(instance_id, &node_ids, &daemon_ids).await;

        info!(%instance_id, "instance killed");
        Ok(Some(record))
    }

    async fn rollback(&self, request: &CreateInstanceRequest) {
        let node_ids: Vec<String> = request.anvil_instances.keys().cloned().collect();
        let daemon_ids: Vec<String> = request.daemon_instances.keys().cloned().collect();
        self.backend.cleanup(&request.instance_id, &node_ids, &daemon_ids).await;
    }
}

/// Assembles the record for a freshly provisioned instance.
pub(crate) fn assemble_record(
    request: &CreateInstanceRequest,
    anvil_instances: BTreeMap<String, NodeEndpoint>,
    daemon_instances: BTreeMap<String, DaemonEndpoint>,
) -> InstanceRecord {
    let now = chrono::Utc::now().timestamp() as u64;
    InstanceRecord {
        instance_id: request.instance_id.clone(),
        external_id: generate_external_id(),
        created_at: now,
        expires_at: now + request.timeout,
        anvil_instances,
        daemon_instances,
        metadata: BTreeMap::new(),
    }
}

/// Which fabric to drive.
#[derive(Clone, Debug)]
pub enum BackendConfig {
    Docker { network: String },
    Kubernetes { namespace: String },
}

/// Connects to the configured fabric.
pub async fn open_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>, BackendError> {
    match config {
        BackendConfig::Docker { network } => Ok(Arc::new(DockerBackend::connect(network.clone()))),
        BackendConfig::Kubernetes { namespace } => {
            Ok(Arc::new(KubernetesBackend::connect(namespace).await?))
        }
    }
}
