//! Cluster scheduler fabric: one pod per node/daemon.

use crate::{Backend, BackendError, assemble_record, primer::prime_node};
use chainyard_types::{
    CreateInstanceRequest, DaemonEndpoint, InstanceRecord, NODE_PORT, NodeEndpoint, node_command,
};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client,
    api::{DeleteParams, PostParams},
};
use serde_json::json;
use std::{collections::BTreeMap, time::Duration};
use tokio::time::Instant;
use tracing::{info, warn};

const INSTANCE_LABEL: &str = "chainyard/instance";

/// Interval for polling a pending pod's address
const IP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Give up on a pod that is not scheduled within this long
const IP_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Fabric backed by a kubernetes cluster. Every node and daemon runs as a
/// pod named `<instance_id>-<id>` in one namespace; node pods get a
/// pod-local scratch volume at `/data` and are reached via their pod IP.
pub struct KubernetesBackend {
    pods: Api<Pod>,
    http: reqwest::Client,
}

impl KubernetesBackend {
    /// Builds a client from the environment (in-cluster config or
    /// `KUBECONFIG`) scoped to `namespace`.
    pub async fn connect(namespace: &str) -> Result<Self, BackendError> {
        let client = Client::try_default().await?;
        Ok(Self { pods: Api::namespaced(client, namespace), http: reqwest::Client::new() })
    }

    fn node_pod(
        instance_id: &str,
        name: &str,
        spec: &chainyard_types::LaunchNodeSpec,
    ) -> Result<Pod, BackendError> {
        Ok(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "labels": { (INSTANCE_LABEL): instance_id },
            },
            "spec": {
                "restartPolicy": "Always",
                "containers": [{
                    "name": "node",
                    "image": spec.image(),
                    "command": ["sh", "-c", node_command(spec)],
                    "ports": [{ "containerPort": NODE_PORT }],
                    "volumeMounts": [{ "name": "data", "mountPath": "/data" }],
                }],
                "volumes": [{ "name": "data", "emptyDir": {} }],
            },
        }))?)
    }

    fn daemon_pod(instance_id: &str, name: &str, image: &str) -> Result<Pod, BackendError> {
        Ok(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "labels": { (INSTANCE_LABEL): instance_id },
            },
            "spec": {
                "restartPolicy": "Always",
                "containers": [{
                    "name": "daemon",
                    "image": image,
                    "env": [{ "name": "INSTANCE_ID", "value": instance_id }],
                }],
            },
        }))?)
    }

    async fn pod_ip(&self, name: &str) -> Result<String, BackendError> {
        let deadline = Instant::now() + IP_POLL_TIMEOUT;
        loop {
            let pod = self.pods.get(name).await?;
            if let Some(ip) = pod.status.and_then(|status| status.pod_ip) {
                return Ok(ip);
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Fabric(format!("pod {name} was never assigned an ip")));
            }
            tokio::time::sleep(IP_POLL_INTERVAL).await;
        }
    }

    async fn try_delete_pod(&self, name: &str) {
        info!(%name, "deleting pod");
        match self.pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(response)) if response.code == 404 => {}
            Err(err) => warn!(%name, %err, "failed to delete pod"),
        }
    }
}

#[async_trait::async_trait]
impl Backend for KubernetesBackend {
    async fn provision(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRecord, BackendError> {
        let instance_id = &request.instance_id;
        let params = PostParams::default();

        for (node_id, spec) in &request.anvil_instances {
            let name = format!("{instance_id}-{node_id}");
            info!(%name, image = spec.image(), "creating node pod");
            self.pods.create(&params, &Self::node_pod(instance_id, &name, spec)?).await?;
        }

        for (daemon_id, daemon) in &request.daemon_instances {
            let name = format!("{instance_id}-{daemon_id}");
            info!(%name, image = %daemon.image, "creating daemon pod");
            self.pods.create(&params, &Self::daemon_pod(instance_id, &name, &daemon.image)?).await?;
        }

        let mut anvil_instances = BTreeMap::new();
        for (node_id, spec) in &request.anvil_instances {
            let name = format!("{instance_id}-{node_id}");
            let ip = self.pod_ip(&name).await?;

            prime_node(&self.http, &format!("http://{ip}:{NODE_PORT}"), spec).await?;

            anvil_instances.insert(
                node_id.clone(),
                NodeEndpoint {
                    id: node_id.clone(),
                    ip,
                    port: NODE_PORT,
                    extra_allowed_methods: spec.extra_allowed_methods.clone(),
                },
            );
        }

        let daemon_instances = request
            .daemon_instances
            .keys()
            .map(|daemon_id| (daemon_id.clone(), DaemonEndpoint { id: daemon_id.clone() }))
            .collect();

        Ok(assemble_record(request, anvil_instances, daemon_instances))
    }

    async fn cleanup(&self, instance_id: &str, node_ids: &[String], daemon_ids: &[String]) {
        for id in node_ids.iter().chain(daemon_ids) {
            self.try_delete_pod(&format!("{instance_id}-{id}")).await;
        }
    }
}
