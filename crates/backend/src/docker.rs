//! Local container daemon fabric.

use crate::{Backend, BackendError, assemble_record, primer::prime_node};
use chainyard_types::{
    CreateInstanceRequest, DaemonEndpoint, InstanceRecord, NODE_PORT, NodeEndpoint, node_command,
};
use docker_api::{
    Docker,
    opts::{ContainerCreateOpts, VolumeCreateOpts},
};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Fabric backed by the local docker daemon. Node and daemon containers of
/// an instance are named `<instance_id>-<id>`, share one user network, and
/// node containers mount the per-instance volume `<instance_id>` at `/data`.
pub struct DockerBackend {
    docker: Docker,
    network: String,
    http: reqwest::Client,
}

impl DockerBackend {
    /// Connects to the daemon socket; containers are attached to `network`.
    pub fn connect(network: String) -> Self {
        Self {
            docker: Docker::unix("/var/run/docker.sock"),
            network,
            http: reqwest::Client::new(),
        }
    }

    async fn node_ip(&self, container_name: &str) -> Result<String, BackendError> {
        let inspect = self.docker.containers().get(container_name).inspect().await?;
        inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|mut networks| networks.remove(&self.network))
            .and_then(|endpoint| endpoint.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                BackendError::Fabric(format!(
                    "container {container_name} has no address on network {}",
                    self.network
                ))
            })
    }

    async fn try_delete_container(&self, name: &str) {
        let container = self.docker.containers().get(name);
        match container.kill(None).await {
            Ok(()) => {}
            // missing container, nothing to remove
            Err(err) if is_status(&err, 404) => return,
            // conflict = container not running, which is fine
            Err(err) if is_status(&err, 409) => {}
            Err(err) => warn!(%name, %err, "failed to kill container"),
        }

        info!(%name, "deleting container");
        if let Err(err) = container.delete().await {
            if !is_status(&err, 404) {
                warn!(%name, %err, "failed to delete container");
            }
        }
    }

    async fn try_delete_volume(&self, name: &str) {
        info!(%name, "deleting volume");
        if let Err(err) = self.docker.volumes().get(name).delete().await {
            if !is_status(&err, 404) {
                warn!(%name, %err, "failed to delete volume");
            }
        }
    }
}

fn is_status(err: &docker_api::Error, status: u16) -> bool {
    matches!(err, docker_api::Error::Fault { code, .. } if code.as_u16() == status)
}

#[async_trait::async_trait]
impl Backend for DockerBackend {
    async fn provision(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRecord, BackendError> {
        let instance_id = &request.instance_id;

        self.docker
            .volumes()
            .create(&VolumeCreateOpts::builder().name(instance_id).build())
            .await?;

        for (node_id, spec) in &request.anvil_instances {
            let name = format!("{instance_id}-{node_id}");
            info!(%name, image = spec.image(), "starting node container");
            let opts = ContainerCreateOpts::builder()
                .name(&name)
                .image(spec.image())
                .network_mode(&self.network)
                .entrypoint(["sh", "-c"])
                .command([node_command(spec)])
                .volumes([format!("{instance_id}:/data")])
                .build();
            let container = self.docker.containers().create(&opts).await?;
            container.start().await?;
        }

        for (daemon_id, daemon) in &request.daemon_instances {
            let name = format!("{instance_id}-{daemon_id}");
            info!(%name, image = %daemon.image, "starting daemon container");
            let opts = ContainerCreateOpts::builder()
                .name(&name)
                .image(&daemon.image)
                .network_mode(&self.network)
                .env([format!("INSTANCE_ID={instance_id}")])
                .build();
            let container = self.docker.containers().create(&opts).await?;
            container.start().await?;
        }

        let mut anvil_instances = BTreeMap::new();
        for (node_id, spec) in &request.anvil_instances {
            let name = format!("{instance_id}-{node_id}");
            let ip = self.node_ip(&name).await?;

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
            self.try_delete_container(&format!("{instance_id}-{id}")).await;
        }
        self.try_delete_volume(instance_id).await;
    }
}
