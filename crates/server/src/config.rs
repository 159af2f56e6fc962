//! Shared CLI/env configuration of the services.

use chainyard_backend::BackendConfig;
use chainyard_store::StoreConfig;
use clap::{Args, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StoreKind {
    Sqlite,
    Redis,
}

/// Registry selection, `DATABASE` / `SQLITE_PATH` / `REDIS_URL`.
#[derive(Clone, Debug, Args)]
pub struct StoreArgs {
    /// Registry backend to persist instances in
    #[arg(long, env = "DATABASE", value_enum, default_value = "redis")]
    pub database: StoreKind,

    /// Path of the sqlite database
    #[arg(long, env = "SQLITE_PATH", default_value = ":memory:")]
    pub sqlite_path: String,

    /// Redis connection url
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    pub redis_url: String,
}

impl StoreArgs {
    pub fn store_config(&self) -> StoreConfig {
        match self.database {
            StoreKind::Sqlite => StoreConfig::Sqlite { path: self.sqlite_path.clone() },
            StoreKind::Redis => StoreConfig::Redis { url: self.redis_url.clone() },
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BackendKind {
    Docker,
    Kubernetes,
}

/// Fabric selection, `BACKEND` plus fabric-specific knobs. The kubernetes
/// client itself honors `KUBECONFIG`/in-cluster configuration.
#[derive(Clone, Debug, Args)]
pub struct BackendArgs {
    /// Container fabric that runs the instances
    #[arg(long, env = "BACKEND", value_enum, default_value = "docker")]
    pub backend: BackendKind,

    /// Docker network the instance containers join
    #[arg(long, env = "CHAINYARD_NETWORK", default_value = "chainyard")]
    pub network: String,

    /// Kubernetes namespace the instance pods run in
    #[arg(long, env = "KUBE_NAMESPACE", default_value = "default")]
    pub namespace: String,
}

impl BackendArgs {
    pub fn backend_config(&self) -> BackendConfig {
        match self.backend {
            BackendKind::Docker => BackendConfig::Docker { network: self.network.clone() },
            BackendKind::Kubernetes => {
                BackendConfig::Kubernetes { namespace: self.namespace.clone() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        backend: BackendArgs,
    }

    #[test]
    fn defaults_select_redis_and_docker() {
        let cli = TestCli::parse_from(["test"]);
        assert!(matches!(cli.store.store_config(), StoreConfig::Redis { .. }));
        assert!(matches!(
            cli.backend.backend_config(),
            BackendConfig::Docker { ref network } if network == "chainyard"
        ));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--database",
            "sqlite",
            "--sqlite-path",
            "/tmp/chainyard.db",
            "--backend",
            "kubernetes",
            "--namespace",
            "ctf",
        ]);
        assert!(matches!(
            cli.store.store_config(),
            StoreConfig::Sqlite { ref path } if path == "/tmp/chainyard.db"
        ));
        assert!(matches!(
            cli.backend.backend_config(),
            BackendConfig::Kubernetes { ref namespace } if namespace == "ctf"
        ));
    }
}
