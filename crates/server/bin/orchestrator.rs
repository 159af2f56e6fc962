//! Control-plane entrypoint: instance lifecycle API plus the expiry reaper.

use chainyard_backend::{InstanceManager, open_backend};
use chainyard_server::{
    config::{BackendArgs, StoreArgs},
    init_tracing, orchestrator, reaper,
    worker::FirstWorker,
};
use chainyard_store::open_store;
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "chainyard-orchestrator", version, about = "Instance orchestrator API")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "ORCHESTRATOR_LISTEN", default_value = "0.0.0.0:7283")]
    listen: SocketAddr,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    backend: BackendArgs,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let args = Args::parse();

    let store = open_store(&args.store.store_config()).await?;
    let backend = open_backend(&args.backend.backend_config()).await?;
    let manager = InstanceManager::new(store, backend);

    let worker = FirstWorker::acquire("orchestrator")?;
    if worker.is_first() {
        info!("elected first worker, starting reaper");
        reaper::spawn_reaper(manager.clone());
    } else {
        info!("reaper owned by another worker");
    }

    let app = orchestrator::orchestrator_app(manager);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, "orchestrator listening");
    axum::serve(listener, app).await?;
    Ok(())
}
