//! Data-plane entrypoint: the filtering JSON-RPC reverse proxy.

use chainyard_server::{config::StoreArgs, init_tracing, proxy};
use chainyard_store::open_store;
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "chainyard-proxy", version, about = "Filtering JSON-RPC reverse proxy")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "PROXY_LISTEN", default_value = "0.0.0.0:8545")]
    listen: SocketAddr,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let args = Args::parse();

    let store = open_store(&args.store.store_config()).await?;

    let app = proxy::proxy_app(store);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, "proxy listening");
    axum::serve(listener, app).await?;
    Ok(())
}
