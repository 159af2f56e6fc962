//! The two chainyard services: the control-plane orchestrator API and the
//! data-plane filtering JSON-RPC proxy, plus the expiry reaper and the
//! first-worker election they share.

pub mod config;
pub mod orchestrator;
pub mod proxy;
pub mod reaper;
pub mod worker;

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber, honoring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
