//! One-shot node priming: wait for a freshly started node to accept
//! connections, then preload the derived dev accounts with ether.

use crate::BackendError;
use alloy_primitives::U256;
use alloy_signer_local::{MnemonicBuilder, coins_bip39::English};
use chainyard_rpc::{
    request::{Id, RpcMethodCall},
    response::RpcResponse,
};
use chainyard_types::LaunchNodeSpec;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cadence of the liveness probe
const PROBE_INTERVAL: Duration = Duration::from_millis(100);
/// Give up on a node that stays unreachable this long
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Blocks until the node at `url` answers, then sets the balance of the
/// first `accounts` derived addresses to `balance` ether.
pub(crate) async fn prime_node(
    client: &reqwest::Client,
    url: &str,
    spec: &LaunchNodeSpec,
) -> Result<(), BackendError> {
    wait_until_live(client, url).await?;

    let balance = format!("{:#x}", to_wei(spec.balance()));
    for index in 0..spec.accounts() {
        let address = derive_address(spec.mnemonic(), spec.derivation_path(), index)?;
        debug!(url, %address, "seeding balance");
        rpc_call(client, url, "anvil_setBalance", json!([address, balance])).await?;
    }
    Ok(())
}

async fn wait_until_live(client: &reqwest::Client, url: &str) -> Result<(), BackendError> {
    let deadline = Instant::now() + PROBE_TIMEOUT;
    loop {
        if rpc_call(client, url, "web3_clientVersion", serde_json::Value::Null).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(BackendError::NodeUnresponsive(url.to_string()));
        }
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}

async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &'static str,
    params: serde_json::Value,
) -> Result<serde_json::Value, BackendError> {
    let call = RpcMethodCall::new(Id::Number(1), method, params);
    let response: RpcResponse = client.post(url).json(&call).send().await?.json().await?;
    response.into_result().map_err(|error| BackendError::Admin { method, error })
}

/// BIP-39 seed → BIP-32 child key along `<derivation_path><index>`.
fn derive_address(
    mnemonic: &str,
    derivation_path: &str,
    index: u32,
) -> Result<String, BackendError> {
    let signer = MnemonicBuilder::<English>::default()
        .phrase(mnemonic)
        .derivation_path(format!("{derivation_path}{index}"))
        .map_err(|err| BackendError::Derivation(err.to_string()))?
        .build()
        .map_err(|err| BackendError::Derivation(err.to_string()))?;
    Ok(signer.address().to_string())
}

fn to_wei(ether: u64) -> U256 {
    U256::from(ether) * U256::from(10u64).pow(U256::from(18u64))
}
