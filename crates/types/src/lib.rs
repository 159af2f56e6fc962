//! Data model for ephemeral challenge instances: launch requests, the
//! persisted instance record, and the node command translation.

use rand::Rng;

mod launch;
mod metadata;
mod record;

pub use launch::{CreateInstanceRequest, DaemonSpec, LaunchNodeSpec, node_command};
pub use metadata::{MetadataValue, NamedContract};
pub use record::{DaemonEndpoint, InstanceRecord, NodeEndpoint};

/// Port every node listens on inside its container
pub const NODE_PORT: u16 = 8545;

/// Default number of funded dev accounts per node
pub const DEFAULT_ACCOUNTS: u32 = 2;

/// Default balance of every funded account, in ether
pub const DEFAULT_BALANCE: u64 = 1000;

/// Default mnemonic for dev accounts
pub const DEFAULT_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Default derivation path prefix for dev accounts
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/";

/// Default node container image
pub const DEFAULT_IMAGE: &str = "ghcr.io/foundry-rs/foundry:latest";

/// Length of the public instance handle
pub const EXTERNAL_ID_LEN: usize = 24;

/// Generates a fresh external instance handle: [`EXTERNAL_ID_LEN`] random
/// ascii-alphabetic chars from an OS-seeded CSPRNG.
pub fn generate_external_id() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..EXTERNAL_ID_LEN).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_shape() {
        let id = generate_external_id();
        assert_eq!(id.len(), EXTERNAL_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn external_ids_differ() {
        assert_ne!(generate_external_id(), generate_external_id());
    }
}
