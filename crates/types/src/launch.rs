use crate::{
    DEFAULT_ACCOUNTS, DEFAULT_BALANCE, DEFAULT_DERIVATION_PATH, DEFAULT_IMAGE, DEFAULT_MNEMONIC,
    NODE_PORT,
};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap};

/// Request-time options for a single node.
///
/// Every field is optional on the wire; the accessors resolve the configured
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchNodeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts: Option<u32>,
    /// Balance of each funded account, in ether
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation_path: Option<String>,
    /// Upstream RPC to fork from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_allowed_methods: Option<Vec<String>>,
}

impl LaunchNodeSpec {
    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    pub fn accounts(&self) -> u32 {
        self.accounts.unwrap_or(DEFAULT_ACCOUNTS)
    }

    pub fn balance(&self) -> u64 {
        self.balance.unwrap_or(DEFAULT_BALANCE)
    }

    pub fn mnemonic(&self) -> &str {
        self.mnemonic.as_deref().unwrap_or(DEFAULT_MNEMONIC)
    }

    pub fn derivation_path(&self) -> &str {
        self.derivation_path.as_deref().unwrap_or(DEFAULT_DERIVATION_PATH)
    }
}

/// Request-time options for a sidecar daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSpec {
    pub image: String,
}

/// Body of `POST /instances`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub instance_id: String,
    /// Instance lifetime in seconds
    pub timeout: u64,
    #[serde(default)]
    pub anvil_instances: BTreeMap<String, LaunchNodeSpec>,
    #[serde(default)]
    pub daemon_instances: BTreeMap<String, DaemonSpec>,
}

/// Renders the shell command line a node container runs.
///
/// The node binary is wrapped in a restart supervisor so a crashed node comes
/// back in place with its `/data` state intact.
pub fn node_command(spec: &LaunchNodeSpec) -> String {
    let mut args: Vec<String> = vec![
        "--accounts".to_string(),
        spec.accounts().to_string(),
        "--balance".to_string(),
        spec.balance().to_string(),
        "--mnemonic".to_string(),
        spec.mnemonic().to_string(),
        "--derivation-path".to_string(),
        spec.derivation_path().to_string(),
    ];
    if let Some(fork_url) = &spec.fork_url {
        args.push("--fork-url".to_string());
        args.push(fork_url.clone());
    }
    args.extend(["--host".to_string(), "0.0.0.0".to_string()]);
    args.extend(["--port".to_string(), NODE_PORT.to_string()]);

    let quoted: Vec<_> = args.iter().map(|arg| shell_quote(arg)).collect();
    format!("while true; do anvil {}; sleep 1; done;", quoted.join(" "))
}

/// POSIX single-quote escaping; safe chars pass through unquoted.
fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !s.is_empty() && s.chars().all(safe) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', "'\\''")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_resolve() {
        let spec = LaunchNodeSpec::default();
        assert_eq!(spec.image(), DEFAULT_IMAGE);
        assert_eq!(spec.accounts(), 2);
        assert_eq!(spec.balance(), 1000);
        assert_eq!(spec.mnemonic(), DEFAULT_MNEMONIC);
        assert_eq!(spec.derivation_path(), "m/44'/60'/0'/");
    }

    #[test]
    fn command_with_defaults() {
        let cmd = node_command(&LaunchNodeSpec::default());
        assert!(cmd.starts_with("while true; do anvil --accounts 2 --balance 1000 --mnemonic "));
        assert!(cmd.contains("'test test test test test test test test test test test junk'"));
        assert!(cmd.contains("--host 0.0.0.0 --port 8545"));
        assert!(cmd.ends_with("; sleep 1; done;"));
        assert!(!cmd.contains("--fork-url"));
    }

    #[test]
    fn command_with_fork_url() {
        let spec = LaunchNodeSpec {
            fork_url: Some("https://eth.example.com/rpc?key=a b".to_string()),
            ..Default::default()
        };
        let cmd = node_command(&spec);
        assert!(cmd.contains("--fork-url 'https://eth.example.com/rpc?key=a b'"));
    }

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("m/44'/60'/0'/"), r"'m/44'\''/60'\''/0'\''/'");
        assert_eq!(shell_quote("plain-value_1.0"), "plain-value_1.0");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn create_request_parses_minimal_body() {
        let req: CreateInstanceRequest = serde_json::from_value(json!({
            "instance_id": "i1",
            "timeout": 60,
            "anvil_instances": {"main": {}}
        }))
        .unwrap();
        assert_eq!(req.timeout, 60);
        assert!(req.anvil_instances.contains_key("main"));
        assert!(req.daemon_instances.is_empty());
    }
}
