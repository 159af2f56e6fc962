use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A started node, reachable on the fabric network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Logical name within the instance, e.g. `main`
    pub id: String,
    /// Private address on the fabric network
    pub ip: String,
    pub port: u16,
    /// Methods permitted past the default allow-list for this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_allowed_methods: Option<Vec<String>>,
}

impl NodeEndpoint {
    /// Whether `method` is explicitly whitelisted for this node.
    pub fn allows_extra(&self, method: &str) -> bool {
        self.extra_allowed_methods
            .as_ref()
            .is_some_and(|methods| methods.iter().any(|m| m == method))
    }
}

/// A companion sidecar container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonEndpoint {
    /// Logical name within the instance
    pub id: String,
}

/// The authoritative per-instance row.
///
/// Registered on successful creation, mutated only by metadata writes, and
/// removed on explicit deletion or expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Caller-chosen stable identifier, e.g. `blockchain-<challenge>-<team>`
    pub instance_id: String,
    /// Random alphabetic handle used in public URLs
    pub external_id: String,
    /// Unix seconds
    pub created_at: u64,
    /// Unix seconds
    pub expires_at: u64,
    #[serde(default)]
    pub anvil_instances: BTreeMap<String, NodeEndpoint>,
    #[serde(default)]
    pub daemon_instances: BTreeMap<String, DaemonEndpoint>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl InstanceRecord {
    /// Looks up a node endpoint by its logical id.
    pub fn node(&self, node_id: &str) -> Option<&NodeEndpoint> {
        self.anvil_instances.get(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_roundtrips_wire_format() {
        let record: InstanceRecord = serde_json::from_value(json!({
            "instance_id": "blockchain-hello-team1",
            "external_id": "AbCdEfGhIjKlMnOpQrStUvWx",
            "created_at": 1700000000,
            "expires_at": 1700001800,
            "anvil_instances": {
                "main": {"id": "main", "ip": "172.18.0.3", "port": 8545}
            },
            "daemon_instances": {},
            "metadata": {}
        }))
        .unwrap();
        assert_eq!(record.node("main").unwrap().port, 8545);
        assert!(record.node("side").is_none());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["anvil_instances"]["main"]["ip"], "172.18.0.3");
        // absent override must not appear on the wire
        assert!(value["anvil_instances"]["main"].get("extra_allowed_methods").is_none());
    }

    #[test]
    fn extra_allowed_lookup() {
        let node = NodeEndpoint {
            id: "main".to_string(),
            ip: "10.0.0.2".to_string(),
            port: 8545,
            extra_allowed_methods: Some(vec!["debug_getRawReceipts".to_string()]),
        };
        assert!(node.allows_extra("debug_getRawReceipts"));
        assert!(!node.allows_extra("debug_traceTransaction"));
    }
}
