use serde::{Deserialize, Serialize};

/// A deployed contract reference stored in instance metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContract {
    pub name: String,
    pub address: String,
}

/// A metadata value accepted by the orchestrator: a plain string or a list of
/// contract references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Contracts(Vec<NamedContract>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_both_shapes() {
        let text: MetadataValue = serde_json::from_value(json!("flag{...}")).unwrap();
        assert_eq!(text, MetadataValue::Text("flag{...}".to_string()));

        let contracts: MetadataValue = serde_json::from_value(json!([
            {"name": "Challenge", "address": "0x5FbDB2315678afecb367f032d93F642f64180aa3"}
        ]))
        .unwrap();
        match contracts {
            MetadataValue::Contracts(list) => assert_eq!(list[0].name, "Challenge"),
            MetadataValue::Text(_) => panic!("expected contract list"),
        }
    }
}
