use serde::{Deserialize, Serialize};
use std::fmt;

/// The `jsonrpc` protocol marker, always `"2.0"`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "2.0")]
    V2,
}

/// Id of a JSON-RPC request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
    /// `null` id, used in error responses to requests whose id is unknown
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::String(s) => s.fmt(f),
            Self::Null => f.write_str("null"),
        }
    }
}

/// A single JSON-RPC method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMethodCall {
    pub jsonrpc: Version,
    pub id: Id,
    pub method: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl RpcMethodCall {
    pub fn new(id: Id, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self { jsonrpc: Version::V2, id, method: method.into(), params }
    }
}
