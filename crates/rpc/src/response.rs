use crate::{
    error::RpcError,
    request::{Id, Version},
};
use serde::{Deserialize, Serialize};

/// Response of a _single_ rpc call
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    // JSON RPC version
    jsonrpc: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Id>,
    #[serde(flatten)]
    result: ResponseResult,
}

impl RpcResponse {
    pub fn new(id: Id, content: impl Into<ResponseResult>) -> Self {
        Self { jsonrpc: Version::V2, id: Some(id), result: content.into() }
    }

    /// The outcome of the call
    pub fn result(&self) -> &ResponseResult {
        &self.result
    }

    /// Consumes the response and returns the outcome
    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        match self.result {
            ResponseResult::Success(value) => Ok(value),
            ResponseResult::Error(err) => Err(err),
        }
    }
}

impl From<RpcError> for RpcResponse {
    fn from(e: RpcError) -> Self {
        Self { jsonrpc: Version::V2, id: Some(Id::Null), result: ResponseResult::Error(e) }
    }
}

/// Represents the result of a call, either success or error
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
pub enum ResponseResult {
    #[serde(rename = "result")]
    Success(serde_json::Value),
    #[serde(rename = "error")]
    Error(RpcError),
}

impl ResponseResult {
    pub fn success<S>(content: S) -> Self
    where
        S: Serialize + 'static,
    {
        Self::Success(serde_json::to_value(&content).expect("serializable response"))
    }

    pub fn error(error: RpcError) -> Self {
        Self::Error(error)
    }
}

impl From<RpcError> for ResponseResult {
    fn from(err: RpcError) -> Self {
        Self::error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_success_and_error() {
        let ok = RpcResponse::new(Id::Number(1), ResponseResult::success("anvil/v0.1.0"));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": "anvil/v0.1.0"})
        );

        let err = RpcResponse::new(Id::Null, RpcError::invalid_params("unknown route"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32602, "message": "unknown route"}})
        );
    }

    #[test]
    fn parses_upstream_error_member() {
        let resp: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "error": {"code": -32000, "message": "execution reverted"}
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code.code(), -32000);
    }
}
