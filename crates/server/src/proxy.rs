//! Data-plane filtering reverse proxy: resolves public instance handles to
//! node endpoints and relays JSON-RPC over HTTP and WebSocket, enforcing
//! the method allow-list per node.

use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        rejection::JsonRejection,
        ws::{Message, WebSocket},
    },
    http::{Method, header},
    response::IntoResponse,
    routing::{get, post},
};
use chainyard_rpc::{
    error::RpcError,
    request::{Id, RpcMethodCall},
};
use chainyard_store::Store;
use chainyard_types::NodeEndpoint;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, trace};

/// Namespaces a request may target without an explicit override
const ALLOWED_NAMESPACES: &[&str] = &["web3", "eth", "net"];

/// Methods denied even inside an allowed namespace
const DISALLOWED_METHODS: &[&str] = &[
    "eth_sign",
    "eth_signTransaction",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "eth_sendTransaction",
    "eth_sendUnsignedTransaction",
];

#[derive(Clone)]
struct ProxyState {
    store: Arc<dyn Store>,
    client: reqwest::Client,
}

/// Builds the proxy router.
pub fn proxy_app(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/", get(root).post(root))
        .route("/{external_id}/{node_id}", post(http_rpc))
        .route("/{external_id}/{node_id}/ws", get(ws_rpc))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_headers([header::CONTENT_TYPE])
                .allow_methods([Method::GET, Method::POST]),
        )
        .with_state(ProxyState { store, client: reqwest::Client::new() })
}

/// JSON-RPC failure envelope with the caller's id carried through verbatim.
fn jsonrpc_fail(id: Value, error: RpcError) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}

fn forbidden_url(id: Value) -> Value {
    jsonrpc_fail(id, RpcError::invalid_request_with("Please use the full node url"))
}

fn proxy_failed(id: Value) -> Value {
    jsonrpc_fail(id, RpcError::invalid_params("failed to proxy request to anvil instance"))
}

async fn root() -> Json<Value> {
    Json(forbidden_url(Value::Null))
}

/// Checks one request object against the allow-list. `node` carries the
/// per-node overrides, tested last so they can re-admit forbidden methods;
/// `None` means no overrides apply (unresolvable route).
///
/// Returns the failure envelope to send back, or `None` when permitted.
fn validate_request(request: &Value, node: Option<&NodeEndpoint>) -> Option<Value> {
    let Some(object) = request.as_object() else {
        return Some(jsonrpc_fail(
            Value::Null,
            RpcError::invalid_request_with("expected json object"),
        ));
    };

    let id = object.get("id").cloned().unwrap_or(Value::Null);
    if id.is_null() {
        return Some(jsonrpc_fail(Value::Null, RpcError::invalid_request_with("invalid jsonrpc id")));
    }

    let Some(method) = object.get("method").and_then(Value::as_str) else {
        return Some(jsonrpc_fail(id, RpcError::invalid_request_with("invalid jsonrpc method")));
    };

    let namespace = method.split('_').next().unwrap_or_default();
    let permitted = (ALLOWED_NAMESPACES.contains(&namespace)
        && !DISALLOWED_METHODS.contains(&method))
        || node.is_some_and(|node| node.allows_extra(method));
    if !permitted {
        return Some(jsonrpc_fail(id, RpcError::invalid_request_with("forbidden jsonrpc method")));
    }

    None
}

/// Resolves `{external_id}/{node_id}` to the node's private endpoint.
async fn resolve(
    state: &ProxyState,
    external_id: &str,
    node_id: &str,
    id: &Value,
) -> Result<NodeEndpoint, Value> {
    let record = match state.store.get_by_external(external_id).await {
        Ok(record) => record,
        Err(err) => {
            error!(external_id, %err, "store lookup failed");
            None
        }
    };
    let Some(record) = record else {
        return Err(jsonrpc_fail(
            id.clone(),
            RpcError::invalid_params("invalid rpc url, instance not found"),
        ));
    };
    match record.node(node_id) {
        Some(node) => Ok(node.clone()),
        None => Err(jsonrpc_fail(
            id.clone(),
            RpcError::invalid_params("invalid rpc url, chain not found"),
        )),
    }
}

async fn post_upstream(
    client: &reqwest::Client,
    node: &NodeEndpoint,
    body: &Value,
) -> Result<Value, reqwest::Error> {
    let url = format!("http://{}:{}", node.ip, node.port);
    client.post(url).json(body).send().await?.json().await
}

async fn http_rpc(
    State(state): State<ProxyState>,
    Path((external_id, node_id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<Value> {
    let Ok(Json(body)) = body else {
        return Json(jsonrpc_fail(Value::Null, RpcError::invalid_request_with("expected json body")));
    };

    if let Value::Array(batch) = body {
        return Json(proxy_batch(&state, &external_id, &node_id, batch).await);
    }

    let request_id = body.get("id").cloned().unwrap_or(Value::Null);
    let node = match resolve(&state, &external_id, &node_id, &request_id).await {
        Ok(node) => node,
        Err(failure) => return Json(failure),
    };
    if let Some(failure) = validate_request(&body, Some(&node)) {
        return Json(failure);
    }

    trace!(%external_id, %node_id, "proxying request");
    match post_upstream(&state.client, &node, &body).await {
        Ok(response) => Json(response),
        Err(err) => {
            error!(%external_id, %node_id, %err, "failed to proxy request");
            Json(proxy_failed(request_id))
        }
    }
}

/// Batched requests are validated element-wise; rejected elements are
/// swapped for a benign `web3_clientVersion` call so the upstream batch
/// keeps its cardinality, then the responses are stitched back by position.
async fn proxy_batch(
    state: &ProxyState,
    external_id: &str,
    node_id: &str,
    mut batch: Vec<Value>,
) -> Value {
    let resolved = resolve(state, external_id, node_id, &Value::Null).await;

    let mut failures: Vec<Option<Value>> = Vec::with_capacity(batch.len());
    for (index, element) in batch.iter_mut().enumerate() {
        let failure = validate_request(element, resolved.as_ref().ok());
        if failure.is_some() {
            // neuter the request
            *element = serde_json::to_value(RpcMethodCall::new(
                Id::Number(index as i64),
                "web3_clientVersion",
                Value::Null,
            ))
            .expect("method call is json");
        }
        failures.push(failure);
    }

    let upstream = match &resolved {
        Ok(node) => match post_upstream(&state.client, node, &Value::Array(batch)).await {
            Ok(response) => response,
            Err(err) => {
                error!(%external_id, %node_id, %err, "failed to proxy batch");
                proxy_failed(Value::Null)
            }
        },
        Err(failure) => failure.clone(),
    };

    let stitched: Vec<Value> = failures
        .into_iter()
        .enumerate()
        .map(|(index, failure)| {
            failure.unwrap_or_else(|| match upstream.as_array() {
                Some(items) => items.get(index).cloned().unwrap_or(Value::Null),
                // single upstream error applied uniformly
                None => upstream.clone(),
            })
        })
        .collect();
    Value::Array(stitched)
}

async fn ws_rpc(
    State(state): State<ProxyState>,
    Path((external_id, node_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_ws(state, external_id, node_id, socket))
}

/// Relays one WebSocket session frame-at-a-time: client text in, validated,
/// forwarded upstream, and the node's reply returned as a binary frame.
async fn relay_ws(state: ProxyState, external_id: String, node_id: String, mut client: WebSocket) {
    let node = match resolve(&state, &external_id, &node_id, &Value::Null).await {
        Ok(node) => node,
        Err(failure) => {
            let _ = client.send(Message::Text(failure.to_string().into())).await;
            return;
        }
    };

    let upstream_url = format!("ws://{}:{}", node.ip, node.port);
    let (mut upstream, _) = match connect_async(&upstream_url).await {
        Ok(connection) => connection,
        Err(err) => {
            error!(%external_id, %node_id, %err, "failed to open upstream websocket");
            let _ = client.send(Message::Text(proxy_failed(Value::Null).to_string().into())).await;
            return;
        }
    };
    debug!(%external_id, %node_id, "websocket session open");

    loop {
        let Some(Ok(message)) = client.recv().await else { break };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: Value = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(_) => {
                let failure =
                    jsonrpc_fail(Value::Null, RpcError::invalid_request_with("expected json body"));
                if client.send(Message::Text(failure.to_string().into())).await.is_err() {
                    break;
                }
                continue;
            }
        };
        if let Some(failure) = validate_request(&request, Some(&node)) {
            if client.send(Message::Text(failure.to_string().into())).await.is_err() {
                break;
            }
            continue;
        }

        if upstream.send(tungstenite::Message::Text(text.as_str().into())).await.is_err() {
            break;
        }

        // skip transport frames while waiting for the node's reply
        let reply = loop {
            match upstream.next().await {
                Some(Ok(tungstenite::Message::Text(reply))) => {
                    break Some(axum::body::Bytes::copy_from_slice(reply.as_bytes()));
                }
                Some(Ok(tungstenite::Message::Binary(reply))) => break Some(reply),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => break None,
            }
        };
        let Some(reply) = reply else { break };

        // responses always go back as binary frames
        if client.send(Message::Binary(reply)).await.is_err() {
            break;
        }
    }

    debug!(%external_id, %node_id, "websocket session closed");
    let _ = upstream.close(None).await;
}
