//! RPC transport: a thin `axum` HTTP front-end plus an optional
//! Unix-domain-socket listener over the same [`DaemonState`] dispatch
//! surface.
//!
//! What is implemented here is deliberately minimal — one `POST /rpc`
//! endpoint taking `{method, params}` and returning `{result}` or
//! `{error}` — rather than full JSON-RPC 2.0 batching and notification
//! semantics. The part that matters, the mapping
//! from method name to a [`DaemonState`] call, is complete.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::dispatch::DaemonState;
use crate::error::{RpcError, Severity, XenvmError};
use crate::vg::LvStatus;

/// An RPC request envelope: a method name matching the daemon's operation
/// names (`Host.create`, `create_lv`, ...) plus its parameters.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    method: String,
    #[serde(default)]
    params: Value,
}

/// An RPC response envelope: exactly one of `result` or `error` is set.
#[derive(Debug, Serialize, Default)]
pub struct RpcResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RpcResponse {
    fn ok(result: Value) -> Self {
        Self { result: Some(result), error: None }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { result: None, error: Some(message.into()) }
    }
}

/// Builds the `axum` router exposing the `/rpc` endpoint over `state`.
pub fn router(state: Arc<DaemonState>) -> Router {
    Router::new().route("/rpc", post(handle_rpc)).with_state(state)
}

async fn handle_rpc(State(state): State<Arc<DaemonState>>, Json(request): Json<RpcRequest>) -> impl IntoResponse {
    let method = request.method.clone();
    match dispatch(&state, &request).await {
        Ok(value) => (StatusCode::OK, Json(RpcResponse::ok(value))),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!(method, error = %e, "RPC call failed fatally");
            }
            (status, Json(RpcResponse::err(e.to_string())))
        }
    }
}

fn status_for(e: &XenvmError) -> StatusCode {
    match e.severity() {
        Severity::Domain => StatusCode::UNPROCESSABLE_ENTITY,
        Severity::Transient => StatusCode::SERVICE_UNAVAILABLE,
        Severity::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn dispatch(state: &DaemonState, request: &RpcRequest) -> Result<Value, XenvmError> {
    let params = &request.params;
    match request.method.as_str() {
        "get" => Ok(serde_json::to_value(stats_to_json(state)).unwrap_or_default()),
        "get_lv" => {
            let name = string_param(params, "name")?;
            let lv = state.get_lv(&name)?;
            Ok(serde_json::to_value(lv).unwrap_or_default())
        }
        "create_lv" => {
            let name = string_param(params, "name")?;
            let extent_count = u64_param(params, "extent_count")?;
            state.create_lv(&name, extent_count)?;
            Ok(Value::Null)
        }
        "rename_lv" => {
            let old = string_param(params, "old")?;
            let new = string_param(params, "new")?;
            state.rename_lv(&old, &new)?;
            Ok(Value::Null)
        }
        "remove_lv" => {
            let name = string_param(params, "name")?;
            state.remove_lv(&name)?;
            Ok(Value::Null)
        }
        "resize_lv" => {
            let name = string_param(params, "name")?;
            let extent_count = u64_param(params, "extent_count")?;
            state.resize_lv(&name, extent_count)?;
            Ok(Value::Null)
        }
        "set_status" => {
            let name = string_param(params, "name")?;
            let status = match string_param(params, "status")?.as_str() {
                "active" => LvStatus::Active,
                "inactive" => LvStatus::Inactive,
                _ => return Err(RpcError::BadParam("status".to_string()).into()),
            };
            state.set_status(&name, status)?;
            Ok(Value::Null)
        }
        "add_tag" => {
            let name = string_param(params, "name")?;
            let tag = string_param(params, "tag")?;
            state.add_tag(&name, &tag)?;
            Ok(Value::Null)
        }
        "remove_tag" => {
            let name = string_param(params, "name")?;
            let tag = string_param(params, "tag")?;
            state.remove_tag(&name, &tag)?;
            Ok(Value::Null)
        }
        "flush" => {
            let name = string_param(params, "name")?;
            state.flush(&name)?;
            Ok(Value::Null)
        }
        "Host.all" => Ok(serde_json::to_value(state.hosts_all()).unwrap_or_default()),
        "Host.create" => {
            let name = string_param(params, "name")?;
            state.host_create(&name)?;
            Ok(Value::Null)
        }
        "Host.connect" => {
            let name = string_param(params, "name")?;
            state.host_connect(&name)?;
            Ok(Value::Null)
        }
        "Host.disconnect" => {
            let name = string_param(params, "name")?;
            state.host_disconnect(&name)?;
            Ok(Value::Null)
        }
        "Host.destroy" => {
            let name = string_param(params, "name")?;
            state.host_destroy(&name)?;
            Ok(Value::Null)
        }
        other => Err(RpcError::UnknownMethod(other.to_string()).into()),
    }
}

fn stats_to_json(state: &DaemonState) -> serde_json::Value {
    let stats = state.get();
    serde_json::json!({
        "total_extents": stats.total_extents,
        "free_extents": stats.free_extents,
        "per_lv": stats.per_lv,
    })
}

fn string_param(params: &Value, key: &str) -> Result<String, XenvmError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::BadParam(key.to_string()).into())
}

fn u64_param(params: &Value, key: &str) -> Result<u64, XenvmError> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::BadParam(key.to_string()).into())
}

/// Binds and serves `router` on a TCP port, a Unix-domain socket, or both,
/// per the daemon's configuration.
///
/// # Errors
///
/// Returns an I/O error if either listener fails to bind.
pub async fn serve(
    router: Router,
    listen_port: Option<u16>,
    listen_path: Option<String>,
) -> std::io::Result<()> {
    let tcp = match listen_port {
        Some(port) => {
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            info!(port, "listening on TCP");
            Some(listener)
        }
        None => None,
    };
    let uds = match listen_path {
        Some(path) => {
            let _ = std::fs::remove_file(&path);
            let listener = tokio::net::UnixListener::bind(&path)?;
            info!(path, "listening on Unix socket");
            Some(listener)
        }
        None => None,
    };

    match (tcp, uds) {
        (Some(tcp), Some(uds)) => {
            let tcp_router = router.clone();
            let tcp_task = tokio::spawn(async move { axum::serve(tcp, tcp_router).await });
            let uds_task = tokio::spawn(async move { axum::serve(uds, router).await });
            let _ = tokio::try_join!(tcp_task, uds_task);
        }
        (Some(tcp), None) => axum::serve(tcp, router).await?,
        (None, Some(uds)) => axum::serve(uds, router).await?,
        (None, None) => unreachable!("Configuration::validate requires at least one listener"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{self, AllocatorConfig};
    use crate::host::HostRegistry;
    use crate::journal::Journal;
    use crate::vg::{Op, VgStore};
    use std::time::Duration;
    use tempfile::tempdir;

    fn state() -> DaemonState {
        let vg_dir = tempdir().unwrap();
        let ring_dir = tempdir().unwrap();
        let journal_dir = tempdir().unwrap();
        let vg = Arc::new(VgStore::open(vg_dir.path().join("vg.json"), "vg0", 100).unwrap());
        let hosts = Arc::new(HostRegistry::new(vg.clone(), ring_dir.path()));
        std::mem::forget(vg_dir);
        std::mem::forget(ring_dir);

        let vg_for_apply = vg.clone();
        let hosts_for_apply = hosts.clone();
        let (journal, _summary) = Journal::<Op>::start(journal_dir.path().join("journal.ring"), move |op| {
            allocator::apply_op(&vg_for_apply, &hosts_for_apply, op)
        })
        .unwrap();
        std::mem::forget(journal_dir);

        let config = AllocatorConfig {
            allocation_quantum_extents: 1,
            low_water_mark_extents: 1,
            tick_interval: Duration::from_secs(5),
        };
        DaemonState::new(vg, hosts, journal, config)
    }

    fn request(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest { method: method.to_string(), params }
    }

    #[tokio::test]
    async fn unknown_method_is_a_domain_error() {
        let state = state();
        let err = dispatch(&state, &request("Bogus.method", serde_json::json!({}))).await.unwrap_err();
        assert_eq!(err.severity(), Severity::Domain);
        assert_eq!(status_for(&err), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn missing_param_is_a_bad_param_error() {
        let state = state();
        let err = dispatch(&state, &request("create_lv", serde_json::json!({}))).await.unwrap_err();
        assert!(matches!(err, XenvmError::Rpc(RpcError::BadParam(ref key)) if key == "name"));
    }

    #[tokio::test]
    async fn create_lv_round_trips_through_dispatch() {
        let state = state();
        dispatch(&state, &request("create_lv", serde_json::json!({"name": "lv0", "extent_count": 10})))
            .await
            .unwrap();

        let value = dispatch(&state, &request("get_lv", serde_json::json!({"name": "lv0"}))).await.unwrap();
        assert_eq!(value["name"], "lv0");
    }

    #[tokio::test]
    async fn host_not_created_is_a_domain_error() {
        let state = state();
        let err =
            dispatch(&state, &request("Host.connect", serde_json::json!({"name": "ghost"}))).await.unwrap_err();
        assert_eq!(err.severity(), Severity::Domain);
    }
}
