use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.client.list_nodes().await?;
    Ok(StatusCode::OK)
}

/// Text exposition of every registered counter.
pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.scrapes.record();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}

/// The NodeInfo array. The leader answers from its cache; everyone else
/// resolves the leader through the election lease and proxies the request to
/// that pod.
pub async fn node_infos(State(state): State<AppState>) -> Result<Response, ApiError> {
    if state.is_leader.load(Ordering::SeqCst) {
        let body = state.cache.json_snapshot()?;
        return Ok((
            [(header::CONTENT_TYPE, "application/json".to_string())],
            body,
        )
            .into_response());
    }

    let lease = state
        .client
        .get_lease(&state.lease_namespace, &state.lease_name)
        .await?
        .ok_or_else(|| ApiError::unavailable("no leader lease"))?;
    let holder = lease
        .holder
        .ok_or_else(|| ApiError::unavailable("leader lease is unheld"))?;
    // Identities may carry a suffix after the pod name.
    let leader_pod = holder.split('_').next().unwrap_or(&holder).to_string();
    if leader_pod == *state.identity {
        return Err(ApiError::unavailable("leadership is in flux"));
    }

    let pod = state
        .client
        .get_pod(&state.lease_namespace, &leader_pod)
        .await?
        .ok_or_else(|| ApiError::unavailable(format!("leader pod '{}' not found", leader_pod)))?;
    let ip = pod
        .ip
        .ok_or_else(|| ApiError::unavailable(format!("leader pod '{}' has no ip", leader_pod)))?;

    let url = format!("http://{}:{}/api/v1/info", ip, state.api_port);
    debug!(leader = %leader_pod, url = %url, "proxying info request to leader");
    let response = state
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| ApiError::bad_gateway(e.to_string()))?;
    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let body = response
        .bytes()
        .await
        .map_err(|e| ApiError::bad_gateway(e.to_string()))?;
    Ok((
        status,
        [(header::CONTENT_TYPE, "application/json".to_string())],
        body,
    )
        .into_response())
}
