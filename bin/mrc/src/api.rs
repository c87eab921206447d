//! JSON management API
//!
//! Every metadata operation is forwarded to the processing stage. The caller
//! identity is taken from the `x-mrc-*` headers set by the fronting gateway.

use crate::collab::RequestContext;
use crate::context::MrcContext;
use crate::operations::{
    AddReplicaArgs, GetXLocSetArgs, OpenArgs, RemoveReplicaArgs, RenewCapabilityArgs, Request,
    ReselectOsdsArgs, Response as OpResponse, SetReplicaUpdatePolicyArgs,
};
use crate::stage::StageHandle;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mrc_common::{Error, OsdUuid};
use mrc_placement::OsdInfo;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub stage: StageHandle,
    pub context: Arc<MrcContext>,
}

/// Error body: `{"error": ..., "errno": ...}`, plus `master` on redirects
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self.0 {
            Error::Redirect { master } => json!({
                "error": self.0.to_string(),
                "errno": self.0.errno(),
                "master": master,
            }),
            err => json!({
                "error": err.to_string(),
                "errno": err.errno(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/replicas/add", post(add_replica))
        .route("/v1/replicas/remove", post(remove_replica))
        .route("/v1/replicas/reselect", post(reselect_osds))
        .route("/v1/files/update-policy", post(set_update_policy))
        .route("/v1/files/open", post(open))
        .route("/v1/xlocset", post(get_xlocset))
        .route("/v1/capabilities/renew", post(renew_capability))
        .route("/v1/osds", get(list_osds).post(register_osd))
        .route("/v1/osds/{uuid}", delete(deregister_osd))
        .with_state(state)
}

/// Caller identity from the request headers.
///
/// The client address is the peer of the connection. `x-mrc-client` replaces
/// it only when the MRC sits behind a trusted gateway.
fn request_context(headers: &HeaderMap, peer: SocketAddr, trusted_gateway: bool) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let groups = header("x-mrc-groups");
    RequestContext {
        user_id: header("x-mrc-user"),
        group_ids: groups
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect(),
        super_user: header("x-mrc-superuser").eq_ignore_ascii_case("true"),
        client_address: match header("x-mrc-client") {
            forwarded if trusted_gateway && !forwarded.is_empty() => forwarded,
            _ => peer.ip().to_string(),
        },
    }
}

async fn call(state: &AppState, headers: &HeaderMap, peer: SocketAddr, request: Request) -> ApiResult {
    let rq = request_context(headers, peer, state.context.config.server.trusted_gateway);
    let response = state.stage.call(rq, request).await?;
    Ok(match response {
        OpResponse::Empty => StatusCode::NO_CONTENT.into_response(),
        other => Json(other).into_response(),
    })
}

async fn health() -> &'static str {
    "OK"
}

async fn add_replica(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<AddReplicaArgs>,
) -> ApiResult {
    call(&state, &headers, peer, Request::AddReplica(args)).await
}

async fn remove_replica(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<RemoveReplicaArgs>,
) -> ApiResult {
    call(&state, &headers, peer, Request::RemoveReplica(args)).await
}

async fn reselect_osds(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<ReselectOsdsArgs>,
) -> ApiResult {
    call(&state, &headers, peer, Request::ReselectOsds(args)).await
}

async fn set_update_policy(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<SetReplicaUpdatePolicyArgs>,
) -> ApiResult {
    call(&state, &headers, peer, Request::SetReplicaUpdatePolicy(args)).await
}

async fn open(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<OpenArgs>,
) -> ApiResult {
    call(&state, &headers, peer, Request::Open(args)).await
}

async fn get_xlocset(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<GetXLocSetArgs>,
) -> ApiResult {
    call(&state, &headers, peer, Request::GetXLocSet(args)).await
}

async fn renew_capability(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<RenewCapabilityArgs>,
) -> ApiResult {
    call(&state, &headers, peer, Request::RenewCapability(args)).await
}

async fn list_osds(State(state): State<AppState>) -> Json<Vec<OsdInfo>> {
    let mut osds = state.context.osds.all();
    osds.sort_by(|a, b| a.uuid.as_str().cmp(b.uuid.as_str()));
    Json(osds)
}

async fn register_osd(State(state): State<AppState>, Json(osd): Json<OsdInfo>) -> ApiResult {
    if osd.uuid.as_str().is_empty() || osd.address.is_empty() {
        return Err(Error::invalid_argument("OSD uuid and address are required").into());
    }
    info!("Registering OSD {} at {}", osd.uuid, osd.address);
    state.context.store.put_osd(&osd).map_err(Error::from)?;
    state.context.osds.upsert(osd);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Forget an OSD. Replicas already placed on it are left alone.
async fn deregister_osd(State(state): State<AppState>, Path(uuid): Path<String>) -> ApiResult {
    let uuid = OsdUuid::new(uuid);
    if state.context.osds.get(&uuid).is_none() {
        return Err(Error::not_found(format!("OSD {uuid}")).into());
    }
    info!("Deregistering OSD {}", uuid);
    state.context.store.delete_osd(uuid.as_str()).map_err(Error::from)?;
    state.context.osds.remove(&uuid);
    Ok(StatusCode::NO_CONTENT.into_response())
}
