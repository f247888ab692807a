use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use rayo_gateway::{AdminService, GatewayError, GatewayStorageService, LoadBalancer};
use rayo_shared::{Jid, RayoNode};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub storage: GatewayStorageService,
    pub lb: Arc<LoadBalancer>,
    pub admin: Arc<AdminService>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/platforms", get(list_platforms))
        .route("/platforms/:platform/nodes", get(platform_nodes))
        .route("/admin/status", get(admin_status))
        .route("/admin/blacklist", post(admin_blacklist))
        .route("/admin/ban", post(admin_ban))
        .route("/admin/unban", post(admin_unban))
        .route("/admin/banned/:jid", get(admin_is_banned))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct NodeView {
    #[serde(flatten)]
    node: RayoNode,
    /// Whether selection would currently consider this node.
    available: bool,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: &'static str,
    version: &'static str,
    platforms: Vec<String>,
    active_calls: usize,
    connected_clients: usize,
    banned_jids: Vec<String>,
    max_dial_retries: u32,
    max_consecutive_errors: u32,
    failed_blacklist_updates: u64,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct BlacklistRequest {
    platform: String,
    hostname: String,
    #[serde(default = "default_true")]
    blacklisted: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct BanRequest {
    jid: String,
}

#[derive(Serialize)]
struct BanStatus {
    jid: String,
    banned: bool,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: state.admin.server_name(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_platforms(State(state): State<AppState>) -> Json<Vec<String>> {
    let mut platforms = state.storage.get_platforms().await;
    platforms.sort();
    Json(platforms)
}

async fn platform_nodes(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Json<Vec<NodeView>> {
    let max_errors = state.lb.config().max_consecutive_errors;
    let mut nodes = state.storage.get_rayo_nodes(&platform).await;
    nodes.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Json(
        nodes
            .into_iter()
            .map(|node| NodeView {
                available: node.is_available(max_errors),
                node,
            })
            .collect(),
    )
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

fn parse_jid(raw: &str) -> Result<Jid, ServerError> {
    Ok(raw.parse::<Jid>().map_err(GatewayError::from)?)
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let mut platforms = state.storage.get_platforms().await;
    platforms.sort();

    Ok(Json(AdminStatusResponse {
        name: state.admin.server_name(),
        version: env!("CARGO_PKG_VERSION"),
        platforms,
        active_calls: state.storage.get_calls().await.len(),
        connected_clients: state.storage.get_clients().await.len(),
        banned_jids: state.admin.banned_jids().await,
        max_dial_retries: state.admin.max_dial_retries(),
        max_consecutive_errors: state.lb.config().max_consecutive_errors,
        failed_blacklist_updates: state.admin.failed_blacklist_updates(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

async fn admin_blacklist(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<BlacklistRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    if !state
        .admin
        .blacklist(&req.platform, &req.hostname, req.blacklisted)
        .await?
    {
        return Err(ServerError::NotFound(format!(
            "Rayo node [{}] on platform [{}]",
            req.hostname, req.platform
        )));
    }

    info!(
        platform = %req.platform,
        hostname = %req.hostname,
        blacklisted = req.blacklisted,
        "Admin changed node blacklist"
    );
    Ok(Json(serde_json::json!({
        "hostname": req.hostname,
        "blacklisted": req.blacklisted,
    })))
}

async fn admin_ban(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<BanRequest>,
) -> Result<Json<BanStatus>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let jid = parse_jid(&req.jid)?.to_string();
    state.admin.ban(&jid).await;
    Ok(Json(BanStatus { jid, banned: true }))
}

async fn admin_unban(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<BanRequest>,
) -> Result<Json<BanStatus>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let jid = parse_jid(&req.jid)?.to_string();
    state.admin.unban(&jid).await;
    Ok(Json(BanStatus { jid, banned: false }))
}

async fn admin_is_banned(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(jid): Path<String>,
) -> Result<Json<BanStatus>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let jid = parse_jid(&jid)?.to_string();
    let banned = state.admin.is_banned(&jid).await;
    Ok(Json(BanStatus { jid, banned }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
