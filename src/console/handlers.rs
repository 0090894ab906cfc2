use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::ListenKey;
use crate::console::ConsoleState;
use crate::hashing::PoolStats;
use crate::signing::{AppSettings, FormatStats};

#[derive(Serialize)]
pub struct EndpointStatus {
    pub key: ListenKey,
    pub local_addr: String,
    pub active_connections: u64,
    pub total_connections: u64,
}

#[derive(Serialize)]
pub struct DaemonStatus {
    pub version: &'static str,
    pub pid: u32,
    pub state: &'static str,
    pub uptime_secs: u64,
    pub reloads: u64,
    pub failed_reloads: u64,
    pub signing: Option<EndpointStatus>,
}

#[derive(Serialize)]
pub struct AppStatus {
    pub available_formats: Vec<String>,
    pub unlocked_formats: Vec<String>,
    pub settings: AppSettings,
    pub config_loads: u64,
    pub requests: Vec<FormatStats>,
}

pub async fn get_status(State(state): State<ConsoleState>) -> Json<DaemonStatus> {
    let server = state.server();

    Json(DaemonStatus {
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        state: server.state.as_str(),
        uptime_secs: state.uptime_secs(),
        reloads: server.reloads,
        failed_reloads: server.failed_reloads,
        signing: server.signing.as_ref().map(|endpoint| EndpointStatus {
            key: endpoint.key.clone(),
            local_addr: endpoint.local_addr.to_string(),
            active_connections: endpoint.tracker.active_count(),
            total_connections: endpoint.tracker.total_count(),
        }),
    })
}

pub async fn get_app(State(state): State<ConsoleState>) -> Json<AppStatus> {
    let app = state.app();

    Json(AppStatus {
        available_formats: app.available_formats(),
        unlocked_formats: app.vault().formats().map(str::to_string).collect(),
        settings: (*app.settings()).clone(),
        config_loads: app.config_loads(),
        requests: app.stats(),
    })
}

pub async fn get_pool(State(state): State<ConsoleState>) -> Json<PoolStats> {
    Json(state.app().hash_pool().stats())
}
