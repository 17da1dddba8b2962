use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use scheduler_dispatcher::{JobCompleter, JobController, RegistryTracker, SchedulerCoordinator};

use crate::handlers::{
    health::health_check,
    jobs::{kill_log, start_job, stop_job, trigger_job},
    registry::{callback, registry, registry_remove},
};
use crate::middleware::{access_token_guard, cors_layer, request_logging, trace_layer};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryTracker>,
    pub completer: Arc<JobCompleter>,
    pub controller: Arc<JobController>,
    pub access_token: Option<String>,
}

impl AppState {
    pub fn from_coordinator(coordinator: &SchedulerCoordinator, access_token: Option<String>) -> Self {
        Self {
            registry: coordinator.registry(),
            completer: coordinator.completer(),
            controller: coordinator.controller(),
            access_token,
        }
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    let api = Router::new()
        // 执行器接口
        .route("/api/registry", post(registry))
        .route("/api/registryRemove", post(registry_remove))
        .route("/api/callback", post(callback))
        // 任务管理
        .route("/api/jobs/{id}/trigger", post(trigger_job))
        .route("/api/jobs/{id}/start", post(start_job))
        .route("/api/jobs/{id}/stop", post(stop_job))
        .route("/api/logs/{id}/kill", post(kill_log))
        .route_layer(from_fn_with_state(state.clone(), access_token_guard));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(from_fn(request_logging))
        .layer(trace_layer())
        .layer(cors_layer())
        .with_state(state)
}
