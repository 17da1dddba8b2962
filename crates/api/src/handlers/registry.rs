use axum::{extract::State, Json};
use chrono::Utc;
use scheduler_core::models::{HandleCallbackParam, RegistryParam};

use crate::{response::ApiResponse, routes::AppState};

/// 执行器注册/心跳
pub async fn registry(
    State(state): State<AppState>,
    Json(param): Json<RegistryParam>,
) -> ApiResponse<String> {
    state.registry.registry(&param, Utc::now()).await.into()
}

/// 执行器主动摘除
pub async fn registry_remove(
    State(state): State<AppState>,
    Json(param): Json<RegistryParam>,
) -> ApiResponse<String> {
    state.registry.registry_remove(&param).await.into()
}

/// 执行结果批量回调
pub async fn callback(
    State(state): State<AppState>,
    Json(params): Json<Vec<HandleCallbackParam>>,
) -> ApiResponse<String> {
    state.completer.callback(&params, Utc::now()).await.into()
}
