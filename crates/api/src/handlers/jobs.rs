use axum::{
    body::Bytes,
    extract::{Path, State},
};
use chrono::Utc;
use scheduler_core::models::JobInfo;
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::ApiResponse,
    routes::AppState,
};

/// 手动触发请求，请求体可以为空
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TriggerJobRequest {
    pub executor_param: Option<String>,
    /// 逗号分隔的执行器地址，指定后本次触发只使用这些地址
    pub address_list: Option<String>,
}

impl TriggerJobRequest {
    fn addresses(&self) -> Option<Vec<String>> {
        let addresses: Vec<String> = self
            .address_list
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect();
        (!addresses.is_empty()).then_some(addresses)
    }
}

/// 手动触发一次
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<ApiResponse<()>> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerJobRequest::default()
    } else {
        serde_json::from_slice::<TriggerJobRequest>(&body)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let addresses = request.addresses();
    state
        .controller
        .trigger_job(id, request.executor_param, addresses)
        .await?;
    Ok(ApiResponse::success_empty())
}

/// 启动调度
pub async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<JobInfo>> {
    let job = state.controller.start_job(id, Utc::now()).await?;
    Ok(ApiResponse::success(job))
}

/// 停止调度
pub async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<JobInfo>> {
    let job = state.controller.stop_job(id).await?;
    Ok(ApiResponse::success(job))
}

/// 终止一次正在执行的调度
pub async fn kill_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<String>> {
    let response = state.controller.kill_log(id, Utc::now()).await?;
    Ok(response.into())
}
