use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scheduler_core::SchedulerError;
use tracing::{error, warn};

use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("访问令牌无效")]
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Scheduler(
                SchedulerError::JobNotFound { .. }
                | SchedulerError::JobGroupNotFound { .. }
                | SchedulerError::JobLogNotFound { .. },
            ) => StatusCode::NOT_FOUND,
            ApiError::Scheduler(
                SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidSchedule(_)
                | SchedulerError::InvalidParameter(_),
            )
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(SchedulerError::DispatchRejected { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Scheduler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API请求处理失败: {}", self);
        } else {
            warn!("API请求被拒绝: {}", self);
        }

        (status, Json(ApiResponse::fail(self.to_string()))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
