use axum::{http::StatusCode, response::IntoResponse, Json};
use scheduler_core::models::{ExecutorResponse, CODE_FAIL, CODE_SUCCESS};
use serde::{Deserialize, Serialize};

/// 统一响应结构，与执行器侧的返回格式一致
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: Option<String>,
    pub content: Option<T>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(content: T) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: None,
            content: Some(content),
        }
    }
}

impl ApiResponse<()> {
    pub fn success_empty() -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: None,
            content: None,
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            code: CODE_FAIL,
            msg: Some(msg.into()),
            content: None,
        }
    }
}

impl From<ExecutorResponse> for ApiResponse<String> {
    fn from(response: ExecutorResponse) -> Self {
        Self {
            code: response.code,
            msg: response.msg,
            content: response.content,
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
