//! # Scheduler API
//!
//! 调度中心的HTTP接口，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 执行器接口
//! - `POST /api/registry` - 执行器注册/心跳
//! - `POST /api/registryRemove` - 执行器摘除
//! - `POST /api/callback` - 执行结果回调
//!
//! ### 任务管理
//! - `POST /api/jobs/{id}/trigger` - 手动触发一次
//! - `POST /api/jobs/{id}/start` - 启动调度
//! - `POST /api/jobs/{id}/stop` - 停止调度
//!
//! ### 系统
//! - `GET /health` - 健康检查
//!
//! 除健康检查外的接口在配置了访问令牌时校验 `SCHEDULER-ACCESS-TOKEN` 请求头。
//! 响应统一为 `{code, msg, content}` 结构，`code` 为 200 表示成功。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_routes, AppState};
