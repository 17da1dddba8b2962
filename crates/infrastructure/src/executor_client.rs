use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use scheduler_core::{
    models::{ExecutorResponse, IdleBeatParam, KillParam, TriggerParam},
    traits::{ExecutorClient, ExecutorClientFactory},
    SchedulerError, SchedulerResult,
};

/// 访问令牌请求头
pub const ACCESS_TOKEN_HEADER: &str = "SCHEDULER-ACCESS-TOKEN";

/// 基于HTTP的执行器客户端
pub struct HttpExecutorClient {
    address: String,
    access_token: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpExecutorClient {
    pub fn new(
        address: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            address: address.into(),
            access_token,
            timeout,
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.address.trim_end_matches('/'), path)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> SchedulerResult<ExecutorResponse> {
        let url = self.url(path);
        let mut request = self
            .http_client
            .post(&url)
            .json(body)
            .timeout(self.timeout);
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.header(ACCESS_TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| {
            warn!("执行器请求失败 {}: {}", url, e);
            SchedulerError::Network(format!("executor request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::Network(format!(
                "executor {url} responded HTTP {status}"
            )));
        }

        let result = response.json::<ExecutorResponse>().await.map_err(|e| {
            SchedulerError::Serialization(format!("invalid executor response from {url}: {e}"))
        })?;
        debug!("执行器响应 {} -> {}", url, result.code);
        Ok(result)
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn run(&self, param: &TriggerParam) -> SchedulerResult<ExecutorResponse> {
        self.post("run", param).await
    }

    async fn beat(&self) -> SchedulerResult<ExecutorResponse> {
        self.post("beat", &serde_json::json!({})).await
    }

    async fn idle_beat(&self, param: &IdleBeatParam) -> SchedulerResult<ExecutorResponse> {
        self.post("idleBeat", param).await
    }

    async fn kill(&self, param: &KillParam) -> SchedulerResult<ExecutorResponse> {
        self.post("kill", param).await
    }
}

/// HTTP执行器客户端工厂，所有客户端共享同一个连接池
pub struct HttpExecutorClientFactory {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpExecutorClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl ExecutorClientFactory for HttpExecutorClientFactory {
    fn create(&self, address: &str, access_token: Option<&str>) -> Arc<dyn ExecutorClient> {
        Arc::new(HttpExecutorClient::new(
            address,
            access_token.map(str::to_string),
            self.timeout,
            self.http_client.clone(),
        ))
    }
}
