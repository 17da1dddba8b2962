use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行器分组：按应用名聚合的在线地址列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobGroup {
    pub id: i64,
    pub app_name: String,
    pub title: String,
    pub address_type: AddressType,
    pub address_list: Vec<String>,
    pub update_time: DateTime<Utc>,
}

impl JobGroup {
    pub fn new(app_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            app_name: app_name.into(),
            title: title.into(),
            address_type: AddressType::Auto,
            address_list: Vec::new(),
            update_time: Utc::now(),
        }
    }

    pub fn manual(app_name: impl Into<String>, addresses: Vec<String>) -> Self {
        let mut group = Self::new(app_name, "");
        group.address_type = AddressType::Manual;
        group.address_list = addresses;
        group
    }
}

/// 地址类型：自动注册或手动录入
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressType {
    Auto,
    Manual,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Auto => "AUTO",
            AddressType::Manual => "MANUAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AUTO" => Some(AddressType::Auto),
            "MANUAL" => Some(AddressType::Manual),
            _ => None,
        }
    }
}

/// 注册类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryType {
    Executor,
    Admin,
}

impl RegistryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::Executor => "EXECUTOR",
            RegistryType::Admin => "ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EXECUTOR" => Some(RegistryType::Executor),
            "ADMIN" => Some(RegistryType::Admin),
            _ => None,
        }
    }
}

/// 注册心跳记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub registry_group: RegistryType,
    /// 应用名
    pub registry_key: String,
    /// 执行器地址
    pub registry_value: String,
    pub update_time: DateTime<Utc>,
}

/// 执行器心跳/注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryParam {
    pub registry_group: String,
    pub registry_key: String,
    pub registry_value: String,
}

impl RegistryParam {
    pub fn executor(app_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            registry_group: RegistryType::Executor.as_str().to_string(),
            registry_key: app_name.into(),
            registry_value: address.into(),
        }
    }
}
