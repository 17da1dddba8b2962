pub mod admin_schedule;
pub mod api_observability;
pub mod app_config;
pub mod database;

pub use admin_schedule::{AdminConfig, ScheduleConfig};
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::{DatabaseConfig, MEMORY_DATABASE_URL};
