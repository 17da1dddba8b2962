pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::SchedulerError;

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
