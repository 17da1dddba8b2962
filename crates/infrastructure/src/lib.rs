pub mod alert;
pub mod database;
pub mod executor_client;
pub mod memory;
pub mod observability;

pub use alert::*;
pub use database::*;
pub use executor_client::*;
pub use memory::*;
pub use observability::*;
