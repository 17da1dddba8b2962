pub mod executor;
pub mod lock;
pub mod repository;

pub use executor::*;
pub use lock::*;
pub use repository::*;
