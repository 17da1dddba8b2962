pub mod group;
pub mod job;
pub mod log;
pub mod report;
pub mod trigger;

pub use group::*;
pub use job::*;
pub use log::*;
pub use report::*;
pub use trigger::*;
