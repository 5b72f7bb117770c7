pub mod builder;
mod core;
pub(crate) mod dispatch;
pub(crate) mod queue;

pub use builder::CdsBuilder;
pub use core::ComputeDataService;
