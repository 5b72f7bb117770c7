pub mod memory;
#[cfg(feature = "distributed")]
pub mod redis;
pub mod traits;

pub use memory::MemoryCoordination;
#[cfg(feature = "distributed")]
pub use redis::{RedisCoordination, RedisCredentials};
pub use traits::CoordinationBackend;
