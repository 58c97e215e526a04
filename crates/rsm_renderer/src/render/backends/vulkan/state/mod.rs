//! Vulkan synchronization and load-time concurrency

pub mod pool;
pub mod sync;

pub use pool::AsyncPool;
pub use sync::{Fence, Semaphore};
