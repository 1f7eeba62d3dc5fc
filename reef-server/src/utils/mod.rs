//! 工具模块

pub mod id;
pub mod lock;
pub mod logger;

pub use id::{AllocatorError, IdAllocator};
pub use lock::{LockHandle, LockManager};
