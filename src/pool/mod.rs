//! Account pool allocation.

mod manager;

pub use manager::{PoolError, PoolManager, PoolStats};
