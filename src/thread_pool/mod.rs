//! Worker pool management
//!
//! Centralizes thread pool creation so the simulation and the component
//! tracker share a bounded set of workers instead of spawning ad hoc.

pub mod thread_pool;

pub use thread_pool::{PoolCategory, ThreadPoolConfig, ThreadPoolManager};
