/// Global Thread Pool Manager
///
/// Centralizes thread pool management to prevent thread exhaustion and
/// keep the per-step fan-out and the component jobs on dedicated,
/// predictably sized pools.
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Thread pool categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolCategory {
    /// Per-block step and maintenance tasks
    Simulation,
    /// Per-component update tasks and manager maintenance
    Components,
}

impl PoolCategory {
    fn name(self) -> &'static str {
        match self {
            PoolCategory::Simulation => "sim",
            PoolCategory::Components => "components",
        }
    }
}

/// Configuration for thread pools
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Total number of threads available to the engine
    pub total_threads: usize,
    /// Enable thread naming
    pub enable_thread_names: bool,
    /// Stack size for worker threads (in bytes)
    pub stack_size: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        let cpu_count = num_cpus::get();
        // Leave headroom for the caller's own threads.
        let total_threads = cpu_count.saturating_sub(2).max(2);
        Self {
            total_threads,
            enable_thread_names: true,
            stack_size: Some(2 * 1024 * 1024),
        }
    }
}

impl ThreadPoolConfig {
    pub fn with_total_threads(total_threads: usize) -> Self {
        Self {
            total_threads: total_threads.max(1),
            ..Self::default()
        }
    }

    fn category_threads(&self, category: PoolCategory) -> usize {
        match category {
            PoolCategory::Simulation => self.total_threads,
            PoolCategory::Components => (self.total_threads / 2).max(1),
        }
    }
}

/// Global thread pool manager
pub struct ThreadPoolManager {
    pools: RwLock<HashMap<PoolCategory, Arc<ThreadPool>>>,
    config: ThreadPoolConfig,
}

static THREAD_POOL_MANAGER: OnceLock<Arc<ThreadPoolManager>> = OnceLock::new();

impl ThreadPoolManager {
    /// Initialize the global thread pool manager. Fails if it was already
    /// initialized (the existing pools keep running).
    pub fn initialize(config: ThreadPoolConfig) -> Result<(), String> {
        if THREAD_POOL_MANAGER.get().is_some() {
            return Err("thread pool manager already initialized".to_string());
        }
        THREAD_POOL_MANAGER
            .set(Arc::new(Self::new(config)))
            .map_err(|_| "failed to set thread pool manager".to_string())
    }

    /// Get the global thread pool manager, creating it with defaults on
    /// first use
    pub fn global() -> Arc<ThreadPoolManager> {
        THREAD_POOL_MANAGER
            .get_or_init(|| Arc::new(Self::new(ThreadPoolConfig::default())))
            .clone()
    }

    fn new(config: ThreadPoolConfig) -> Self {
        log::info!(
            "[ThreadPoolManager] initialized with {} total threads",
            config.total_threads
        );
        Self {
            pools: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Pool for a category, built lazily on first use
    pub fn pool(&self, category: PoolCategory) -> Arc<ThreadPool> {
        if let Some(pool) = self.pools.read().get(&category) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(&category) {
            return Arc::clone(pool);
        }
        let threads = self.config.category_threads(category);
        let mut builder = ThreadPoolBuilder::new().num_threads(threads);
        if self.config.enable_thread_names {
            let name = category.name();
            builder = builder.thread_name(move |i| format!("cascade-{}-{}", name, i));
        }
        if let Some(stack) = self.config.stack_size {
            builder = builder.stack_size(stack);
        }
        let pool = Arc::new(
            builder
                .build()
                .unwrap_or_else(|e| panic!("failed to build {} pool: {}", category.name(), e)),
        );
        log::debug!(
            "[ThreadPoolManager] built {} pool with {} threads",
            category.name(),
            threads
        );
        pools.insert(category, Arc::clone(&pool));
        pool
    }

    /// Fire-and-forget a task onto a category pool
    pub fn spawn(&self, category: PoolCategory, task: impl FnOnce() + Send + 'static) {
        self.pool(category).spawn(task);
    }

    /// Run a closure inside a category pool, blocking until it returns
    pub fn install<R: Send>(
        &self,
        category: PoolCategory,
        task: impl FnOnce() -> R + Send,
    ) -> R {
        self.pool(category).install(task)
    }

    pub fn config(&self) -> &ThreadPoolConfig {
        &self.config
    }
}
