//! Worker pools for running xform operations off the calling thread.
//!
//! ## Available Executors
//!
//! - [`SyncExecutor`]: runs every job inline on the caller
//! - [`RayonExecutor`]: dedicated work-stealing thread pool (feature: `rayon`)
//!
//! ## Usage
//!
//! ```ignore
//! use xform_executor::{Executor, ExecutorImpl, RayonExecutor};
//!
//! let executor = ExecutorImpl::Rayon(RayonExecutor::new()?);
//! executor.spawn(|| println!("on a worker"));
//! let results = executor.execute_all(vec![1, 2, 3], |x| x * 2);
//! ```

mod sync;

#[cfg(feature = "rayon")]
mod rayon_executor;

#[cfg(feature = "rayon")]
pub use rayon_executor::RayonExecutor;
pub use sync::SyncExecutor;

use std::fmt::Debug;
use thiserror::Error;

/// Error type for executor construction.
#[derive(Error, Debug, Clone)]
#[error("Executor error: {message}")]
pub struct ExecutorError {
    pub message: String,
}

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Runs work items, possibly on other threads.
///
/// `spawn` is fire-and-forget: the job reports back through whatever channel it
/// captured. The batch methods block until every item is done and return results
/// in input order.
pub trait Executor: Send + Sync + Debug {
    /// Runs `job` once, either inline or on a worker.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;

    /// Applies `f` to every item, potentially in parallel.
    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + Clone + 'static;

    /// Like `execute_all` for operations that may fail.
    fn execute_all_fallible<T, R, E, F>(&self, items: Vec<T>, f: F) -> Vec<Result<R, E>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + Clone + 'static;

    /// 1 for inline executors, the worker count otherwise.
    fn parallelism(&self) -> usize;

    /// A human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// A type-erased executor that wraps concrete executor implementations.
///
/// Since the `Executor` trait has generic methods, it cannot be used as a trait object
/// (`dyn Executor`). This enum holds the concrete types and delegates to them.
#[derive(Clone, Debug)]
pub enum ExecutorImpl {
    /// Inline execution (no parallelism)
    Sync(SyncExecutor),

    /// Dedicated rayon thread pool
    #[cfg(feature = "rayon")]
    Rayon(RayonExecutor),
}

impl ExecutorImpl {
    /// The best executor available in this build, sized by the number of CPUs.
    pub fn try_default() -> Result<Self, ExecutorError> {
        #[cfg(feature = "rayon")]
        {
            Ok(ExecutorImpl::Rayon(RayonExecutor::new()?))
        }
        #[cfg(not(feature = "rayon"))]
        {
            Ok(ExecutorImpl::Sync(SyncExecutor::new()))
        }
    }

    /// Like [`ExecutorImpl::try_default`] with an explicit worker count. Without
    /// the `rayon` feature the count is ignored.
    pub fn with_workers(workers: usize) -> Result<Self, ExecutorError> {
        #[cfg(feature = "rayon")]
        {
            Ok(ExecutorImpl::Rayon(RayonExecutor::with_threads(workers)?))
        }
        #[cfg(not(feature = "rayon"))]
        {
            log::debug!("ignoring worker count {}: built without rayon", workers);
            Ok(ExecutorImpl::Sync(SyncExecutor::new()))
        }
    }
}

impl Executor for ExecutorImpl {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            ExecutorImpl::Sync(exec) => exec.spawn(job),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.spawn(job),
        }
    }

    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + Clone + 'static,
    {
        match self {
            ExecutorImpl::Sync(exec) => exec.execute_all(items, f),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.execute_all(items, f),
        }
    }

    fn execute_all_fallible<T, R, E, F>(&self, items: Vec<T>, f: F) -> Vec<Result<R, E>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + Clone + 'static,
    {
        match self {
            ExecutorImpl::Sync(exec) => exec.execute_all_fallible(items, f),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.execute_all_fallible(items, f),
        }
    }

    fn parallelism(&self) -> usize {
        match self {
            ExecutorImpl::Sync(exec) => exec.parallelism(),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.parallelism(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ExecutorImpl::Sync(exec) => exec.name(),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::new("test error");
        assert_eq!(err.to_string(), "Executor error: test error");
    }

    #[test]
    fn test_executor_impl_delegates() {
        let executor = ExecutorImpl::Sync(SyncExecutor::new());
        assert_eq!(executor.name(), "SyncExecutor");
        assert_eq!(executor.execute_all(vec![1, 2], |x| x + 1), vec![2, 3]);
    }

    #[test]
    fn test_default_executor_has_workers() {
        let executor = ExecutorImpl::try_default().unwrap();
        assert!(executor.parallelism() >= 1);
    }
}
