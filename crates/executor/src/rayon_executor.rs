//! Rayon-based parallel executor.

use crate::{Executor, ExecutorError};
use rayon::prelude::*;
use std::sync::Arc;

/// A parallel executor backed by its own rayon thread pool.
///
/// The pool is private to the executor (and its clones), so it does not compete
/// with rayon's global pool used elsewhere in an embedding application. Worker
/// threads are named `xform-worker-{index}`.
#[derive(Debug, Clone)]
pub struct RayonExecutor {
    pool: Arc<rayon::ThreadPool>,
}

impl RayonExecutor {
    /// Creates a pool with one worker per logical CPU.
    pub fn new() -> Result<Self, ExecutorError> {
        Self::with_threads(num_cpus::get())
    }

    /// Creates a pool with `threads` workers. Zero is treated as one.
    pub fn with_threads(threads: usize) -> Result<Self, ExecutorError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("xform-worker-{}", i))
            .build()
            .map_err(|e| ExecutorError::new(format!("could not build the worker pool: {}", e)))?;
        log::debug!("started worker pool with {} threads", threads);
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

impl Executor for RayonExecutor {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(job);
    }

    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + Clone + 'static,
    {
        self.pool.install(|| items.into_par_iter().map(f).collect())
    }

    fn execute_all_fallible<T, R, E, F>(&self, items: Vec<T>, f: F) -> Vec<Result<R, E>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + Clone + 'static,
    {
        self.pool.install(|| items.into_par_iter().map(f).collect())
    }

    fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn name(&self) -> &'static str {
        "RayonExecutor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_rayon_executor_keeps_input_order() {
        let executor = RayonExecutor::with_threads(4).unwrap();
        let results = executor.execute_all((0..100).collect(), |x: i32| x * 2);
        assert_eq!(results, (0..100).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_rayon_executor_handles_fallible_operations() {
        let executor = RayonExecutor::with_threads(2).unwrap();
        let results: Vec<Result<i32, &str>> = executor.execute_all_fallible(vec![1, 2, 0, 4], |x| {
            if x == 0 {
                Err("division by zero")
            } else {
                Ok(10 / x)
            }
        });
        assert_eq!(results, vec![Ok(10), Ok(5), Err("division by zero"), Ok(2)]);
    }

    #[test]
    fn test_rayon_executor_reports_configured_threads() {
        assert_eq!(RayonExecutor::with_threads(3).unwrap().parallelism(), 3);
        assert_eq!(RayonExecutor::with_threads(0).unwrap().parallelism(), 1);
        assert!(RayonExecutor::new().unwrap().parallelism() > 0);
    }

    #[test]
    fn test_spawned_jobs_run_on_named_workers() {
        let executor = RayonExecutor::with_threads(2).unwrap();
        let (tx, rx) = mpsc::channel();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let tx = tx.clone();
            let counter = counter.clone();
            executor.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let name = std::thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            });
        }
        drop(tx);
        let names: Vec<_> = rx.iter().collect();
        assert_eq!(names.len(), 10);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(
            names
                .iter()
                .all(|n| n.as_deref().is_some_and(|n| n.starts_with("xform-worker-")))
        );
    }
}
