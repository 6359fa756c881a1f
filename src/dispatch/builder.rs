use super::Dispatcher;
use crate::error::Error;
use xform_executor::ExecutorImpl;

/// Configures a [`Dispatcher`].
///
/// By default the pool has one worker per logical CPU, or runs work inline when
/// the crate is built without the `rayon-executor` feature.
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    worker_count: Option<usize>,
    executor: Option<ExecutorImpl>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads.
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = Some(workers);
        self
    }

    /// Uses an existing executor, for example a `SyncExecutor` in environments
    /// without threads. Takes precedence over [`Self::with_worker_count`].
    pub fn with_executor(mut self, executor: ExecutorImpl) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<Dispatcher, Error> {
        let executor = match (self.executor, self.worker_count) {
            (Some(executor), _) => executor,
            (None, Some(workers)) => ExecutorImpl::with_workers(workers)?,
            (None, None) => ExecutorImpl::try_default()?,
        };
        Ok(Dispatcher::with_executor(executor))
    }
}
