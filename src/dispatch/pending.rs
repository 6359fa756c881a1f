use crate::error::Error;

/// The eventual result of an operation started with one of the `*_pending`
/// methods of [`super::Dispatcher`].
///
/// It can be waited on from a thread or awaited from any async runtime. Dropping
/// it does not cancel the operation; its result is discarded.
#[derive(Debug)]
#[must_use = "the result is lost unless the pending operation is waited on"]
pub struct Pending<T> {
    rx: async_channel::Receiver<Result<T, Error>>,
}

impl<T> Pending<T> {
    pub(crate) fn new(rx: async_channel::Receiver<Result<T, Error>>) -> Self {
        Self { rx }
    }

    /// Blocks the current thread until the operation finishes.
    pub fn wait(self) -> Result<T, Error> {
        self.rx.recv_blocking().unwrap_or_else(|_| Err(vanished()))
    }

    /// Waits for the operation without blocking a thread.
    pub async fn join(self) -> Result<T, Error> {
        self.rx.recv().await.unwrap_or_else(|_| Err(vanished()))
    }

    /// The result, if the operation has already finished.
    pub fn try_take(&self) -> Option<Result<T, Error>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(async_channel::TryRecvError::Empty) => None,
            Err(async_channel::TryRecvError::Closed) => Some(Err(vanished())),
        }
    }
}

fn vanished() -> Error {
    Error::Dispatch("the worker running the operation went away".to_string())
}
