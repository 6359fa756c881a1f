//! Non-blocking forms of every loader and transform operation.
//!
//! Work runs on the dispatcher's worker pool. Each operation completes in one of
//! two ways:
//!
//! - Callback form (`read_xml_file`, `transform`, ...): the callback fires exactly
//!   once, with either the value or the error. Callbacks are queued and only run
//!   inside [`Dispatcher::run`] or [`Dispatcher::run_pending`], so they never run
//!   concurrently with each other or with the code driving the dispatcher.
//! - Future form (`read_xml_file_pending`, ...): returns a [`Pending`] that can be
//!   waited on or awaited.
//!
//! Operations cannot be cancelled, and completions arrive in no particular order.

mod builder;
mod pending;

pub use builder::DispatcherBuilder;
pub use pending::Pending;

use crate::document::{HtmlDocument, SourceDocument, Stylesheet, XmlDocument};
use crate::error::{Error, ErrorKind};
use crate::loader;
use crate::params::ParameterList;
use crate::transform;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use xform_executor::{Executor, ExecutorImpl};

type Completion = Box<dyn FnOnce() + Send>;

/// Runs operations on a worker pool and delivers their completions.
///
/// Cloning is cheap; clones share the pool and the completion queue, so a
/// callback can hold a clone to start follow-up work.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    executor: ExecutorImpl,
    completions_tx: async_channel::Sender<Completion>,
    completions_rx: async_channel::Receiver<Completion>,
    /// Callbacks dispatched but not yet run.
    outstanding: AtomicUsize,
    driving: AtomicBool,
}

/// Marks the dispatcher as being driven for as long as it lives.
struct DriveGuard<'d>(&'d AtomicBool);

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Dispatcher {
    /// A dispatcher with the default pool: one worker per logical CPU.
    pub fn new() -> Result<Self, Error> {
        DispatcherBuilder::new().build()
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub(crate) fn with_executor(executor: ExecutorImpl) -> Self {
        log::debug!(
            "dispatcher using {} with parallelism {}",
            executor.name(),
            executor.parallelism()
        );
        let (completions_tx, completions_rx) = async_channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                executor,
                completions_tx,
                completions_rx,
                outstanding: AtomicUsize::new(0),
                driving: AtomicBool::new(false),
            }),
        }
    }

    /// Number of worker threads, 1 for an inline executor.
    pub fn parallelism(&self) -> usize {
        self.inner.executor.parallelism()
    }

    /// Callbacks that have been dispatched but have not run yet.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Runs callbacks on the current thread until every dispatched operation,
    /// including those dispatched by the callbacks themselves, has completed.
    /// Returns how many callbacks ran.
    pub fn run(&self) -> Result<usize, Error> {
        let _guard = self.drive()?;
        let mut delivered = 0;
        while self.outstanding() > 0 {
            let completion = self.inner.completions_rx.recv_blocking().map_err(|_| {
                Error::Dispatch("completion queue closed".to_string())
            })?;
            self.deliver(completion);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Runs the callbacks whose operations have already finished, without waiting
    /// for the rest. Returns how many callbacks ran.
    pub fn run_pending(&self) -> Result<usize, Error> {
        let _guard = self.drive()?;
        let mut delivered = 0;
        while let Ok(completion) = self.inner.completions_rx.try_recv() {
            self.deliver(completion);
            delivered += 1;
        }
        Ok(delivered)
    }

    fn drive(&self) -> Result<DriveGuard<'_>, Error> {
        if self.inner.driving.swap(true, Ordering::SeqCst) {
            return Err(Error::Dispatch(
                "the dispatcher is already being run".to_string(),
            ));
        }
        Ok(DriveGuard(&self.inner.driving))
    }

    fn deliver(&self, completion: Completion) {
        let outcome = catch_unwind(AssertUnwindSafe(completion));
        self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
        if let Err(panic) = outcome {
            resume_unwind(panic);
        }
    }

    // --- Callback form ---

    pub fn read_xml_string<F>(&self, text: impl Into<String>, callback: F)
    where
        F: FnOnce(Result<XmlDocument, Error>) + Send + 'static,
    {
        let text = text.into();
        self.submit(ErrorKind::XmlParse, move || loader::read_xml_string(&text), callback);
    }

    pub fn read_xml_file<F>(&self, path: impl Into<PathBuf>, callback: F)
    where
        F: FnOnce(Result<XmlDocument, Error>) + Send + 'static,
    {
        let path = path.into();
        self.submit(ErrorKind::XmlParse, move || loader::read_xml_file(&path), callback);
    }

    pub fn read_html_string<F>(&self, text: impl Into<String>, callback: F)
    where
        F: FnOnce(Result<HtmlDocument, Error>) + Send + 'static,
    {
        let text = text.into();
        self.submit(ErrorKind::HtmlParse, move || loader::read_html_string(&text), callback);
    }

    pub fn read_html_file<F>(&self, path: impl Into<PathBuf>, callback: F)
    where
        F: FnOnce(Result<HtmlDocument, Error>) + Send + 'static,
    {
        let path = path.into();
        self.submit(ErrorKind::HtmlParse, move || loader::read_html_file(&path), callback);
    }

    pub fn read_xslt_string<F>(&self, text: impl Into<String>, callback: F)
    where
        F: FnOnce(Result<Stylesheet, Error>) + Send + 'static,
    {
        let text = text.into();
        self.submit(ErrorKind::XsltParse, move || loader::read_xslt_string(&text), callback);
    }

    pub fn read_xslt_file<F>(&self, path: impl Into<PathBuf>, callback: F)
    where
        F: FnOnce(Result<Stylesheet, Error>) + Send + 'static,
    {
        let path = path.into();
        self.submit(ErrorKind::XsltParse, move || loader::read_xslt_file(&path), callback);
    }

    /// Applies `stylesheet` to `document` on a worker. Both handles stay usable
    /// by the caller while the transform runs.
    pub fn transform<D, F>(
        &self,
        stylesheet: &Stylesheet,
        document: &D,
        params: &ParameterList,
        callback: F,
    ) where
        D: SourceDocument + ?Sized,
        F: FnOnce(Result<String, Error>) + Send + 'static,
    {
        let template = stylesheet.template().clone();
        let tree = document.shared_tree();
        let params = params.clone();
        self.submit(
            ErrorKind::Transform,
            move || transform::apply(&template, &tree, &params),
            callback,
        );
    }

    // --- Future form ---

    pub fn read_xml_string_pending(&self, text: impl Into<String>) -> Pending<XmlDocument> {
        let text = text.into();
        self.pending(ErrorKind::XmlParse, move || loader::read_xml_string(&text))
    }

    pub fn read_xml_file_pending(&self, path: impl Into<PathBuf>) -> Pending<XmlDocument> {
        let path = path.into();
        self.pending(ErrorKind::XmlParse, move || loader::read_xml_file(&path))
    }

    pub fn read_html_string_pending(&self, text: impl Into<String>) -> Pending<HtmlDocument> {
        let text = text.into();
        self.pending(ErrorKind::HtmlParse, move || loader::read_html_string(&text))
    }

    pub fn read_html_file_pending(&self, path: impl Into<PathBuf>) -> Pending<HtmlDocument> {
        let path = path.into();
        self.pending(ErrorKind::HtmlParse, move || loader::read_html_file(&path))
    }

    pub fn read_xslt_string_pending(&self, text: impl Into<String>) -> Pending<Stylesheet> {
        let text = text.into();
        self.pending(ErrorKind::XsltParse, move || loader::read_xslt_string(&text))
    }

    pub fn read_xslt_file_pending(&self, path: impl Into<PathBuf>) -> Pending<Stylesheet> {
        let path = path.into();
        self.pending(ErrorKind::XsltParse, move || loader::read_xslt_file(&path))
    }

    pub fn transform_pending<D: SourceDocument + ?Sized>(
        &self,
        stylesheet: &Stylesheet,
        document: &D,
        params: &ParameterList,
    ) -> Pending<String> {
        let template = stylesheet.template().clone();
        let tree = document.shared_tree();
        let params = params.clone();
        self.pending(ErrorKind::Transform, move || {
            transform::apply(&template, &tree, &params)
        })
    }

    /// Applies one stylesheet to many documents in parallel and blocks until all
    /// are done. Results are in the order of `documents`.
    pub fn transform_all<D: SourceDocument>(
        &self,
        stylesheet: &Stylesheet,
        documents: &[D],
        params: &ParameterList,
    ) -> Vec<Result<String, Error>> {
        let template = stylesheet.template().clone();
        let params = Arc::new(params.clone());
        let trees: Vec<_> = documents.iter().map(|d| d.shared_tree()).collect();
        self.inner.executor.execute_all_fallible(trees, move |tree| {
            guarded(ErrorKind::Transform, || {
                transform::apply(&template, &tree, &params)
            })
        })
    }

    fn submit<T, W, F>(&self, kind: ErrorKind, work: W, callback: F)
    where
        T: Send + 'static,
        W: FnOnce() -> Result<T, Error> + Send + 'static,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        let tx = self.inner.completions_tx.clone();
        self.inner.executor.spawn(move || {
            let result = guarded(kind, work);
            let completion: Completion = Box::new(move || callback(result));
            if tx.try_send(completion).is_err() {
                log::warn!("dispatcher dropped before a completion could be delivered");
            }
        });
    }

    fn pending<T, W>(&self, kind: ErrorKind, work: W) -> Pending<T>
    where
        T: Send + 'static,
        W: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        let (tx, rx) = async_channel::bounded(1);
        self.inner.executor.spawn(move || {
            if tx.try_send(guarded(kind, work)).is_err() {
                log::debug!("pending {:?} operation finished after it was dropped", kind);
            }
        });
        Pending::new(rx)
    }
}

/// Runs `work`, turning a panic into an error of `kind`.
fn guarded<T>(kind: ErrorKind, work: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|panic| {
        let error = Error::from_panic(kind, panic);
        log::error!("{}", error);
        Err(error)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use xform_executor::SyncExecutor;

    fn inline() -> Dispatcher {
        Dispatcher::with_executor(ExecutorImpl::Sync(SyncExecutor::new()))
    }

    #[test]
    fn test_callbacks_wait_for_run() {
        let dispatcher = inline();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.read_xml_string("<a/>", move |result| {
            sink.lock().unwrap().push(result.map(|d| d.root_name().map(str::to_string)).ok());
        });
        // The work already ran inline, but the callback is still queued.
        assert_eq!(dispatcher.outstanding(), 1);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(dispatcher.run().unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some(Some("a".to_string()))]);
        assert_eq!(dispatcher.outstanding(), 0);
    }

    #[test]
    fn test_callbacks_can_dispatch_more_work() {
        let dispatcher = inline();
        let count = Arc::new(AtomicUsize::new(0));
        let follow_up = dispatcher.clone();
        let counter = count.clone();
        dispatcher.read_xslt_string("not xml", move |result| {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::XmlParse);
            counter.fetch_add(1, Ordering::SeqCst);
            let counter = counter.clone();
            follow_up.read_html_string("<p>hi", move |result| {
                assert!(result.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });
        assert_eq!(dispatcher.run().unwrap(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_run_cannot_be_reentered() {
        let dispatcher = inline();
        let inner = dispatcher.clone();
        let nested = Arc::new(Mutex::new(None));
        let slot = nested.clone();
        dispatcher.read_xml_string("<a/>", move |_| {
            *slot.lock().unwrap() = Some(inner.run().map_err(|e| e.kind()));
        });
        dispatcher.run().unwrap();
        assert_eq!(*nested.lock().unwrap(), Some(Err(ErrorKind::Dispatch)));
    }

    #[test]
    fn test_panics_become_errors_of_the_operation_kind() {
        let dispatcher = inline();
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        dispatcher.submit(
            ErrorKind::Transform,
            || -> Result<(), Error> { panic!("engine bug") },
            move |r| *slot.lock().unwrap() = Some(r.map_err(|e| e.to_string())),
        );
        dispatcher.run().unwrap();
        let message = result.lock().unwrap().take().unwrap().unwrap_err();
        assert!(message.starts_with("Failed to apply stylesheet"));
        assert!(message.contains("engine bug"));
    }

    #[test]
    fn test_run_pending_only_drains_finished_work() {
        let dispatcher = inline();
        assert_eq!(dispatcher.run_pending().unwrap(), 0);
        dispatcher.read_xml_string("<a/>", |_| {});
        dispatcher.read_xml_string("<b/>", |_| {});
        assert_eq!(dispatcher.run_pending().unwrap(), 2);
        assert_eq!(dispatcher.run().unwrap(), 0);
    }

    #[test]
    fn test_pending_results() {
        let dispatcher = inline();
        let doc = dispatcher.read_xml_string_pending("<root/>").wait().unwrap();
        assert_eq!(doc.root_name(), Some("root"));
        let pending = dispatcher.read_xml_string_pending("<broken");
        let err = pending.try_take().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::XmlParse);
    }
}
