//! Serialized execution context backing a camera session.
//!
//! Each session owns one worker thread. The worker owns the session state;
//! everything else (USB monitor threads, the frame source, the capturer)
//! reaches the state only by posting jobs, which run one at a time in
//! submission order.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::types::CameraError;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

thread_local! {
    // Id of the executor whose worker runs on this thread.
    static CURRENT_WORKER: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Whether the calling thread is the worker of any [`SerialExecutor`].
pub fn on_worker_thread() -> bool {
    CURRENT_WORKER.with(|current| current.get().is_some())
}

/// Posting side of a session worker. Cheap to clone.
pub struct SerialExecutor<S> {
    id: u64,
    name: Arc<str>,
    tx: Sender<Job<S>>,
}

impl<S> Clone for SerialExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

impl<S> std::fmt::Debug for SerialExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Worker that has been created but not started yet.
///
/// Jobs posted before [`PendingWorker::start`] are buffered and run first,
/// in order, once the worker starts.
pub struct PendingWorker<S> {
    id: u64,
    name: Arc<str>,
    rx: Receiver<Job<S>>,
}

impl<S: Send + 'static> SerialExecutor<S> {
    pub fn new(name: impl Into<String>) -> (Self, PendingWorker<S>) {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = Arc::from(name.into());
        let (tx, rx) = mpsc::channel();
        (
            Self {
                id,
                name: Arc::clone(&name),
                tx,
            },
            PendingWorker { id, name, rx },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is this executor's worker.
    pub fn is_current(&self) -> bool {
        CURRENT_WORKER.with(|current| current.get() == Some(self.id))
    }

    /// Queue `job` to run on the worker with exclusive access to the state.
    ///
    /// # Errors
    /// * `CameraError::SessionClosed` - If the worker has exited
    pub fn post<F>(&self, job: F) -> Result<(), CameraError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .map_err(|_| CameraError::SessionClosed)
    }

    /// Run `job` on the worker and block the caller until it returns.
    ///
    /// # Errors
    /// * `CameraError::WouldDeadlock` - If called from the worker itself
    /// * `CameraError::SessionClosed` - If the worker exited before running the job
    pub fn run_sync<R, F>(&self, job: F) -> Result<R, CameraError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_current() {
            return Err(CameraError::WouldDeadlock(self.name.to_string()));
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.post(move |state| {
            let _ = reply_tx.send(job(state));
        })?;
        reply_rx.recv().map_err(|_| CameraError::SessionClosed)
    }
}

impl<S: Send + 'static> PendingWorker<S> {
    /// Spawn the worker thread, handing it ownership of `state`.
    ///
    /// The thread exits once every [`SerialExecutor`] clone is dropped.
    pub fn start(self, state: S) -> Result<JoinHandle<()>, CameraError> {
        let name = self.name.to_string();
        let id = self.id;
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(id, state, self.rx))?;
        Ok(handle)
    }
}

fn run_worker<S>(id: u64, mut state: S, rx: Receiver<Job<S>>) {
    CURRENT_WORKER.with(|current| current.set(Some(id)));
    for job in rx {
        job(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let (executor, worker) = SerialExecutor::<Vec<u32>>::new("order");
        worker.start(Vec::new()).unwrap();

        for i in 0..50 {
            executor.post(move |log| log.push(i)).unwrap();
        }
        let log = executor.run_sync(|log| log.clone()).unwrap();
        assert_eq!(log, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_jobs_posted_before_start_are_buffered() {
        let (executor, worker) = SerialExecutor::<Vec<&'static str>>::new("buffered");
        executor.post(|log| log.push("first")).unwrap();
        executor.post(|log| log.push("second")).unwrap();

        worker.start(vec!["initial"]).unwrap();
        let log = executor.run_sync(|log| log.clone()).unwrap();
        assert_eq!(log, vec!["initial", "first", "second"]);
    }

    #[test]
    fn test_jobs_run_on_the_named_worker_thread() {
        let (executor, worker) = SerialExecutor::<()>::new("uvc-test-worker");
        worker.start(()).unwrap();
        let name = executor
            .run_sync(|_| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("uvc-test-worker"));
        assert_eq!(executor.name(), "uvc-test-worker");
    }

    #[test]
    fn test_worker_exits_when_executor_dropped() {
        let (executor, worker) = SerialExecutor::<()>::new("exit");
        let handle = worker.start(()).unwrap();
        drop(executor);
        handle.join().unwrap();
    }

    #[test]
    fn test_post_after_worker_panicked_reports_closed() {
        let (executor, worker) = SerialExecutor::<()>::new("panic");
        let handle = worker.start(()).unwrap();
        executor.post(|_| panic!("contract violation")).unwrap();
        assert!(handle.join().is_err());
        assert!(matches!(
            executor.post(|_| {}),
            Err(CameraError::SessionClosed)
        ));
    }

    #[test]
    fn test_run_sync_on_own_worker_is_refused() {
        let (executor, worker) = SerialExecutor::<()>::new("reentrant");
        let (inner, inner_worker) = SerialExecutor::<()>::new("inner");
        inner_worker.start(()).unwrap();
        worker.start(()).unwrap();

        let outer = executor.clone();
        let (nested, on_worker, other_ok) = executor
            .run_sync(move |_| {
                (
                    outer.run_sync(|_| ()),
                    on_worker_thread(),
                    inner.run_sync(|_| 7).ok(),
                )
            })
            .unwrap();

        assert!(matches!(nested, Err(CameraError::WouldDeadlock(name)) if name == "reentrant"));
        assert!(on_worker);
        assert_eq!(other_ok, Some(7));
        assert!(!executor.is_current());
        assert!(!on_worker_thread());
    }

    #[test]
    fn test_post_to_never_started_worker_is_closed_once_dropped() {
        let (executor, worker) = SerialExecutor::<()>::new("dropped");
        drop(worker);
        assert!(matches!(executor.post(|_| {}), Err(CameraError::SessionClosed)));
    }
}
