use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;

use futures::channel::oneshot;
use rusqlite::Connection;

use crate::persistence::error::{closed_error, internal_error, PersistenceResult};

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreTarget {
    Path(PathBuf),
    Memory,
}

/// Owns the sole writable handle to the SQLite store.
///
/// All reads and writes are closures dispatched FIFO on one dedicated worker
/// thread, so every job observes a consistent snapshot and may open its own
/// transaction. Cloning the worker clones a handle to the same queue.
#[derive(Clone)]
pub struct PersistenceWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    queue: async_channel::Sender<Job>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl PersistenceWorker {
    /// Opens the store at `path` and starts the worker thread.
    pub async fn open(path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        Self::start(StoreTarget::Path(path.into())).await
    }

    /// Opens a private in-memory store. The contents are lost on shutdown.
    pub async fn open_in_memory() -> PersistenceResult<Self> {
        Self::start(StoreTarget::Memory).await
    }

    async fn start(target: StoreTarget) -> PersistenceResult<Self> {
        let (queue, jobs) = async_channel::unbounded::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = std::thread::Builder::new()
            .name("noted-persistence".into())
            .spawn(move || run_worker(target, jobs, ready_tx))
            .map_err(|err| internal_error(format!("failed to spawn persistence thread: {}", err)))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                inner: Arc::new(WorkerInner {
                    queue,
                    handle: StdMutex::new(Some(handle)),
                }),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => Err(internal_error("persistence thread exited before opening the store")),
        }
    }

    /// Submits a job and waits for its result. Job errors propagate to the
    /// caller; a worker that has been shut down yields a `closed` error.
    pub async fn submit<T, F>(&self, job: F) -> PersistenceResult<T>
    where
        F: FnOnce(&mut Connection) -> PersistenceResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::new(move |conn| {
            let result = job(conn);
            if let Err(err) = &result {
                log::warn!("persistence job failed: {}", err);
            }
            let _ = tx.send(result);
        });

        self.inner
            .queue
            .send(wrapped)
            .await
            .map_err(|_| closed_error("persistence worker is shut down"))?;

        rx.await
            .map_err(|_| closed_error("persistence worker stopped before running the job"))?
    }

    /// Submits a fire-and-forget job. Failures are logged and swallowed.
    pub fn submit_detached<F>(&self, job: F)
    where
        F: FnOnce(&mut Connection) -> PersistenceResult<()> + Send + 'static,
    {
        let wrapped: Job = Box::new(move |conn| {
            if let Err(err) = job(conn) {
                log::error!("detached persistence job failed: {}", err);
            }
        });

        if self.inner.queue.try_send(wrapped).is_err() {
            log::warn!("dropping persistence job submitted after shutdown");
        }
    }

    /// Closes the queue, drains every job already submitted, closes the store
    /// and joins the worker thread. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.queue.close();

        let handle = self.inner.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

fn run_worker(
    target: StoreTarget,
    jobs: async_channel::Receiver<Job>,
    ready: oneshot::Sender<PersistenceResult<()>>,
) {
    let mut conn = match open_connection(target) {
        Ok(conn) => {
            let _ = ready.send(Ok(()));
            conn
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    log::info!("persistence worker thread started");

    // recv_blocking drains remaining jobs after the queue is closed, so
    // shutdown never discards work that was already accepted.
    while let Ok(job) = jobs.recv_blocking() {
        job(&mut conn);
    }

    if let Err((_, err)) = conn.close() {
        log::error!("failed to close store cleanly: {}", err);
    }
    log::info!("persistence worker thread stopped");
}

fn open_connection(target: StoreTarget) -> PersistenceResult<Connection> {
    let conn = match target {
        StoreTarget::Path(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        internal_error(format!(
                            "failed to create store directory '{}': {}",
                            parent.display(),
                            err
                        ))
                    })?;
                }
            }
            Connection::open(&path)?
        }
        StoreTarget::Memory => Connection::open_in_memory()?,
    };
    Ok(conn)
}
