use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rusqlite::OptionalExtension;

use crate::persistence::{PersistenceResult, PersistenceWorker};

/// Scalar logical clock, advanced on local events and on receipt of remote
/// events as `L <- max(L, remote) + 1`.
///
/// The canonical value lives in the single-row `lamport_clock` table; the
/// in-memory copy is the authoritative cache for the writers, which all
/// serialise through the persistence worker. Callers `tick()` or `observe()`
/// and then `persist()` before logging the operation that consumed the stamp.
#[derive(Clone)]
pub struct LamportClock {
    worker: PersistenceWorker,
    time: Arc<AtomicU64>,
}

impl LamportClock {
    pub fn new(worker: PersistenceWorker) -> Self {
        Self {
            worker,
            time: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Reads the persisted value, inserting 0 on first run.
    pub async fn initialize(&self) -> PersistenceResult<()> {
        let stored = self
            .worker
            .submit(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS lamport_clock(timestamp INTEGER PRIMARY KEY)",
                    [],
                )?;

                let existing = conn
                    .query_row("SELECT timestamp FROM lamport_clock", [], |row| {
                        row.get::<_, u64>(0)
                    })
                    .optional()?;
                if let Some(value) = existing {
                    return Ok(value);
                }

                conn.execute("INSERT INTO lamport_clock(timestamp) VALUES (0)", [])?;
                Ok(0)
            })
            .await?;

        self.time.store(stored, Ordering::SeqCst);
        Ok(())
    }

    /// Advances the clock for a locally originated event.
    pub fn tick(&self) -> u64 {
        self.time.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Folds a remote stamp into the clock: `L <- max(L, remote) + 1`.
    pub fn observe(&self, remote: u64) -> u64 {
        let mut current = self.time.load(Ordering::SeqCst);
        loop {
            let next = current.max(remote) + 1;
            match self
                .time
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    /// Writes the current value durably, keeping the table at one row.
    pub async fn persist(&self) -> PersistenceResult<()> {
        let value = self.now();
        self.worker
            .submit(move |conn| {
                conn.execute("DELETE FROM lamport_clock", [])?;
                conn.execute("INSERT INTO lamport_clock(timestamp) VALUES (?1)", [value])?;
                Ok(())
            })
            .await
    }
}
