use rusqlite::{params, Row};

use crate::oplog::types::{Operation, OperationKind};
use crate::persistence::{PersistenceResult, PersistenceWorker};

const OPERATION_COLUMNS: &str =
    "op_id, note_id, operation_type, timestamp, payload, lamport_clock, origin_device";

/// Append-only record of every create/update/delete, keyed by the globally
/// unique operation id. Remote operations are appended verbatim (original
/// op id, Lamport stamp and origin), which is what deduplicates replays.
#[derive(Clone)]
pub struct ChangeLog {
    worker: PersistenceWorker,
    device_id: String,
}

impl ChangeLog {
    pub fn new(worker: PersistenceWorker, device_id: impl Into<String>) -> Self {
        Self {
            worker,
            device_id: device_id.into(),
        }
    }

    pub async fn initialize(&self) -> PersistenceResult<()> {
        self.worker
            .submit(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS change_log (
                        op_id TEXT PRIMARY KEY,
                        note_id TEXT,
                        operation_type TEXT,
                        timestamp DATETIME,
                        device_id TEXT,
                        payload TEXT,
                        lamport_clock INTEGER,
                        origin_device TEXT)",
                    [],
                )?;
                Ok(())
            })
            .await
    }

    /// Appends one operation. Embeddings are derived state and recomputed on
    /// apply, so any `embeddings` field still present in the payload is
    /// dropped before the row is written.
    pub async fn append(&self, op: &Operation) -> PersistenceResult<()> {
        let device_id = self.device_id.clone();
        let mut op = op.clone();
        op.payload = strip_embeddings(&op.payload);

        self.worker
            .submit(move |conn| {
                conn.execute(
                    "INSERT INTO change_log
                        (op_id, note_id, operation_type, timestamp, device_id, payload, lamport_clock, origin_device)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        op.op_id,
                        op.note_id,
                        op.operation_type.as_str(),
                        op.timestamp,
                        device_id,
                        op.payload,
                        op.lamport_clock,
                        op.origin_device
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn exists(&self, op_id: &str) -> PersistenceResult<bool> {
        let op_id = op_id.to_string();
        self.worker
            .submit(move |conn| {
                let found: i64 = conn.query_row(
                    "SELECT EXISTS (SELECT 1 FROM change_log WHERE op_id = ?1)",
                    [&op_id],
                    |row| row.get(0),
                )?;
                Ok(found == 1)
            })
            .await
    }

    /// Operations with a Lamport stamp strictly greater than `lamport`,
    /// ascending.
    pub async fn since_lamport(&self, lamport: u64) -> PersistenceResult<Vec<Operation>> {
        self.worker
            .submit(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM change_log
                     WHERE lamport_clock > ?1 ORDER BY lamport_clock ASC"
                ))?;
                let ops = stmt
                    .query_map([lamport], operation_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ops)
            })
            .await
    }

    /// Operations recorded after the given wall-clock timestamp, ascending.
    pub async fn since_timestamp(&self, timestamp: &str) -> PersistenceResult<Vec<Operation>> {
        let timestamp = timestamp.to_string();
        self.worker
            .submit(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM change_log
                     WHERE timestamp > ?1 ORDER BY timestamp ASC"
                ))?;
                let ops = stmt
                    .query_map([&timestamp], operation_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ops)
            })
            .await
    }
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let kind: String = row.get(2)?;
    let operation_type = OperationKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown operation type '{}'", kind).into(),
        )
    })?;
    Ok(Operation {
        op_id: row.get(0)?,
        note_id: row.get(1)?,
        operation_type,
        timestamp: row.get(3)?,
        payload: row.get(4)?,
        lamport_clock: row.get(5)?,
        origin_device: row.get(6)?,
    })
}

fn strip_embeddings(payload: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(mut value) => {
            if let Some(map) = value.as_object_mut() {
                map.remove("embeddings");
            }
            value.to_string()
        }
        Err(err) => {
            log::warn!("change-log payload is not valid JSON, keeping as-is: {}", err);
            payload.to_string()
        }
    }
}
