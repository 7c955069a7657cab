use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use structeval_types::ExperimentRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

impl Store {
    /// Open a new store at the given path (e.g., "experiments.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                metadata TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS experiments (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                test_name TEXT NOT NULL,
                model_name TEXT NOT NULL,
                model_provider TEXT NOT NULL,
                prompting_method TEXT NOT NULL,
                structured_output BOOLEAN NOT NULL,
                trial TEXT,
                num_successes INTEGER NOT NULL,
                num_attempts INTEGER NOT NULL,
                total_task_performance REAL NOT NULL,
                success_rate REAL NOT NULL,
                average_task_performance REAL NOT NULL,
                total_time INTEGER NOT NULL,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS responses (
                id INTEGER PRIMARY KEY,
                experiment_id INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT NOT NULL,
                failed BOOLEAN NOT NULL,
                FOREIGN KEY(experiment_id) REFERENCES experiments(id)
            )",
            [],
        )?;

        Ok(())
    }

    /// Create a new run entry
    pub fn create_run(&self, metadata: Option<Value>) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO runs (created_at, metadata) VALUES (?1, ?2)",
            params![now.to_rfc3339(), metadata.map(|v| v.to_string())],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn runs(&self) -> Result<Vec<RunEntity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, created_at, metadata FROM runs ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(1)?;
            let metadata: Option<String> = row.get(2)?;
            Ok(RunEntity {
                id: row.get(0)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Save one experiment record and all of its responses in a single
    /// transaction.
    pub fn save_experiment(&self, run_id: i64, record: &ExperimentRecord) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO experiments (run_id, test_name, model_name, model_provider, prompting_method,
                structured_output, trial, num_successes, num_attempts, total_task_performance,
                success_rate, average_task_performance, total_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run_id,
                record.test_name,
                record.model_name,
                record.model_provider,
                record.prompting_method.as_str(),
                record.structured_output,
                record.trial,
                record.num_successes as i64,
                record.num_attempts as i64,
                record.total_task_performance,
                record.success_rate,
                record.average_task_performance,
                record.total_time as i64,
            ],
        )?;
        let experiment_id = tx.last_insert_rowid();

        // failed_responses is a subset of all_responses
        let failed: std::collections::HashSet<(&str, &str)> = record
            .failed_responses
            .iter()
            .map(|r| (r.prompt.as_str(), r.response.as_str()))
            .collect();
        for response in &record.all_responses {
            tx.execute(
                "INSERT INTO responses (experiment_id, prompt, response, failed) VALUES (?1, ?2, ?3, ?4)",
                params![
                    experiment_id,
                    response.prompt,
                    response.response,
                    failed.contains(&(response.prompt.as_str(), response.response.as_str())),
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(experiment_id, run_id, test = %record.test_name, "saved experiment");
        Ok(experiment_id)
    }

    /// Experiment rows in the persisted record shape (without responses),
    /// each tagged with a `db:experiments/<id>` source label.
    pub fn experiment_values(&self) -> Result<Vec<(String, Value)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, test_name, model_name, model_provider, prompting_method, structured_output,
                    trial, num_successes, num_attempts, total_task_performance, success_rate,
                    average_task_performance, total_time
             FROM experiments ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let trial: Option<String> = row.get(6)?;
            let mut value = json!({
                "test_name": row.get::<_, String>(1)?,
                "model_name": row.get::<_, String>(2)?,
                "model_provider": row.get::<_, String>(3)?,
                "prompting_method": row.get::<_, String>(4)?,
                "structured_output": row.get::<_, bool>(5)?,
                "num_successes": row.get::<_, i64>(7)?,
                "num_attempts": row.get::<_, i64>(8)?,
                "total_task_performance": row.get::<_, f64>(9)?,
                "success_rate": row.get::<_, f64>(10)?,
                "average_task_performance": row.get::<_, f64>(11)?,
                "total_time": row.get::<_, i64>(12)?,
            });
            if let (Some(trial), Some(obj)) = (trial, value.as_object_mut()) {
                obj.insert("trial".into(), Value::String(trial));
            }
            Ok((format!("db:experiments/{id}"), value))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn response_count(&self, experiment_id: i64) -> Result<(u64, u64)> {
        let conn = self.lock()?;
        let (total, failed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(failed), 0) FROM responses WHERE experiment_id = ?1",
            params![experiment_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as u64, failed as u64))
    }
}
