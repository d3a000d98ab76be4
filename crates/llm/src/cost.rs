//! SQLite-backed API cost store.
//!
//! Every completed model call appends one row; aggregation queries roll the
//! spend up by day, week, or month for the CLI and reflection pipeline.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use helm_domain::{Error, Result};

#[derive(Debug, Clone)]
pub struct CostRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub trace_id: String,
    pub purpose: String,
}

/// One aggregation bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct CostBucket {
    pub period: String,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub struct CostTracker {
    conn: Mutex<Connection>,
}

impl CostTracker {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Other(format!("failed to open cost store: {e}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Other(format!("failed to open cost store: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS api_costs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                trace_id TEXT,
                purpose TEXT
            )",
            [],
        )
        .map_err(|e| Error::Other(format!("failed to create api_costs table: {e}")))?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_api_costs_timestamp ON api_costs (timestamp)",
            [],
        )
        .map_err(|e| Error::Other(format!("failed to create cost index: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn record(&self, record: &CostRecord) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO api_costs
                    (timestamp, provider, model, input_tokens, output_tokens, cost_usd, trace_id, purpose)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Utc::now().to_rfc3339(),
                    record.provider,
                    record.model,
                    record.input_tokens,
                    record.output_tokens,
                    record.cost_usd,
                    record.trace_id,
                    record.purpose,
                ],
            )
            .map_err(|e| Error::Other(format!("failed to record cost: {e}")))?;
        Ok(())
    }

    /// Aggregate by `%Y-%m-%d` (day), `%Y-W%W` (week), or `%Y-%m` (month).
    pub fn aggregate(&self, strftime_format: &str, last_n: usize) -> Result<Vec<CostBucket>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT strftime(?1, timestamp) AS period,
                        SUM(cost_usd), SUM(input_tokens), SUM(output_tokens)
                 FROM api_costs
                 GROUP BY period
                 ORDER BY period DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Other(format!("cost aggregation failed: {e}")))?;

        let rows = stmt
            .query_map(params![strftime_format, last_n as i64], |row| {
                Ok(CostBucket {
                    period: row.get(0)?,
                    cost_usd: row.get(1)?,
                    input_tokens: row.get::<_, i64>(2)? as u64,
                    output_tokens: row.get::<_, i64>(3)? as u64,
                })
            })
            .map_err(|e| Error::Other(format!("cost aggregation failed: {e}")))?;

        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row.map_err(|e| Error::Other(format!("cost row failed: {e}")))?);
        }
        Ok(buckets)
    }

    pub fn by_day(&self, days: usize) -> Result<Vec<CostBucket>> {
        self.aggregate("%Y-%m-%d", days)
    }

    pub fn by_week(&self, weeks: usize) -> Result<Vec<CostBucket>> {
        self.aggregate("%Y-W%W", weeks)
    }

    pub fn by_month(&self, months: usize) -> Result<Vec<CostBucket>> {
        self.aggregate("%Y-%m", months)
    }
}
