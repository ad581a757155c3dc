//! Persistent metrics schema and every operation that touches it.
//!
//! `MetricsStore` is the only component in the crate that issues SQL. The
//! schema is three tables: raw execution records, per-category daily
//! rollups, and per-ticket resolution outcomes.

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{CategoryRollup, ExecutionRecord, TicketResolution};
use crate::pricing::round_to;

mod queries;

pub use queries::{ExecutionQuery, ResolutionQuery, RollupQuery, TimeRange};

/// One `GROUP BY agent_name` aggregate row over `agent_metrics`.
///
/// Averages come back unrounded; presentation rounding belongs to the
/// aggregator. The `*_success_*` fields average over successful
/// executions only.
#[derive(Debug, Clone)]
pub struct AgentAggregateRow {
    pub agent_name: String,
    pub execution_count: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    pub avg_latency_ms: f64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub avg_success_latency_ms: f64,
    pub avg_success_cost_usd: f64,
}

const CREATE_AGENT_METRICS: &str = "\
    CREATE TABLE IF NOT EXISTS agent_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_name TEXT NOT NULL,
        agent_description TEXT,
        ticket_id TEXT,
        category_id TEXT,
        trace_id TEXT,
        span_id TEXT,
        input_text TEXT,
        output_text TEXT,
        tool_calls TEXT,
        latency_ms INTEGER,
        tokens_input INTEGER,
        tokens_output INTEGER,
        tokens_total INTEGER,
        cost_usd REAL,
        success BOOLEAN,
        error_message TEXT,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )";

const CREATE_CATEGORY_METRICS: &str = "\
    CREATE TABLE IF NOT EXISTS category_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category_id TEXT NOT NULL,
        category_name TEXT NOT NULL,
        date DATE NOT NULL,
        total_tickets INTEGER DEFAULT 0,
        successful_tickets INTEGER DEFAULT 0,
        failed_tickets INTEGER DEFAULT 0,
        success_rate REAL,
        avg_latency_ms INTEGER,
        total_tokens INTEGER DEFAULT 0,
        total_cost_usd REAL DEFAULT 0.0,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(category_id, date)
    )";

const CREATE_TICKET_RESOLUTION_METRICS: &str = "\
    CREATE TABLE IF NOT EXISTS ticket_resolution_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ticket_id TEXT NOT NULL UNIQUE,
        category_id TEXT,
        category_name TEXT,
        channel TEXT,
        resolution_type TEXT,
        mtr_seconds INTEGER,
        handoff_type TEXT,
        handoff_timestamp DATETIME,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_agent_metrics_agent_name ON agent_metrics(agent_name)",
    "CREATE INDEX IF NOT EXISTS idx_agent_metrics_timestamp ON agent_metrics(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_agent_metrics_ticket_id ON agent_metrics(ticket_id)",
    "CREATE INDEX IF NOT EXISTS idx_agent_metrics_trace_id ON agent_metrics(trace_id)",
    "CREATE INDEX IF NOT EXISTS idx_category_metrics_category_id ON category_metrics(category_id)",
    "CREATE INDEX IF NOT EXISTS idx_category_metrics_date ON category_metrics(date)",
    "CREATE INDEX IF NOT EXISTS idx_resolution_metrics_ticket_id ON ticket_resolution_metrics(ticket_id)",
    "CREATE INDEX IF NOT EXISTS idx_resolution_metrics_category_id ON ticket_resolution_metrics(category_id)",
    "CREATE INDEX IF NOT EXISTS idx_resolution_metrics_resolution_type ON ticket_resolution_metrics(resolution_type)",
];

/// Durable store for execution metrics, category rollups and ticket
/// resolutions.
pub struct MetricsStore {
    pool: SqlitePool,
    /// Serializes rollup upserts. The recompute-and-replace is a
    /// read-then-write sequence; without this, two concurrent upserts for
    /// the same key can interleave and persist a stale read.
    upsert_lock: Mutex<()>,
}

impl MetricsStore {
    /// Open (creating if missing) a file-backed store.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            upsert_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store.
    ///
    /// The pool is pinned to a single connection that never expires: an
    /// in-memory SQLite database lives and dies with its connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            upsert_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(CREATE_AGENT_METRICS).execute(&self.pool).await?;
        sqlx::query(CREATE_CATEGORY_METRICS)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_TICKET_RESOLUTION_METRICS)
            .execute(&self.pool)
            .await?;
        for statement in CREATE_INDEXES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Append one execution record. Records are insert-only; nothing in
    /// this crate updates or deletes them.
    pub async fn insert_execution(&self, record: &ExecutionRecord) -> Result<i64> {
        let tool_calls = if record.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.tool_calls)?)
        };

        let result = sqlx::query(
            "INSERT INTO agent_metrics (
                agent_name, agent_description, ticket_id, category_id,
                trace_id, span_id, input_text, output_text, tool_calls,
                latency_ms, tokens_input, tokens_output, tokens_total,
                cost_usd, success, error_message, timestamp, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.agent_name)
        .bind(&record.agent_description)
        .bind(&record.ticket_id)
        .bind(&record.category_id)
        .bind(&record.trace_id)
        .bind(&record.span_id)
        .bind(&record.input_text)
        .bind(&record.output_text)
        .bind(tool_calls)
        .bind(record.latency_ms)
        .bind(record.tokens_input)
        .bind(record.tokens_output)
        .bind(record.tokens_total)
        .bind(record.cost_usd)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.timestamp)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Append one ticket resolution. `ticket_id` is unique; a duplicate
    /// insert is a caller bug and surfaces as a store error.
    pub async fn insert_resolution(&self, resolution: &TicketResolution) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO ticket_resolution_metrics (
                ticket_id, category_id, category_name, channel,
                resolution_type, mtr_seconds, handoff_type,
                handoff_timestamp, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&resolution.ticket_id)
        .bind(&resolution.category_id)
        .bind(&resolution.category_name)
        .bind(&resolution.channel)
        .bind(resolution.resolution_type.as_str())
        .bind(resolution.mtr_seconds)
        .bind(&resolution.handoff_type)
        .bind(resolution.handoff_timestamp)
        .bind(resolution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Recompute the rollup for `(category_id, date)` from scratch and
    /// replace whatever is stored under that key.
    ///
    /// Intended to be invoked after each ticket resolution. Idempotent for
    /// the data fields; `updated_at` advances on every call.
    pub async fn upsert_category_rollup(
        &self,
        category_id: &str,
        category_name: &str,
        date: NaiveDate,
    ) -> Result<CategoryRollup> {
        let _guard = self.upsert_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let resolution_row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN resolution_type = 'auto-resolved' THEN 1 ELSE 0 END) AS successful,
                SUM(CASE WHEN resolution_type = 'failed' THEN 1 ELSE 0 END) AS failed
            FROM ticket_resolution_metrics
            WHERE category_id = ? AND DATE(created_at) = ?",
        )
        .bind(category_id)
        .bind(date)
        .fetch_one(&mut *tx)
        .await?;

        let total: i64 = resolution_row.try_get("total")?;
        let successful: i64 = resolution_row
            .try_get::<Option<i64>, _>("successful")?
            .unwrap_or(0);
        let failed: i64 = resolution_row
            .try_get::<Option<i64>, _>("failed")?
            .unwrap_or(0);

        let agent_row = sqlx::query(
            "SELECT
                COALESCE(AVG(latency_ms), 0.0) AS avg_latency,
                COALESCE(SUM(tokens_total), 0) AS total_tokens,
                COALESCE(SUM(cost_usd), 0.0) AS total_cost
            FROM agent_metrics
            WHERE category_id = ? AND DATE(timestamp) = ?",
        )
        .bind(category_id)
        .bind(date)
        .fetch_one(&mut *tx)
        .await?;

        let avg_latency: f64 = agent_row.try_get("avg_latency")?;
        let total_tokens: i64 = agent_row.try_get("total_tokens")?;
        let total_cost: f64 = agent_row.try_get("total_cost")?;

        let success_rate = if total > 0 {
            round_to(successful as f64 / total as f64 * 100.0, 2)
        } else {
            0.0
        };
        let updated_at = Utc::now();

        sqlx::query(
            "INSERT INTO category_metrics (
                category_id, category_name, date,
                total_tickets, successful_tickets, failed_tickets,
                success_rate, avg_latency_ms, total_tokens, total_cost_usd,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(category_id, date) DO UPDATE SET
                total_tickets = excluded.total_tickets,
                successful_tickets = excluded.successful_tickets,
                failed_tickets = excluded.failed_tickets,
                success_rate = excluded.success_rate,
                avg_latency_ms = excluded.avg_latency_ms,
                total_tokens = excluded.total_tokens,
                total_cost_usd = excluded.total_cost_usd,
                updated_at = excluded.updated_at",
        )
        .bind(category_id)
        .bind(category_name)
        .bind(date)
        .bind(total)
        .bind(successful)
        .bind(failed)
        .bind(success_rate)
        .bind(avg_latency as i64)
        .bind(total_tokens)
        .bind(total_cost)
        .bind(updated_at)
        .execute(&mut *tx)
        .await?;

        let stored = sqlx::query(
            "SELECT * FROM category_metrics WHERE category_id = ? AND date = ?",
        )
        .bind(category_id)
        .bind(date)
        .fetch_one(&mut *tx)
        .await?;
        let rollup = rollup_from_row(&stored)?;

        tx.commit().await?;
        Ok(rollup)
    }

    /// Raw execution records, newest first. All filters apply as a
    /// conjunction; date bounds are inclusive against `timestamp`.
    pub async fn executions(&self, query: &ExecutionQuery) -> Result<Vec<ExecutionRecord>> {
        let mut sql = String::from("SELECT * FROM agent_metrics WHERE 1=1");
        if query.agent_name.is_some() {
            sql.push_str(" AND agent_name = ?");
        }
        if query.category_id.is_some() {
            sql.push_str(" AND category_id = ?");
        }
        if query.range.from.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if query.range.to.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query(&sql);
        if let Some(agent) = &query.agent_name {
            q = q.bind(agent);
        }
        if let Some(category) = &query.category_id {
            q = q.bind(category);
        }
        if let Some(from) = query.range.from {
            q = q.bind(from);
        }
        if let Some(to) = query.range.to {
            q = q.bind(to);
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(execution_from_row).collect()
    }

    /// Stored category rollups, newest date first. Date bounds are
    /// inclusive against the rollup's own `date` column.
    pub async fn rollups(&self, query: &RollupQuery) -> Result<Vec<CategoryRollup>> {
        let mut sql = String::from("SELECT * FROM category_metrics WHERE 1=1");
        if query.category_id.is_some() {
            sql.push_str(" AND category_id = ?");
        }
        if query.range.from.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if query.range.to.is_some() {
            sql.push_str(" AND date <= ?");
        }
        sql.push_str(" ORDER BY date DESC");

        let mut q = sqlx::query(&sql);
        if let Some(category) = &query.category_id {
            q = q.bind(category);
        }
        if let Some(from) = query.range.from {
            q = q.bind(from.date_naive());
        }
        if let Some(to) = query.range.to {
            q = q.bind(to.date_naive());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(rollup_from_row).collect()
    }

    /// Ticket resolutions, newest first. Date bounds are inclusive against
    /// `created_at`.
    pub async fn resolutions(&self, query: &ResolutionQuery) -> Result<Vec<TicketResolution>> {
        let mut sql = String::from("SELECT * FROM ticket_resolution_metrics WHERE 1=1");
        if query.category_id.is_some() {
            sql.push_str(" AND category_id = ?");
        }
        if query.range.from.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if query.range.to.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query(&sql);
        if let Some(category) = &query.category_id {
            q = q.bind(category);
        }
        if let Some(from) = query.range.from {
            q = q.bind(from);
        }
        if let Some(to) = query.range.to {
            q = q.bind(to);
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(resolution_from_row).collect()
    }

    /// Resolutions that were handed to a human, windowed on the handoff
    /// timestamp (their own event time, not ticket creation).
    pub async fn handoff_resolutions(&self, range: &TimeRange) -> Result<Vec<TicketResolution>> {
        let mut sql = String::from(
            "SELECT * FROM ticket_resolution_metrics \
             WHERE handoff_type IS NOT NULL AND handoff_type != 'none'",
        );
        if range.from.is_some() {
            sql.push_str(" AND handoff_timestamp >= ?");
        }
        if range.to.is_some() {
            sql.push_str(" AND handoff_timestamp <= ?");
        }
        sql.push_str(" ORDER BY handoff_timestamp DESC");

        let mut q = sqlx::query(&sql);
        if let Some(from) = range.from {
            q = q.bind(from);
        }
        if let Some(to) = range.to {
            q = q.bind(to);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(resolution_from_row).collect()
    }

    /// Per-agent aggregate rows over the matching executions.
    pub async fn agent_aggregate_rows(
        &self,
        agent_name: Option<&str>,
        range: &TimeRange,
    ) -> Result<Vec<AgentAggregateRow>> {
        let mut sql = String::from(
            "SELECT
                agent_name,
                COUNT(*) AS execution_count,
                SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS successful_executions,
                SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) AS failed_executions,
                COALESCE(AVG(latency_ms), 0.0) AS avg_latency_ms,
                COALESCE(SUM(tokens_total), 0) AS total_tokens,
                COALESCE(SUM(cost_usd), 0.0) AS total_cost_usd,
                COALESCE(AVG(CASE WHEN success = 1 THEN latency_ms END), 0.0)
                    AS avg_success_latency_ms,
                COALESCE(AVG(CASE WHEN success = 1 THEN cost_usd END), 0.0)
                    AS avg_success_cost_usd
            FROM agent_metrics WHERE 1=1",
        );
        if agent_name.is_some() {
            sql.push_str(" AND agent_name = ?");
        }
        if range.from.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if range.to.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" GROUP BY agent_name ORDER BY agent_name");

        let mut q = sqlx::query(&sql);
        if let Some(agent) = agent_name {
            q = q.bind(agent);
        }
        if let Some(from) = range.from {
            q = q.bind(from);
        }
        if let Some(to) = range.to {
            q = q.bind(to);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(AgentAggregateRow {
                    agent_name: row.try_get("agent_name")?,
                    execution_count: row.try_get("execution_count")?,
                    successful_executions: row
                        .try_get::<Option<i64>, _>("successful_executions")?
                        .unwrap_or(0),
                    failed_executions: row
                        .try_get::<Option<i64>, _>("failed_executions")?
                        .unwrap_or(0),
                    avg_latency_ms: row.try_get("avg_latency_ms")?,
                    total_tokens: row.try_get("total_tokens")?,
                    total_cost_usd: row.try_get("total_cost_usd")?,
                    avg_success_latency_ms: row.try_get("avg_success_latency_ms")?,
                    avg_success_cost_usd: row.try_get("avg_success_cost_usd")?,
                })
            })
            .collect()
    }

    /// Close the underlying pool. Reads against a closed store fail, which
    /// the aggregator degrades to documented defaults.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn execution_from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
    let tool_calls = match row.try_get::<Option<String>, _>("tool_calls")? {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Vec::new(),
    };

    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        agent_name: row.try_get("agent_name")?,
        agent_description: row.try_get("agent_description")?,
        ticket_id: row.try_get("ticket_id")?,
        category_id: row.try_get("category_id")?,
        trace_id: row.try_get("trace_id")?,
        span_id: row.try_get("span_id")?,
        input_text: row.try_get("input_text")?,
        output_text: row.try_get("output_text")?,
        tool_calls,
        latency_ms: row.try_get("latency_ms")?,
        tokens_input: row.try_get("tokens_input")?,
        tokens_output: row.try_get("tokens_output")?,
        tokens_total: row.try_get("tokens_total")?,
        cost_usd: row.try_get("cost_usd")?,
        success: row.try_get("success")?,
        error_message: row.try_get("error_message")?,
        timestamp: row.try_get("timestamp")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rollup_from_row(row: &SqliteRow) -> Result<CategoryRollup> {
    Ok(CategoryRollup {
        id: row.try_get("id")?,
        category_id: row.try_get("category_id")?,
        category_name: row.try_get("category_name")?,
        date: row.try_get("date")?,
        total_tickets: row.try_get("total_tickets")?,
        successful_tickets: row.try_get("successful_tickets")?,
        failed_tickets: row.try_get("failed_tickets")?,
        success_rate: row.try_get("success_rate")?,
        avg_latency_ms: row.try_get("avg_latency_ms")?,
        total_tokens: row.try_get("total_tokens")?,
        total_cost_usd: row.try_get("total_cost_usd")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn resolution_from_row(row: &SqliteRow) -> Result<TicketResolution> {
    let resolution_type: String = row.try_get("resolution_type")?;

    Ok(TicketResolution {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        category_id: row.try_get("category_id")?,
        category_name: row.try_get("category_name")?,
        channel: row.try_get("channel")?,
        resolution_type: resolution_type.parse()?,
        mtr_seconds: row.try_get("mtr_seconds")?,
        handoff_type: row.try_get("handoff_type")?,
        handoff_timestamp: row.try_get("handoff_timestamp")?,
        created_at: row.try_get("created_at")?,
    })
}
