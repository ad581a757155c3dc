use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::MetricsError;

/// One tool invocation observed during an agent execution. Owned by its
/// `ExecutionRecord` and persisted as part of that record's JSON blob,
/// never queried independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: Value,
    pub output: Value,
}

/// One row per agent execution attempt. Insert-only: written exactly once
/// when the tracking scope closes, never updated or deleted.
///
/// Invariants (enforced at construction time by the tracker):
/// `tokens_total == tokens_input + tokens_output`, and `success` is false
/// iff `error_message` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Rowid; `None` until inserted.
    pub id: Option<i64>,
    pub agent_name: String,
    pub agent_description: Option<String>,
    pub ticket_id: Option<String>,
    pub category_id: Option<String>,
    pub trace_id: String,
    pub span_id: String,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub latency_ms: i64,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub tokens_total: i64,
    pub cost_usd: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-category, per-day precomputed aggregate. Unique on
/// `(category_id, date)`; replaced wholesale by the rollup upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRollup {
    pub id: Option<i64>,
    pub category_id: String,
    pub category_name: String,
    pub date: NaiveDate,
    pub total_tickets: i64,
    pub successful_tickets: i64,
    pub failed_tickets: i64,
    pub success_rate: f64,
    pub avg_latency_ms: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub updated_at: DateTime<Utc>,
}

/// How a ticket left the automated workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionType {
    AutoResolved,
    Escalated,
    Failed,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionType::AutoResolved => "auto-resolved",
            ResolutionType::Escalated => "escalated",
            ResolutionType::Failed => "failed",
        }
    }
}

impl FromStr for ResolutionType {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto-resolved" => Ok(ResolutionType::AutoResolved),
            "escalated" => Ok(ResolutionType::Escalated),
            "failed" => Ok(ResolutionType::Failed),
            other => Err(MetricsError::InvalidFilter {
                field: "resolution_type",
                message: format!("unknown resolution type: {other}"),
            }),
        }
    }
}

impl std::fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per resolved ticket, unique on `ticket_id`. Produced by the
/// workflow engine at resolution time; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketResolution {
    pub id: Option<i64>,
    pub ticket_id: String,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    /// Entry channel: voice, chat, email, sms, ...
    pub channel: Option<String>,
    pub resolution_type: ResolutionType,
    /// Mean time to resolve, in seconds.
    pub mtr_seconds: Option<i64>,
    /// Handoff queue when escalated to a human: technical, billing,
    /// general. `"none"` counts as no handoff.
    pub handoff_type: Option<String>,
    pub handoff_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Performance,
    SuccessRate,
    VolumeSpike,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Performance => "performance",
            AlertType::SuccessRate => "success_rate",
            AlertType::VolumeSpike => "volume_spike",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
        }
    }
}

/// A health alert computed on demand from the store. Ephemeral: generated
/// per query call, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}
