#![allow(dead_code)]

use chrono::{DateTime, Utc};
use watchtower::{new_span_id, new_trace_id, ExecutionRecord, ResolutionType, TicketResolution};

/// Execution record with sensible defaults for tests: tokens (50, 20) and
/// a cost matching the default gpt-4o-mini pricing.
pub fn execution_at(
    agent: &str,
    success: bool,
    latency_ms: i64,
    timestamp: DateTime<Utc>,
) -> ExecutionRecord {
    ExecutionRecord {
        id: None,
        agent_name: agent.to_string(),
        agent_description: None,
        ticket_id: None,
        category_id: None,
        trace_id: new_trace_id(),
        span_id: new_span_id(),
        input_text: None,
        output_text: None,
        tool_calls: Vec::new(),
        latency_ms,
        tokens_input: 50,
        tokens_output: 20,
        tokens_total: 70,
        cost_usd: 0.00002,
        success,
        error_message: if success {
            None
        } else {
            Some("agent step failed".to_string())
        },
        timestamp,
        created_at: timestamp,
    }
}

pub fn resolution_at(
    ticket_id: &str,
    resolution_type: ResolutionType,
    mtr_seconds: Option<i64>,
    created_at: DateTime<Utc>,
) -> TicketResolution {
    TicketResolution {
        id: None,
        ticket_id: ticket_id.to_string(),
        category_id: Some("cat-printing".to_string()),
        category_name: Some("Printing".to_string()),
        channel: Some("chat".to_string()),
        resolution_type,
        mtr_seconds,
        handoff_type: None,
        handoff_timestamp: None,
        created_at,
    }
}
