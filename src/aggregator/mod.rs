//! Read-only derived views over the metrics store: per-agent aggregates,
//! category and resolution breakdowns, KPIs, collaboration patterns and
//! threshold alerts.
//!
//! Everything here is computed on demand; nothing is persisted and
//! nothing mutates execution records. Store failures degrade to the
//! documented zeroed/empty defaults — the dashboard boundary never fails
//! merely because the backing store is missing or empty.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::MetricsError;
use crate::models::{CategoryRollup, ExecutionRecord, ResolutionType};
use crate::pricing::round_to;
use crate::store::{ExecutionQuery, MetricsStore, ResolutionQuery, RollupQuery, TimeRange};

mod alerts;

pub use alerts::AlertThresholds;

/// Row cap applied to raw execution reads when the caller does not supply
/// one.
pub const DEFAULT_EXECUTION_LIMIT: i64 = 100;

/// Assumed fully-loaded cost of a human-handled ticket, used for the cost
/// savings KPI. A placeholder until finance supplies a real figure.
pub const DEFAULT_HUMAN_COST_PER_TICKET: f64 = 12.50;

/// Assumed resolution rate for tickets escalated to humans. Static
/// stand-in: there is no CRM feed reporting the real figure yet.
const HUMAN_RESOLUTION_RATE_PLACEHOLDER: f64 = 88.0;

/// Per-agent execution statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AgentAggregate {
    pub agent_name: String,
    pub execution_count: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
}

/// One resolution type's share of the tickets in a window.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSlice {
    pub count: i64,
    pub percentage: f64,
    pub avg_mtr_seconds: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionBreakdown {
    pub total: i64,
    pub breakdown: BTreeMap<String, ResolutionSlice>,
}

/// Rollup rows plus the resolution breakdown for the same filters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryReport {
    pub categories: Vec<CategoryRollup>,
    pub resolution: ResolutionBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandoffSlice {
    pub count: i64,
    pub percentage: f64,
}

/// Human handoff statistics, windowed on the handoff event itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HandoffReport {
    pub total_handoffs: i64,
    pub handoff_percentage: f64,
    pub breakdown: BTreeMap<String, HandoffSlice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelVolume {
    pub channel: String,
    pub volume: i64,
    pub auto_resolved: i64,
    pub escalated: i64,
}

/// Key performance indicators for the dashboard headline row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KpiReport {
    pub self_heal_rate: f64,
    pub avg_resolution_time_seconds: f64,
    pub cost_savings_usd: f64,
    pub total_tickets: i64,
    pub auto_resolved: i64,
    pub escalated: i64,
}

/// Tickets resolved end-to-end by the agent chain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutonomousChainPattern {
    pub volume: i64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub cost_per_resolution_usd: f64,
}

/// Tickets the AI escalated to a human queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HandoffPattern {
    pub volume: i64,
    pub handoff_rate: f64,
    pub avg_handoff_time_seconds: f64,
    /// Static placeholder, not a measured statistic.
    pub human_resolution_rate: f64,
}

/// Humans delegating work to the AI mid-ticket. Not yet instrumented:
/// every figure is zero and `instrumented` stays false until a real
/// signal exists, so consumers can tell this apart from measured data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssistPattern {
    pub instrumented: bool,
    pub volume: i64,
    pub delegation_rate: f64,
    pub ai_success_rate: f64,
    pub time_saved_minutes: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollaborationReport {
    pub autonomous_agent_chain: AutonomousChainPattern,
    pub ai_to_human_handoff: HandoffPattern,
    pub human_initiated_ai_assist: AssistPattern,
}

/// Read-side companion to [`ExecutionTracker`](crate::ExecutionTracker):
/// answers dashboard queries from the store, never writes execution data.
pub struct MetricsAggregator {
    store: Arc<MetricsStore>,
    human_cost_per_ticket: f64,
    thresholds: AlertThresholds,
}

impl MetricsAggregator {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self {
            store,
            human_cost_per_ticket: DEFAULT_HUMAN_COST_PER_TICKET,
            thresholds: AlertThresholds::default(),
        }
    }

    pub fn with_human_cost_per_ticket(mut self, cost: f64) -> Self {
        self.human_cost_per_ticket = cost;
        self
    }

    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub(crate) fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub(crate) fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Raw execution records for drill-down views, capped at
    /// [`DEFAULT_EXECUTION_LIMIT`] unless the query says otherwise.
    pub async fn agent_executions(&self, mut query: ExecutionQuery) -> Vec<ExecutionRecord> {
        if query.limit.is_none() {
            query.limit = Some(DEFAULT_EXECUTION_LIMIT);
        }
        self.store
            .executions(&query)
            .await
            .unwrap_or_else(|err| degraded("agent_executions", err))
    }

    /// Per-agent aggregates over the matching executions. An agent with
    /// zero executions in the window simply has no row; success rate is
    /// never a division error.
    pub async fn agent_aggregates(
        &self,
        agent_name: Option<&str>,
        range: &TimeRange,
    ) -> Vec<AgentAggregate> {
        let rows = self
            .store
            .agent_aggregate_rows(agent_name, range)
            .await
            .unwrap_or_else(|err| degraded("agent_aggregates", err));

        rows.into_iter()
            .map(|row| AgentAggregate {
                success_rate: percentage(row.successful_executions, row.execution_count),
                avg_latency_ms: round_to(row.avg_latency_ms, 2),
                total_cost_usd: round_to(row.total_cost_usd, 4),
                agent_name: row.agent_name,
                execution_count: row.execution_count,
                successful_executions: row.successful_executions,
                failed_executions: row.failed_executions,
                total_tokens: row.total_tokens,
            })
            .collect()
    }

    /// Stored rollup rows plus the resolution breakdown for the same
    /// category/window.
    pub async fn category_metrics(
        &self,
        category_id: Option<&str>,
        range: &TimeRange,
    ) -> CategoryReport {
        let mut query = RollupQuery::new().with_range(*range);
        if let Some(category) = category_id {
            query = query.with_category(category);
        }
        let categories = self
            .store
            .rollups(&query)
            .await
            .unwrap_or_else(|err| degraded("category_metrics", err));

        CategoryReport {
            categories,
            resolution: self.resolution_breakdown(category_id, range).await,
        }
    }

    /// Ticket counts grouped by resolution type, with each type's share
    /// and mean time to resolve.
    pub async fn resolution_breakdown(
        &self,
        category_id: Option<&str>,
        range: &TimeRange,
    ) -> ResolutionBreakdown {
        let mut query = ResolutionQuery::new().with_range(*range);
        if let Some(category) = category_id {
            query = query.with_category(category);
        }
        let rows = self
            .store
            .resolutions(&query)
            .await
            .unwrap_or_else(|err| degraded("resolution_breakdown", err));

        let total = rows.len() as i64;
        let mut breakdown: BTreeMap<String, (i64, i64, i64)> = BTreeMap::new();
        for row in &rows {
            let entry = breakdown
                .entry(row.resolution_type.as_str().to_string())
                .or_insert((0, 0, 0));
            entry.0 += 1;
            if let Some(mtr) = row.mtr_seconds {
                entry.1 += mtr;
                entry.2 += 1;
            }
        }

        ResolutionBreakdown {
            total,
            breakdown: breakdown
                .into_iter()
                .map(|(ty, (count, mtr_sum, mtr_count))| {
                    let avg_mtr = if mtr_count > 0 {
                        round_to(mtr_sum as f64 / mtr_count as f64, 2)
                    } else {
                        0.0
                    };
                    (
                        ty,
                        ResolutionSlice {
                            count,
                            percentage: percentage(count, total),
                            avg_mtr_seconds: avg_mtr,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Handoff statistics: how many tickets went to a human, to which
    /// queues, and what share of the window's tickets that represents.
    /// `handoff_type = "none"` does not count as a handoff.
    pub async fn handoff_metrics(&self, range: &TimeRange) -> HandoffReport {
        let handoffs = self
            .store
            .handoff_resolutions(range)
            .await
            .unwrap_or_else(|err| degraded("handoff_metrics", err));
        let total_tickets = self
            .store
            .resolutions(&ResolutionQuery::new().with_range(*range))
            .await
            .unwrap_or_else(|err| degraded("handoff_metrics", err))
            .len() as i64;

        let total_handoffs = handoffs.len() as i64;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in &handoffs {
            if let Some(handoff_type) = &row.handoff_type {
                *counts.entry(handoff_type.clone()).or_insert(0) += 1;
            }
        }

        HandoffReport {
            total_handoffs,
            handoff_percentage: percentage(total_handoffs, total_tickets),
            breakdown: counts
                .into_iter()
                .map(|(ty, count)| {
                    (
                        ty,
                        HandoffSlice {
                            count,
                            percentage: percentage(count, total_tickets),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Ticket volume per entry channel, busiest first.
    pub async fn channel_volumes(&self, range: &TimeRange) -> Vec<ChannelVolume> {
        let rows = self
            .store
            .resolutions(&ResolutionQuery::new().with_range(*range))
            .await
            .unwrap_or_else(|err| degraded("channel_volumes", err));

        let mut by_channel: BTreeMap<String, ChannelVolume> = BTreeMap::new();
        for row in &rows {
            let channel = row.channel.clone().unwrap_or_else(|| "unknown".to_string());
            let entry = by_channel
                .entry(channel.clone())
                .or_insert_with(|| ChannelVolume {
                    channel,
                    volume: 0,
                    auto_resolved: 0,
                    escalated: 0,
                });
            entry.volume += 1;
            match row.resolution_type {
                ResolutionType::AutoResolved => entry.auto_resolved += 1,
                ResolutionType::Escalated => entry.escalated += 1,
                ResolutionType::Failed => {}
            }
        }

        let mut volumes: Vec<ChannelVolume> = by_channel.into_values().collect();
        // Stable sort: equal volumes stay in channel-name order.
        volumes.sort_by(|a, b| b.volume.cmp(&a.volume));
        volumes
    }

    /// Headline KPIs: self-heal rate, mean resolution time, and the cost
    /// savings estimate against the human-cost placeholder.
    pub async fn kpis(&self, range: &TimeRange) -> KpiReport {
        let resolutions = self
            .store
            .resolutions(&ResolutionQuery::new().with_range(*range))
            .await
            .unwrap_or_else(|err| degraded("kpis", err));

        let total_tickets = resolutions.len() as i64;
        let auto_resolved = resolutions
            .iter()
            .filter(|r| r.resolution_type == ResolutionType::AutoResolved)
            .count() as i64;

        let mtr_values: Vec<i64> = resolutions.iter().filter_map(|r| r.mtr_seconds).collect();
        let avg_resolution_time_seconds = if mtr_values.is_empty() {
            0.0
        } else {
            round_to(
                mtr_values.iter().sum::<i64>() as f64 / mtr_values.len() as f64,
                2,
            )
        };

        let total_ai_cost: f64 = self
            .store
            .agent_aggregate_rows(None, range)
            .await
            .unwrap_or_else(|err| degraded("kpis", err))
            .iter()
            .map(|row| row.total_cost_usd)
            .sum();

        let escalated = total_tickets - auto_resolved;
        let estimated_human_cost = escalated as f64 * self.human_cost_per_ticket;

        KpiReport {
            self_heal_rate: percentage(auto_resolved, total_tickets),
            avg_resolution_time_seconds,
            cost_savings_usd: round_to(estimated_human_cost - total_ai_cost, 4),
            total_tickets,
            auto_resolved,
            escalated,
        }
    }

    /// The three collaboration patterns between agents and humans.
    pub async fn collaboration_metrics(&self, range: &TimeRange) -> CollaborationReport {
        let resolutions = self
            .store
            .resolutions(&ResolutionQuery::new().with_range(*range))
            .await
            .unwrap_or_else(|err| degraded("collaboration_metrics", err));
        let agent_rows = self
            .store
            .agent_aggregate_rows(None, range)
            .await
            .unwrap_or_else(|err| degraded("collaboration_metrics", err));

        let auto_count = resolutions
            .iter()
            .filter(|r| r.resolution_type == ResolutionType::AutoResolved)
            .count() as i64;

        let executions: i64 = agent_rows.iter().map(|r| r.execution_count).sum();
        let successful: i64 = agent_rows.iter().map(|r| r.successful_executions).sum();
        // Reconstruct global successful-only averages from the per-agent
        // rows: avg * count recovers each agent's sum.
        let success_latency_sum: f64 = agent_rows
            .iter()
            .map(|r| r.avg_success_latency_ms * r.successful_executions as f64)
            .sum();
        let success_cost_sum: f64 = agent_rows
            .iter()
            .map(|r| r.avg_success_cost_usd * r.successful_executions as f64)
            .sum();
        let (avg_latency, avg_cost) = if successful > 0 {
            (
                success_latency_sum / successful as f64,
                success_cost_sum / successful as f64,
            )
        } else {
            (0.0, 0.0)
        };

        let handoffs: Vec<_> = resolutions
            .iter()
            .filter(|r| r.resolution_type == ResolutionType::Escalated && r.handoff_type.is_some())
            .collect();
        let handoff_count = handoffs.len() as i64;
        let handoff_mtrs: Vec<i64> = handoffs.iter().filter_map(|r| r.mtr_seconds).collect();
        let avg_handoff_time = if handoff_mtrs.is_empty() {
            0.0
        } else {
            handoff_mtrs.iter().sum::<i64>() as f64 / handoff_mtrs.len() as f64
        };

        CollaborationReport {
            autonomous_agent_chain: AutonomousChainPattern {
                volume: auto_count,
                success_rate: percentage(successful, executions),
                avg_latency_ms: round_to(avg_latency, 2),
                cost_per_resolution_usd: round_to(avg_cost, 4),
            },
            ai_to_human_handoff: HandoffPattern {
                volume: handoff_count,
                handoff_rate: percentage(handoff_count, auto_count + handoff_count),
                avg_handoff_time_seconds: round_to(avg_handoff_time, 2),
                human_resolution_rate: HUMAN_RESOLUTION_RATE_PLACEHOLDER,
            },
            human_initiated_ai_assist: AssistPattern::default(),
        }
    }
}

/// Share of `count` in `total` as a percentage, 2 decimal places, 0 when
/// the denominator is 0.
fn percentage(count: i64, total: i64) -> f64 {
    if total > 0 {
        round_to(count as f64 / total as f64 * 100.0, 2)
    } else {
        0.0
    }
}

/// Deliberate inspect-and-discard for store failures on the read path:
/// log, then serve the documented empty default.
fn degraded<T: Default>(op: &'static str, err: MetricsError) -> T {
    tracing::warn!(op, error = %err, "store read failed; serving empty default");
    T::default()
}
