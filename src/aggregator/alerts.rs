//! Threshold-based health alerts over sliding time windows.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use super::{degraded, MetricsAggregator};
use crate::models::{Alert, AlertSeverity, AlertType};
use crate::store::{ResolutionQuery, TimeRange};

/// Alert rule thresholds and windows.
///
/// Thresholds are strict: an agent sitting exactly on a threshold does
/// not alert.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Mean latency above which an agent is flagged, in milliseconds.
    pub high_latency_ms: f64,
    /// Success rate below which an agent is flagged, in percent.
    pub low_success_rate: f64,
    /// Ticket count above which a category is flagged.
    pub volume_spike_tickets: i64,
    pub latency_window: Duration,
    pub success_window: Duration,
    pub volume_window: Duration,
    /// Most recent alerts kept per evaluation.
    pub max_alerts: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_latency_ms: 2000.0,
            low_success_rate: 70.0,
            volume_spike_tickets: 50,
            latency_window: Duration::hours(1),
            success_window: Duration::hours(24),
            volume_window: Duration::hours(1),
            max_alerts: 10,
        }
    }
}

impl MetricsAggregator {
    /// Evaluate all alert rules against the trailing windows ending now.
    ///
    /// Alerts are ephemeral: computed fresh per call, never persisted, no
    /// deduplication against previous evaluations.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts_at(Utc::now()).await
    }

    /// Evaluate all alert rules with the windows anchored at `now`.
    pub async fn alerts_at(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let thresholds = self.thresholds().clone();
        let mut alerts = Vec::new();

        // Rule 1: mean latency per agent over the trailing window.
        let latency_rows = self
            .store()
            .agent_aggregate_rows(None, &TimeRange::trailing(now, thresholds.latency_window))
            .await
            .unwrap_or_else(|err| degraded("alerts_latency", err));
        for row in &latency_rows {
            if row.avg_latency_ms > thresholds.high_latency_ms {
                alerts.push(Alert {
                    alert_type: AlertType::Performance,
                    severity: AlertSeverity::Warning,
                    title: "High Latency Detected".to_string(),
                    description: format!(
                        "{} averaging {:.0}ms (threshold: {:.0}ms)",
                        row.agent_name, row.avg_latency_ms, thresholds.high_latency_ms
                    ),
                    timestamp: now,
                });
            }
        }

        // Rule 2: success rate per agent over the trailing window.
        let success_rows = self
            .store()
            .agent_aggregate_rows(None, &TimeRange::trailing(now, thresholds.success_window))
            .await
            .unwrap_or_else(|err| degraded("alerts_success_rate", err));
        for row in &success_rows {
            if row.execution_count == 0 {
                continue;
            }
            let rate = row.successful_executions as f64 / row.execution_count as f64 * 100.0;
            if rate < thresholds.low_success_rate {
                alerts.push(Alert {
                    alert_type: AlertType::SuccessRate,
                    severity: AlertSeverity::Error,
                    title: "Success Rate Decline".to_string(),
                    description: format!(
                        "{} success rate dropped to {rate:.1}%",
                        row.agent_name
                    ),
                    timestamp: now,
                });
            }
        }

        // Rule 3: ticket volume per category over the trailing window.
        let recent = self
            .store()
            .resolutions(
                &ResolutionQuery::new()
                    .with_range(TimeRange::trailing(now, thresholds.volume_window)),
            )
            .await
            .unwrap_or_else(|err| degraded("alerts_volume", err));
        let mut by_category: BTreeMap<String, i64> = BTreeMap::new();
        for row in &recent {
            let name = row
                .category_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *by_category.entry(name).or_insert(0) += 1;
        }
        for (category, count) in &by_category {
            if *count > thresholds.volume_spike_tickets {
                alerts.push(Alert {
                    alert_type: AlertType::VolumeSpike,
                    severity: AlertSeverity::Info,
                    title: "Volume Spike Detected".to_string(),
                    description: format!("{category} issues up - {count} tickets in last hour"),
                    timestamp: now,
                });
            }
        }

        // Most recent first; the sort is stable, so same-timestamp alerts
        // keep rule order.
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts.truncate(thresholds.max_alerts);
        alerts
    }
}
