use chrono::{DateTime, Duration, Utc};

use crate::error::{MetricsError, Result};

/// Inclusive time window for read queries. Absent bounds impose no
/// constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    /// Unbounded window.
    pub fn all() -> Self {
        Self::default()
    }

    /// Trailing window ending now: `[now - window, ..)`.
    pub fn trailing(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            from: Some(now - window),
            to: None,
        }
    }

    /// Parse string-encoded RFC 3339 bounds as received at the query
    /// boundary. Malformed input is rejected here, before any query runs:
    /// silently acting on a misparsed window would produce a misleading
    /// aggregate.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self> {
        Ok(Self {
            from: from.map(|s| parse_timestamp("from_date", s)).transpose()?,
            to: to.map(|s| parse_timestamp("to_date", s)).transpose()?,
        })
    }
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MetricsError::InvalidFilter {
            field,
            message: format!("{value:?}: {e}"),
        })
}

/// Filters for raw execution reads.
#[derive(Debug, Clone, Default)]
pub struct ExecutionQuery {
    pub agent_name: Option<String>,
    pub category_id: Option<String>,
    pub range: TimeRange,
    /// Row cap; readers at the dashboard boundary default this to 100.
    pub limit: Option<i64>,
}

impl ExecutionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Filters for category rollup reads.
#[derive(Debug, Clone, Default)]
pub struct RollupQuery {
    pub category_id: Option<String>,
    pub range: TimeRange,
}

impl RollupQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }
}

/// Filters for ticket resolution reads.
#[derive(Debug, Clone, Default)]
pub struct ResolutionQuery {
    pub category_id: Option<String>,
    pub range: TimeRange,
    pub limit: Option<i64>,
}

impl ResolutionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}
