use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use crate::aggregator::DEFAULT_HUMAN_COST_PER_TICKET;
use crate::error::{MetricsError, Result};
use crate::trace::{HttpTraceBackend, NoopTraceBackend, TraceClient};
use crate::tracker::TrackerConfig;

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct WatchtowerConfig {
    /// Path to the SQLite database file.
    pub database_path: String,
    /// Model charged for agents without an explicit mapping.
    pub default_model: String,
    /// Per-agent model overrides.
    pub agent_models: HashMap<String, String>,
    /// Assumed cost of a human-handled ticket, for the savings KPI.
    pub human_cost_per_ticket: f64,
    /// Tracing collector endpoint; tracing is a no-op when unset.
    pub trace_endpoint: Option<String>,
    pub trace_api_key: Option<String>,
}

impl Default for WatchtowerConfig {
    fn default() -> Self {
        Self {
            database_path: "metrics.db".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            agent_models: HashMap::new(),
            human_cost_per_ticket: DEFAULT_HUMAN_COST_PER_TICKET,
            trace_endpoint: None,
            trace_api_key: None,
        }
    }
}

impl WatchtowerConfig {
    /// Load configuration from the environment (a `.env` file is honored
    /// when present).
    ///
    /// `WATCHTOWER_AGENT_MODELS` maps agents to models as
    /// `agent=model,agent=model`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let human_cost_per_ticket = match env::var("WATCHTOWER_HUMAN_COST_PER_TICKET") {
            Ok(raw) => raw.parse::<f64>().map_err(|e| MetricsError::Configuration {
                field: "WATCHTOWER_HUMAN_COST_PER_TICKET".to_string(),
                message: format!("{raw:?}: {e}"),
            })?,
            Err(_) => defaults.human_cost_per_ticket,
        };

        Ok(Self {
            database_path: env::var("WATCHTOWER_DB").unwrap_or(defaults.database_path),
            default_model: env::var("WATCHTOWER_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            agent_models: env::var("WATCHTOWER_AGENT_MODELS")
                .map(|raw| parse_agent_models(&raw))
                .unwrap_or_default(),
            human_cost_per_ticket,
            trace_endpoint: env::var("WATCHTOWER_TRACE_ENDPOINT").ok(),
            trace_api_key: env::var("WATCHTOWER_TRACE_API_KEY").ok(),
        })
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            default_model: self.default_model.clone(),
            agent_models: self.agent_models.clone(),
        }
    }
}

/// Select the tracing backend once at startup: a delegating HTTP backend
/// when an endpoint is configured, otherwise the no-op variant.
pub fn trace_client(config: &WatchtowerConfig) -> Result<TraceClient> {
    match &config.trace_endpoint {
        Some(endpoint) => {
            let mut backend = HttpTraceBackend::new(endpoint)?;
            if let Some(key) = &config.trace_api_key {
                backend = backend.with_header("x-api-key", key);
            }
            Ok(TraceClient::new(Arc::new(backend)))
        }
        None => Ok(TraceClient::new(Arc::new(NoopTraceBackend))),
    }
}

fn parse_agent_models(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (agent, model) = pair.split_once('=')?;
            let agent = agent.trim();
            let model = model.trim();
            if agent.is_empty() || model.is_empty() {
                None
            } else {
                Some((agent.to_string(), model.to_string()))
            }
        })
        .collect()
}
