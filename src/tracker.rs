use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{ExecutionRecord, ToolCallRecord};
use crate::pricing::PricingTable;
use crate::store::MetricsStore;
use crate::trace::{SpanContext, TraceClient};

/// Tokens per word used when no authoritative count is supplied.
///
/// Placeholder for a real tokenizer or an LLM-reported count; close enough
/// for cost attribution until the provider response carries usage data.
const TOKENS_PER_WORD: f64 = 1.3;

/// Estimate a token count from whitespace-separated words.
fn estimate_tokens(text: &str) -> i64 {
    (text.split_whitespace().count() as f64 * TOKENS_PER_WORD) as i64
}

/// Model selection for cost attribution.
///
/// Agents without an explicit entry fall back to the default model.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub default_model: String,
    pub agent_models: HashMap<String, String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            agent_models: HashMap::new(),
        }
    }
}

impl TrackerConfig {
    pub fn model_for(&self, agent_name: &str) -> &str {
        self.agent_models
            .get(agent_name)
            .unwrap_or(&self.default_model)
    }
}

/// Identity of one execution, supplied when a scope is opened.
#[derive(Debug, Clone, Default)]
pub struct ExecutionParams {
    pub agent_name: String,
    pub description: Option<String>,
    pub ticket_id: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub trace_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub input_text: Option<String>,
}

impl ExecutionParams {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_ticket(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }

    pub fn with_category(
        mut self,
        category_id: impl Into<String>,
        category_name: impl Into<String>,
    ) -> Self {
        self.category_id = Some(category_id.into());
        self.category_name = Some(category_name.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_parent_span(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    pub fn with_input(mut self, input_text: impl Into<String>) -> Self {
        self.input_text = Some(input_text.into());
        self
    }
}

/// Mutable accumulator for one in-flight execution.
///
/// Fields are read exactly once, at scope close. Repeated `set_output` /
/// `set_error` calls overwrite the previous value (last write wins).
/// Mutators forward to the trace backend fire-and-forget and must run on
/// the tokio runtime.
pub struct ExecutionScope {
    params: ExecutionParams,
    span: SpanContext,
    started: Instant,
    output_text: Option<String>,
    tool_calls: Vec<ToolCallRecord>,
    error_message: Option<String>,
    token_counts: Option<(i64, i64)>,
    trace: TraceClient,
}

impl ExecutionScope {
    pub fn trace_id(&self) -> &str {
        &self.span.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span.span_id
    }

    /// Record the execution's output text.
    pub fn set_output(&mut self, output: impl Into<String>) {
        let output = output.into();
        self.output_text = Some(output.clone());

        let trace = self.trace.clone();
        let span_id = self.span.span_id.clone();
        tokio::spawn(async move {
            trace.log_output(&span_id, &json!({ "output": output })).await;
        });
    }

    /// Record a structured output, serialized as compact JSON.
    pub fn set_output_json(&mut self, output: &Value) {
        self.set_output(output.to_string());
    }

    /// Record one tool invocation, in order.
    pub fn add_tool_call(&mut self, tool_name: impl Into<String>, input: Value, output: Value) {
        let record = ToolCallRecord {
            tool_name: tool_name.into(),
            input,
            output,
        };

        let trace = self.trace.clone();
        let span_id = self.span.span_id.clone();
        let detached = record.clone();
        tokio::spawn(async move {
            trace
                .log_tool_call(&span_id, &detached.tool_name, &detached.input, &detached.output)
                .await;
        });

        self.tool_calls.push(record);
    }

    /// Mark the execution as failed. The closing record will carry
    /// `success = false` and this message.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    /// Supply authoritative token counts (e.g. from the LLM response),
    /// overriding the word-count estimate.
    pub fn set_token_counts(&mut self, tokens_input: i64, tokens_output: i64) {
        self.token_counts = Some((tokens_input.max(0), tokens_output.max(0)));
    }
}

/// Scoped tracking around one agent execution.
///
/// Opening a scope mints trace identifiers and starts the clock; closing
/// it computes latency, tokens and cost, and appends exactly one
/// `ExecutionRecord` to the store. A failed store write is logged and
/// discarded so that bookkeeping can never mask the outcome of the
/// execution itself.
pub struct ExecutionTracker {
    store: Arc<MetricsStore>,
    pricing: Arc<PricingTable>,
    trace: TraceClient,
    config: TrackerConfig,
}

impl ExecutionTracker {
    pub fn new(store: Arc<MetricsStore>, pricing: Arc<PricingTable>, trace: TraceClient) -> Self {
        Self {
            store,
            pricing,
            trace,
            config: TrackerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Open a tracking scope. The caller must later pass the scope to
    /// [`finish`](Self::finish); prefer [`track`](Self::track), which
    /// guarantees it.
    pub fn begin(&self, params: ExecutionParams) -> ExecutionScope {
        let span = self
            .trace
            .open_span(params.trace_id.clone(), params.parent_span_id.clone());

        {
            let trace = self.trace.clone();
            let span_ctx = span.clone();
            let agent_name = params.agent_name.clone();
            let input_text = params.input_text.clone();
            tokio::spawn(async move {
                trace.span_started(&span_ctx, &agent_name).await;
                if let Some(input) = input_text {
                    trace
                        .log_input(&span_ctx.span_id, &json!({ "input": input }))
                        .await;
                }
            });
        }

        ExecutionScope {
            params,
            span,
            started: Instant::now(),
            output_text: None,
            tool_calls: Vec::new(),
            error_message: None,
            token_counts: None,
            trace: self.trace.clone(),
        }
    }

    /// Close a scope: derive the metrics and append the record.
    ///
    /// Returns the record handed to the store. If the insert fails, the
    /// failure is logged and dropped — it never propagates.
    pub async fn finish(&self, scope: ExecutionScope) -> ExecutionRecord {
        let latency_ms = scope.started.elapsed().as_millis() as i64;

        let (tokens_input, tokens_output) = scope.token_counts.unwrap_or_else(|| {
            (
                scope
                    .params
                    .input_text
                    .as_deref()
                    .map_or(0, estimate_tokens),
                scope.output_text.as_deref().map_or(0, estimate_tokens),
            )
        });

        let model = self.config.model_for(&scope.params.agent_name);
        let cost_usd = self.pricing.estimate(model, tokens_input, tokens_output);
        let now = Utc::now();

        let record = ExecutionRecord {
            id: None,
            agent_name: scope.params.agent_name,
            agent_description: scope.params.description,
            ticket_id: scope.params.ticket_id,
            category_id: scope.params.category_id,
            trace_id: scope.span.trace_id.clone(),
            span_id: scope.span.span_id.clone(),
            input_text: scope.params.input_text,
            output_text: scope.output_text,
            tool_calls: scope.tool_calls,
            latency_ms,
            tokens_input,
            tokens_output,
            tokens_total: tokens_input + tokens_output,
            cost_usd,
            success: scope.error_message.is_none(),
            error_message: scope.error_message,
            timestamp: now,
            created_at: now,
        };

        scope.trace.span_finished(&scope.span).await;

        // Deliberate inspect-and-discard: a dropped metric must never fail
        // or mask the execution it describes.
        if let Err(err) = self.store.insert_execution(&record).await {
            tracing::warn!(
                agent = %record.agent_name,
                error = %err,
                "failed to persist execution record; discarding"
            );
        }

        record
    }

    /// Run `body` inside a tracking scope.
    ///
    /// Whatever happens inside the body, exactly one record is persisted:
    /// on error the record carries `success = false` and the error's
    /// message, and the original error is returned unchanged.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use watchtower::{
    ///     ExecutionParams, ExecutionTracker, MetricsError, MetricsStore, PricingTable,
    ///     TraceClient,
    /// };
    ///
    /// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = Arc::new(MetricsStore::in_memory().await?);
    /// let tracker = ExecutionTracker::new(
    ///     store,
    ///     Arc::new(PricingTable::with_defaults()),
    ///     TraceClient::noop(),
    /// );
    ///
    /// let params = ExecutionParams::new("diagnose").with_input("printer offline");
    /// let outcome: Result<String, MetricsError> = tracker
    ///     .track(params, |scope| {
    ///         Box::pin(async move {
    ///             scope.set_output("power-cycled the printer");
    ///             Ok("resolved".to_string())
    ///         })
    ///     })
    ///     .await;
    /// outcome?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn track<T, E, F>(
        &self,
        params: ExecutionParams,
        body: F,
    ) -> std::result::Result<T, E>
    where
        E: fmt::Display,
        F: for<'a> FnOnce(&'a mut ExecutionScope) -> BoxFuture<'a, std::result::Result<T, E>>,
    {
        let mut scope = self.begin(params);
        let result = body(&mut scope).await;

        if let Err(err) = &result {
            // The raised error wins over any earlier set_error.
            scope.set_error(err.to_string());
        }

        self.finish(scope).await;
        result
    }
}
