use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::{MetricsError, Result};

/// Generate a globally-unique trace identifier.
pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a globally-unique span identifier.
pub fn new_span_id() -> String {
    Uuid::new_v4().to_string()
}

/// Identifiers correlating one execution into a causal chain.
///
/// Ids are always minted locally; the backend only receives them. A dead
/// or slow backend can therefore never affect identifier generation.
#[derive(Debug, Clone, Serialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

/// Capability interface for an external tracing backend.
///
/// Implementations may block on I/O; `TraceClient` bounds every call and
/// discards failures, so implementors can simply propagate errors.
#[async_trait]
pub trait TraceBackend: Send + Sync {
    async fn span_started(&self, span: &SpanContext, agent_name: &str) -> Result<()>;
    async fn log_input(&self, span_id: &str, payload: &Value) -> Result<()>;
    async fn log_output(&self, span_id: &str, payload: &Value) -> Result<()>;
    async fn log_tool_call(
        &self,
        span_id: &str,
        tool_name: &str,
        input: &Value,
        output: &Value,
    ) -> Result<()>;
    async fn span_finished(&self, span: &SpanContext) -> Result<()>;
}

/// Backend used when no tracing endpoint is configured.
pub struct NoopTraceBackend;

#[async_trait]
impl TraceBackend for NoopTraceBackend {
    async fn span_started(&self, _span: &SpanContext, _agent_name: &str) -> Result<()> {
        Ok(())
    }

    async fn log_input(&self, _span_id: &str, _payload: &Value) -> Result<()> {
        Ok(())
    }

    async fn log_output(&self, _span_id: &str, _payload: &Value) -> Result<()> {
        Ok(())
    }

    async fn log_tool_call(
        &self,
        _span_id: &str,
        _tool_name: &str,
        _input: &Value,
        _output: &Value,
    ) -> Result<()> {
        Ok(())
    }

    async fn span_finished(&self, _span: &SpanContext) -> Result<()> {
        Ok(())
    }
}

/// Backend that posts one JSON event per lifecycle call to an HTTP
/// collector endpoint.
pub struct HttpTraceBackend {
    endpoint: Url,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpTraceBackend {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| MetricsError::Configuration {
            field: "trace_endpoint".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            endpoint,
            headers: HashMap::new(),
            client: reqwest::Client::new(),
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    async fn post_event(&self, event: Value) -> Result<()> {
        let mut request = self.client.post(self.endpoint.clone());
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.json(&event).send().await?;
        if !response.status().is_success() {
            return Err(MetricsError::Trace {
                message: format!("collector returned status {}", response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TraceBackend for HttpTraceBackend {
    async fn span_started(&self, span: &SpanContext, agent_name: &str) -> Result<()> {
        self.post_event(json!({
            "event": "span_start",
            "agent": agent_name,
            "trace_id": span.trace_id,
            "span_id": span.span_id,
            "parent_span_id": span.parent_span_id,
        }))
        .await
    }

    async fn log_input(&self, span_id: &str, payload: &Value) -> Result<()> {
        self.post_event(json!({
            "event": "input",
            "span_id": span_id,
            "data": payload,
        }))
        .await
    }

    async fn log_output(&self, span_id: &str, payload: &Value) -> Result<()> {
        self.post_event(json!({
            "event": "output",
            "span_id": span_id,
            "data": payload,
        }))
        .await
    }

    async fn log_tool_call(
        &self,
        span_id: &str,
        tool_name: &str,
        input: &Value,
        output: &Value,
    ) -> Result<()> {
        self.post_event(json!({
            "event": "tool_call",
            "span_id": span_id,
            "tool_name": tool_name,
            "input": input,
            "output": output,
        }))
        .await
    }

    async fn span_finished(&self, span: &SpanContext) -> Result<()> {
        self.post_event(json!({
            "event": "span_end",
            "trace_id": span.trace_id,
            "span_id": span.span_id,
        }))
        .await
    }
}

const DEFAULT_DELEGATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Best-effort delegation wrapper around a `TraceBackend`.
///
/// Tracing is observability, not a correctness dependency: every delegate
/// call here is bounded by a timeout, and any failure is logged and
/// discarded instead of reaching the wrapped execution.
#[derive(Clone)]
pub struct TraceClient {
    backend: Arc<dyn TraceBackend>,
    timeout: Duration,
}

impl TraceClient {
    pub fn new(backend: Arc<dyn TraceBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_DELEGATE_TIMEOUT,
        }
    }

    /// Client that only mints identifiers.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopTraceBackend))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a span for one agent execution, minting a fresh trace id when
    /// the caller does not supply one.
    pub fn open_span(
        &self,
        trace_id: Option<String>,
        parent_span_id: Option<String>,
    ) -> SpanContext {
        SpanContext {
            trace_id: trace_id.unwrap_or_else(new_trace_id),
            span_id: new_span_id(),
            parent_span_id,
        }
    }

    pub async fn span_started(&self, span: &SpanContext, agent_name: &str) {
        self.dispatch("span_started", self.backend.span_started(span, agent_name))
            .await;
    }

    pub async fn log_input(&self, span_id: &str, payload: &Value) {
        self.dispatch("log_input", self.backend.log_input(span_id, payload))
            .await;
    }

    pub async fn log_output(&self, span_id: &str, payload: &Value) {
        self.dispatch("log_output", self.backend.log_output(span_id, payload))
            .await;
    }

    pub async fn log_tool_call(
        &self,
        span_id: &str,
        tool_name: &str,
        input: &Value,
        output: &Value,
    ) {
        self.dispatch(
            "log_tool_call",
            self.backend.log_tool_call(span_id, tool_name, input, output),
        )
        .await;
    }

    pub async fn span_finished(&self, span: &SpanContext) {
        self.dispatch("span_finished", self.backend.span_finished(span))
            .await;
    }

    async fn dispatch<F>(&self, op: &'static str, call: F)
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(op, error = %err, "trace delegate failed; discarding");
            }
            Err(_) => {
                tracing::warn!(
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "trace delegate timed out; discarding"
                );
            }
        }
    }
}
