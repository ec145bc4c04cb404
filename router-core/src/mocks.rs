//! Deterministic fakes for the three external ports, used in this crate's
//! tests and by `router-cli` for local runs without a real embedding API,
//! LLM, or tool server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentExecutorError, EmbeddingProviderError, TransportOpenError};
use crate::ports::{
    ActiveBinding, AgentExecutor, AgentRunResult, CallableTool, Connection, EmbeddingProvider,
    ExecutorTool, Message, Transport, TransportSpec,
};

/// Hash-based embedder: deterministic, dependency-free, and sensitive enough
/// to word overlap that cosine similarity produces meaningful orderings in
/// tests without calling a real embedding API.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603; // FNV offset basis
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let slot = (hash as usize) % self.dimension;
            vector[slot] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scriptable agent executor: returns a fixed response and a fixed set of
/// touched handles, or an injected error, so tests can drive every branch of
/// the router's turn handling without a real LLM loop.
pub struct MockAgentExecutor {
    response: Mutex<Option<Result<AgentRunResult, AgentExecutorError>>>,
    /// Default used once the scripted response has been consumed.
    default_text: String,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockAgentExecutor {
    pub fn new(default_text: impl Into<String>) -> Self {
        Self {
            response: Mutex::new(None),
            default_text: default_text.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues the exact result the next `run` call should return.
    pub fn script(&self, result: Result<AgentRunResult, AgentExecutorError>) {
        *self.response.lock().unwrap() = Some(result);
    }

    /// Handles available to the executor on each `run` call, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for MockAgentExecutor {
    async fn run(
        &self,
        _messages: &[Message],
        tools: Vec<ExecutorTool>,
        _max_steps: usize,
        _deadline: Option<Instant>,
    ) -> Result<AgentRunResult, AgentExecutorError> {
        self.calls.lock().unwrap().push(tools.iter().map(|t| t.handle.clone()).collect());
        if let Some(scripted) = self.response.lock().unwrap().take() {
            return scripted;
        }
        Ok(AgentRunResult { final_text: self.default_text.clone(), touched_handles: Vec::new() })
    }
}

/// No-op connection used by [`FakeTransport`] and other fixtures that only
/// need a `Connection` to satisfy the trait bound.
pub struct NullConnection;

#[async_trait]
impl Connection for NullConnection {
    async fn close(&self) {}
}

/// An in-memory tool with a fixed reply, for assembling fake bindings in tests.
pub struct EchoTool {
    name: String,
    description: Option<String>,
    schema: Value,
    reply: String,
}

impl EchoTool {
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema: serde_json::json!({"type": "object", "properties": {}}),
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl CallableTool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    async fn call(&self, _args: Value) -> Result<String, String> {
        Ok(self.reply.clone())
    }
}

/// Transport that opens a binding from a pre-registered table, or fails with
/// `TransportOpenError` for unregistered handles. Lets tests control exactly
/// which handles open successfully and which a cache-fill must treat as a
/// failure.
pub struct FakeTransport {
    bindings: Mutex<HashMap<String, Vec<Arc<dyn CallableTool>>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self { bindings: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, handle: impl Into<String>, tools: Vec<Arc<dyn CallableTool>>) {
        self.bindings.lock().unwrap().insert(handle.into(), tools);
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, handle: &str, _spec: &TransportSpec) -> Result<ActiveBinding, TransportOpenError> {
        let tools = self.bindings.lock().unwrap().get(handle).cloned();
        match tools {
            Some(tools) => Ok(ActiveBinding {
                handle: handle.to_string(),
                connection: Arc::new(NullConnection),
                tools,
            }),
            None => Err(TransportOpenError {
                handle: handle.to_string(),
                message: "no binding registered for handle".to_string(),
            }),
        }
    }
}
