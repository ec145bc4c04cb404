//! The three external interfaces the router consumes: an embedding
//! provider, an agent executor, and a transport for opening server bindings.
//! Concrete implementations (a real embedding API, a ReAct graph runtime, MCP
//! stdio/HTTP connectors) are out of scope for this crate — only the traits
//! are modeled here, as narrow seams that real and mock implementations can
//! both satisfy.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentExecutorError, EmbeddingProviderError, TransportOpenError};

/// A message in the conversation passed to the agent executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

/// Opaque, transport-specific connector info for a catalog entry.
/// The router never inspects this; only a `Transport` implementation does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSpec {
    Stdio { program: String, args: Vec<String> },
    Http { url: String },
}

/// A single callable tool exposed by an active binding.
///
/// A name, a JSON schema for the agent, and an async `call`.
#[async_trait]
pub trait CallableTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> Option<&str>;
    fn schema(&self) -> &Value;
    async fn call(&self, args: Value) -> Result<String, String>;
}

impl fmt::Debug for dyn CallableTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableTool").field("name", &self.name()).finish()
    }
}

/// A live connection behind an active binding. `close` releases any underlying
/// resource (socket, child process); it is called exactly once, outside any
/// router lock, per the cache's release protocol.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn close(&self);
}

/// Connection + tools for one opened server.
pub struct ActiveBinding {
    pub handle: String,
    pub connection: Arc<dyn Connection>,
    pub tools: Vec<Arc<dyn CallableTool>>,
}

impl fmt::Debug for ActiveBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveBinding")
            .field("handle", &self.handle)
            .field("tool_count", &self.tools.len())
            .finish()
    }
}

/// Embedding provider: texts in, fixed-dimension vectors out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError>;
    fn dimension(&self) -> usize;
}

/// Result of one agent executor run.
///
/// `touched_handles` are the catalog handles whose tools were actually invoked
/// during the run, per this implementation's `TouchedHandlesPolicy::InvokedOnly`
/// decision.
#[derive(Clone, Debug, Default)]
pub struct AgentRunResult {
    pub final_text: String,
    pub touched_handles: Vec<String>,
}

/// Tool bundle handed to the agent executor: the tool plus the handle that exposed it,
/// so the executor can report `touched_handles` grouped back by server.
pub struct ExecutorTool {
    pub handle: String,
    pub tool: Arc<dyn CallableTool>,
}

/// The LLM agent runtime: given messages and a toolset, run to
/// completion or raise. Out of scope to implement for real; only the
/// trait + a scriptable mock live in this crate.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(
        &self,
        messages: &[Message],
        tools: Vec<ExecutorTool>,
        max_steps: usize,
        deadline: Option<Instant>,
    ) -> Result<AgentRunResult, AgentExecutorError>;
}

/// Tool-server transport: opens a binding for a catalog entry's
/// `transport_spec`. Real stdio/HTTP/SSE connectors are out of scope;
/// only the trait + a fake live here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, handle: &str, spec: &TransportSpec) -> Result<ActiveBinding, TransportOpenError>;
}
