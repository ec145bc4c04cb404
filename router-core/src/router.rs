//! The orchestrator tying together the registry, cache, health tracker,
//! metrics, and history into a single `handle_turn` entry point.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use router_config::{NudgeTiming, RouterConfig};
use serde_json::Value;

use crate::cache::ToolCache;
use crate::catalog::CatalogRegistry;
use crate::error::RouterError;
use crate::health::HealthTracker;
use crate::history::ConversationHistory;
use crate::metrics::{Outcome, UsageMetrics};
use crate::ports::{AgentExecutor, CallableTool, ExecutorTool, Message, Transport};

const DISCOVER_TOOLS_NAME: &str = "discover_tools";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// The meta-tool injected into every turn's toolset: `discover_tools(queries)`.
/// Closes over the router's registry/cache/health so the agent can pull a new
/// server into scope mid-turn.
struct DiscoverTools {
    registry: Arc<CatalogRegistry>,
    cache: Arc<ToolCache>,
    health: Arc<HealthTracker>,
    transport: Arc<dyn Transport>,
    search_top_k: Option<usize>,
    discover_binding_k: usize,
}

#[async_trait]
impl CallableTool for DiscoverTools {
    fn name(&self) -> &str {
        DISCOVER_TOOLS_NAME
    }

    fn description(&self) -> Option<&str> {
        Some("Searches the server catalog for tools matching the given queries and opens the best matches.")
    }

    fn schema(&self) -> &Value {
        use std::sync::OnceLock;
        static SCHEMA: OnceLock<Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "queries": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["queries"]
            })
        })
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let queries: Vec<String> = args
            .get("queries")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let query_refs: Vec<&str> = queries.iter().map(String::as_str).collect();

        let excluded: HashSet<String> = self.cache.contents().into_iter().collect();
        let results = match self
            .registry
            .search(&query_refs, &excluded, |h| self.health.is_healthy(h))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "discover_tools: embedding provider failed, returning empty list");
                return Ok(serde_json::json!([]).to_string());
            }
        };

        let truncated: Vec<_> = match self.search_top_k {
            Some(k) => results.into_iter().take(k).collect(),
            None => results,
        };

        let mut returned = Vec::new();
        for result in truncated.into_iter() {
            if returned.len() >= self.discover_binding_k {
                returned.push(result);
                continue;
            }
            let Some(entry) = self.registry.entry(&result.handle) else { continue };
            match self.transport.open(&result.handle, &entry.transport_spec).await {
                Ok(binding) => {
                    if let Some(stale) = self.cache.insert(result.handle.clone(), binding) {
                        stale.connection.close().await;
                    }
                    returned.push(result);
                }
                Err(e) => {
                    tracing::warn!(handle = %result.handle, error = %e, "discover_tools: failed to open binding");
                    self.health.mark_fail(&result.handle);
                }
            }
        }

        serde_json::to_string(
            &returned
                .iter()
                .map(|r| serde_json::json!({"handle": r.handle, "description": r.description, "score": r.score}))
                .collect::<Vec<_>>(),
        )
        .map_err(|e| e.to_string())
    }
}

/// End-to-end single-turn orchestrator: registry, cache, health, metrics, and
/// a per-call history all live behind this one type.
pub struct SmartRouter {
    config: RouterConfig,
    registry: Arc<CatalogRegistry>,
    cache: Arc<ToolCache>,
    health: Arc<HealthTracker>,
    metrics: Arc<UsageMetrics>,
    executor: Arc<dyn AgentExecutor>,
    transport: Arc<dyn Transport>,
    session_counter: AtomicU64,
}

impl SmartRouter {
    /// Assembles a router from its already-constructed collaborators.
    /// `registry` must not yet be initialized; call [`SmartRouter::initialize`]
    /// exactly once before the first `handle_turn`.
    pub fn new(
        config: RouterConfig,
        registry: CatalogRegistry,
        executor: Arc<dyn AgentExecutor>,
        transport: Arc<dyn Transport>,
    ) -> std::io::Result<Self> {
        let metrics = UsageMetrics::open(&config.data_dir)?;
        let cache = ToolCache::new(config.max_cache_size);
        let health = HealthTracker::new(config.health_cooldown_seconds);
        Ok(Self {
            registry: Arc::new(registry),
            cache: Arc::new(cache),
            health: Arc::new(health),
            metrics: Arc::new(metrics),
            executor,
            transport,
            session_counter: AtomicU64::new(0),
            config,
        })
    }

    /// Preloads the top-ranked handles from usage history into the cache.
    /// `registry` passed to [`SmartRouter::new`] must already be initialized
    /// (its embeddings computed) before calling this. Safe to call once; a
    /// second call simply re-attempts preload with whatever usage data has
    /// accumulated since, which is harmless but redundant.
    pub async fn initialize(&self) -> Result<(), RouterError> {
        if self.config.preload_count == 0 {
            return Ok(());
        }
        let catalog_order = self.registry.handles();
        let top = self.metrics.rank_top(self.config.preload_count, &catalog_order);
        for handle in top {
            let Some(entry) = self.registry.entry(&handle) else { continue };
            match self.transport.open(&handle, &entry.transport_spec).await {
                Ok(binding) => {
                    if let Some(stale) = self.cache.insert(handle.clone(), binding) {
                        stale.connection.close().await;
                    }
                    tracing::info!(handle = %handle, "preloaded binding from usage history");
                }
                Err(e) => {
                    // Preload failures never mark Health: the handle never had
                    // a chance to serve this process.
                    tracing::warn!(handle = %handle, error = %e, "preload: failed to open binding");
                }
            }
        }
        Ok(())
    }

    /// Executes one turn against `history`, mutating it in place.
    pub async fn handle_turn(
        &self,
        history: &ConversationHistory,
        user_text: &str,
        deadline: Option<Instant>,
    ) -> Result<String, RouterError> {
        let session_id = self.session_counter.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("turn", session_id);
        let _enter = span.enter();
        tracing::debug!(user_text, "handle_turn: start");

        let pre = history.checkpoint();
        history.append(Message::user(user_text));
        let pre_handles: HashSet<String> = self.cache.contents().into_iter().collect();

        if matches!(self.config.nudge_timing, NudgeTiming::Eager) {
            self.run_pre_discovery_nudge(user_text, &pre_handles).await;
        }

        let tools = self.assemble_tools();
        let result = self
            .executor
            .run(&history.messages(), tools, self.config.max_steps, deadline)
            .await;

        match result {
            Ok(run_result) => {
                history.append(Message::assistant(run_result.final_text.clone()));
                history.trim(self.config.max_history_turns);
                for handle in &run_result.touched_handles {
                    self.cache.touch(handle);
                    self.health.mark_ok(handle);
                    if let Err(e) = self.metrics.log(handle, Outcome::Success, now_ms()) {
                        tracing::warn!(handle, error = %e, "metrics: failed to log success");
                    }
                }
                tracing::debug!("handle_turn: success");
                Ok(run_result.final_text)
            }
            Err(source) => {
                history.rollback(pre);
                let post_handles: HashSet<String> = self.cache.contents().into_iter().collect();
                let new_handles: Vec<String> =
                    post_handles.difference(&pre_handles).cloned().collect();
                for handle in &new_handles {
                    if let Some(binding) = self.cache.evict(handle) {
                        binding.connection.close().await;
                    }
                    self.health.mark_fail(handle);
                    if let Err(e) = self.metrics.log(handle, Outcome::Failure, now_ms()) {
                        tracing::warn!(handle, error = %e, "metrics: failed to log failure");
                    }
                }
                let error = RouterError::from_agent_error(source);
                tracing::warn!(recoverable = error.is_recoverable(), "handle_turn: failed");
                Err(error)
            }
        }
    }

    async fn run_pre_discovery_nudge(&self, user_text: &str, pre_handles: &HashSet<String>) {
        let Some(nudge) = self.config.match_nudge(user_text) else { return };
        let category_already_cached = pre_handles.iter().any(|h| {
            self.registry.entry(h).map(|e| e.category == nudge.category).unwrap_or(false)
        });
        if category_already_cached {
            return;
        }
        tracing::debug!(category = %nudge.category, "pre-discovery nudge firing");
        let queries: Vec<&str> = nudge.discovery_queries.iter().map(String::as_str).collect();
        let excluded: HashSet<String> = self.cache.contents().into_iter().collect();
        let results = match self.registry.search(&queries, &excluded, |h| self.health.is_healthy(h)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "pre-discovery nudge: embedding provider failed");
                return;
            }
        };
        for result in results.into_iter().take(self.config.discover_binding_k) {
            let Some(entry) = self.registry.entry(&result.handle) else { continue };
            match self.transport.open(&result.handle, &entry.transport_spec).await {
                Ok(binding) => {
                    if let Some(stale) = self.cache.insert(result.handle.clone(), binding) {
                        stale.connection.close().await;
                    }
                }
                Err(e) => {
                    tracing::warn!(handle = %result.handle, error = %e, "pre-discovery nudge: failed to open binding");
                    self.health.mark_fail(&result.handle);
                }
            }
        }
    }

    fn assemble_tools(&self) -> Vec<ExecutorTool> {
        let mut tools = Vec::new();
        for handle in self.cache.contents() {
            self.cache.with_tools(&handle, |binding| {
                for tool in &binding.tools {
                    tools.push(ExecutorTool { handle: handle.clone(), tool: tool.clone() });
                }
            });
        }
        let discover = Arc::new(DiscoverTools {
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            health: self.health.clone(),
            transport: self.transport.clone(),
            search_top_k: self.config.search_top_k,
            discover_binding_k: self.config.discover_binding_k,
        });
        tools.push(ExecutorTool { handle: "__meta__".to_string(), tool: discover });
        tools
    }

    /// Releases every cached binding and closes their connections. The
    /// metrics file is closed implicitly when the last `Arc<UsageMetrics>` drops.
    pub async fn shutdown(&self) {
        for binding in self.cache.drain_all() {
            binding.connection.close().await;
        }
        tracing::info!("router shutdown: cache drained");
    }

    /// MRU-first handles currently resident in the cache.
    pub fn cache_contents(&self) -> Vec<String> {
        self.cache.contents()
    }

    pub fn is_healthy(&self, handle: &str) -> bool {
        self.health.is_healthy(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use router_config::RouterConfig;

    use super::*;
    use crate::catalog::{CatalogRegistry, ServerEntry};
    use crate::error::AgentExecutorError;
    use crate::mocks::{EchoTool, FakeTransport, MockAgentExecutor, MockEmbeddingProvider};
    use crate::ports::{AgentRunResult, TransportSpec};

    fn entry(handle: &str) -> ServerEntry {
        ServerEntry {
            handle: handle.to_string(),
            display_name: handle.to_string(),
            category: "finance".to_string(),
            description: format!("server {handle}"),
            keywords: vec!["stock".to_string()],
            transport_spec: TransportSpec::Stdio { program: "true".to_string(), args: vec![] },
        }
    }

    async fn build_router(preload_count: usize) -> (SmartRouter, Arc<MockAgentExecutor>, Arc<FakeTransport>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RouterConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.max_cache_size = 4;
        config.preload_count = preload_count;
        config.search_top_k = Some(5);
        config.discover_binding_k = 1;
        config.similarity_threshold = 0.0;
        config.relative_score_cutoff = 0.0;
        config.validate().unwrap();

        let embedder = Arc::new(MockEmbeddingProvider::new(32));
        let mut registry = CatalogRegistry::new(
            vec![entry("fin-quotes")],
            embedder,
            config.similarity_threshold,
            config.relative_score_cutoff,
        );
        registry.initialize().await.unwrap();

        let transport = Arc::new(FakeTransport::new());
        transport.register("fin-quotes", vec![Arc::new(EchoTool::new("quote", "42"))]);

        let executor = Arc::new(MockAgentExecutor::new("done"));
        let router = SmartRouter::new(config, registry, executor.clone(), transport.clone())
            .unwrap();
        // Leak the tempdir for the lifetime of the test by forgetting it;
        // acceptable since tests run in a fresh process each time.
        std::mem::forget(dir);
        (router, executor, transport)
    }

    #[tokio::test]
    async fn successful_turn_appends_history_and_marks_touched_handles_healthy() {
        let (router, executor, transport) = build_router(0).await;
        transport.register("fin-quotes", vec![Arc::new(EchoTool::new("quote", "42"))]);
        executor.script(Ok(AgentRunResult {
            final_text: "the price is 42".to_string(),
            touched_handles: vec!["fin-quotes".to_string()],
        }));
        router.cache_contents(); // no-op sanity call

        // Manually seed the cache the way discover_tools would, to exercise
        // touch/mark_ok bookkeeping deterministically.
        let binding = transport.open("fin-quotes", &TransportSpec::Stdio { program: "true".into(), args: vec![] }).await.unwrap();
        router.cache.insert("fin-quotes".to_string(), binding);

        let history = ConversationHistory::new();
        let reply = router.handle_turn(&history, "what's the stock price?", None).await.unwrap();
        assert_eq!(reply, "the price is 42");
        assert_eq!(history.len(), 2);
        assert!(router.is_healthy("fin-quotes"));
    }

    #[tokio::test]
    async fn failed_turn_rolls_back_history_and_evicts_only_newly_discovered_handles() {
        let (router, executor, _transport) = build_router(0).await;
        let history = ConversationHistory::new();
        history.append(Message::system("system preamble"));

        executor.script(Err(AgentExecutorError::Other("boom".to_string())));
        let result = router.handle_turn(&history, "hi", None).await;
        assert!(result.is_err());
        assert_eq!(history.len(), 1); // only the system preamble remains
        assert!(!router.is_healthy("fin-quotes") || router.cache_contents().is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_every_cached_connection() {
        let (router, _executor, transport) = build_router(0).await;
        let binding = transport.open("fin-quotes", &TransportSpec::Stdio { program: "true".into(), args: vec![] }).await.unwrap();
        router.cache.insert("fin-quotes".to_string(), binding);
        assert_eq!(router.cache_contents().len(), 1);
        router.shutdown().await;
        assert!(router.cache_contents().is_empty());
    }
}
