//! Catalog Registry: the immutable server catalog and semantic search.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::EmbeddingProviderError;
use crate::ports::{EmbeddingProvider, TransportSpec};

/// Static catalog record. Immutable after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerEntry {
    pub handle: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub transport_spec: TransportSpec,
}

impl ServerEntry {
    /// Text embedded at registry initialization:
    /// `name + ". " + description + " keywords: " + joined_keywords`.
    fn embedding_text(&self) -> String {
        format!(
            "{}. {} keywords: {}",
            self.display_name,
            self.description,
            self.keywords.join(" ")
        )
    }
}

/// A server entry plus its precomputed embedding.
/// Computed once at `CatalogRegistry::initialize` and never mutated.
#[derive(Clone, Debug)]
struct EmbeddedEntry {
    entry: ServerEntry,
    vector: Vec<f32>,
}

/// One result of [`CatalogRegistry::search`].
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub handle: String,
    pub score: f32,
    pub description: String,
}

/// Immutable-at-startup catalog of known servers, with semantic search.
pub struct CatalogRegistry {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: Vec<ServerEntry>,
    embedded: Vec<EmbeddedEntry>,
    similarity_threshold: f32,
    relative_score_cutoff: f32,
}

impl CatalogRegistry {
    /// Builds an uninitialized registry. Call [`CatalogRegistry::initialize`] before
    /// any `search`; `entries` order is preserved as the catalog's insertion order
    /// (used for stable tie-breaking in `search`).
    pub fn new(
        entries: Vec<ServerEntry>,
        embedder: Arc<dyn EmbeddingProvider>,
        similarity_threshold: f32,
        relative_score_cutoff: f32,
    ) -> Self {
        Self {
            embedder,
            entries,
            embedded: Vec::new(),
            similarity_threshold,
            relative_score_cutoff,
        }
    }

    /// Computes one embedding per catalog entry. Fatal at startup on
    /// failure; the router must not attempt discovery with a half-initialized catalog.
    pub async fn initialize(&mut self) -> Result<(), EmbeddingProviderError> {
        if self.entries.is_empty() {
            self.embedded = Vec::new();
            return Ok(());
        }
        let texts: Vec<String> = self.entries.iter().map(|e| e.embedding_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&refs).await?;
        self.embedded = self
            .entries
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(entry, vector)| EmbeddedEntry { entry, vector })
            .collect();
        tracing::info!(count = self.embedded.len(), "catalog registry initialized");
        Ok(())
    }

    pub fn entry(&self, handle: &str) -> Option<&ServerEntry> {
        self.entries.iter().find(|e| e.handle == handle)
    }

    /// Catalog insertion order, used as the final tie-break in usage ranking.
    pub fn handles(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.handle.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Semantic search over the catalog.
    ///
    /// Empty `queries` returns an empty result without calling the embedder.
    /// `excluded` may contain handles not present in the catalog (ignored).
    /// `healthy_predicate` filters entries *before* scoring: an unhealthy
    /// handle never appears in the result, even if it would otherwise score
    /// highest.
    pub async fn search(
        &self,
        queries: &[&str],
        excluded: &HashSet<String>,
        healthy_predicate: impl Fn(&str) -> bool,
    ) -> Result<Vec<SearchResult>, EmbeddingProviderError> {
        if queries.is_empty() || self.embedded.is_empty() {
            return Ok(Vec::new());
        }

        let query_vectors = self.embedder.embed(queries).await?;

        let mut scored: Vec<(usize, f32)> = Vec::new();
        for (idx, candidate) in self.embedded.iter().enumerate() {
            if excluded.contains(&candidate.entry.handle) {
                continue;
            }
            if !healthy_predicate(&candidate.entry.handle) {
                continue;
            }
            let best = query_vectors
                .iter()
                .map(|q| cosine_similarity(q, &candidate.vector))
                .fold(f32::MIN, f32::max);
            scored.push((idx, best));
        }

        scored.retain(|&(_, score)| score >= self.similarity_threshold);

        let top_score = scored.iter().map(|&(_, s)| s).fold(f32::MIN, f32::max);
        if top_score > f32::MIN {
            let cutoff = self.relative_score_cutoff * top_score;
            scored.retain(|&(_, score)| score >= cutoff);
        }

        // Stable sort descending by score; ties keep catalog insertion order
        // because `scored` was built by iterating entries in order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .map(|(idx, score)| {
                let e = &self.embedded[idx].entry;
                SearchResult {
                    handle: e.handle.clone(),
                    score,
                    description: e.description.clone(),
                }
            })
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockEmbeddingProvider;

    fn entry(handle: &str, keywords: &[&str]) -> ServerEntry {
        ServerEntry {
            handle: handle.to_string(),
            display_name: handle.to_string(),
            category: "test".to_string(),
            description: format!("a server for {}", handle),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            transport_spec: TransportSpec::Stdio { program: "true".to_string(), args: vec![] },
        }
    }

    #[tokio::test]
    async fn empty_catalog_returns_empty_search() {
        let embedder = Arc::new(MockEmbeddingProvider::new(16));
        let mut registry = CatalogRegistry::new(vec![], embedder, 0.35, 0.7);
        registry.initialize().await.unwrap();
        let result = registry
            .search(&["anything"], &HashSet::new(), |_| true)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn empty_queries_returns_empty_search() {
        let embedder = Arc::new(MockEmbeddingProvider::new(16));
        let mut registry =
            CatalogRegistry::new(vec![entry("fin-quotes", &["stock"])], embedder, 0.35, 0.7);
        registry.initialize().await.unwrap();
        let result = registry
            .search(&[], &HashSet::new(), |_| true)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn search_finds_matching_handle_and_excludes_unhealthy() {
        let embedder = Arc::new(MockEmbeddingProvider::new(32));
        let mut registry = CatalogRegistry::new(
            vec![entry("fin-quotes", &["stock", "ticker"]), entry("news-wire", &["news"])],
            embedder,
            0.0,
            0.0,
        );
        registry.initialize().await.unwrap();

        let result = registry
            .search(&["stock ticker"], &HashSet::new(), |_| true)
            .await
            .unwrap();
        assert!(result.iter().any(|r| r.handle == "fin-quotes"));

        let result = registry
            .search(&["stock ticker"], &HashSet::new(), |h| h != "fin-quotes")
            .await
            .unwrap();
        assert!(!result.iter().any(|r| r.handle == "fin-quotes"));
    }

    #[tokio::test]
    async fn search_excludes_handles_in_excluded_set() {
        let embedder = Arc::new(MockEmbeddingProvider::new(16));
        let mut registry =
            CatalogRegistry::new(vec![entry("fin-quotes", &["stock"])], embedder, 0.0, 0.0);
        registry.initialize().await.unwrap();

        let mut excluded = HashSet::new();
        excluded.insert("fin-quotes".to_string());
        let result = registry.search(&["stock"], &excluded, |_| true).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn cosine_similarity_is_one_for_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_is_zero_for_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
