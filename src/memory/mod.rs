//! Long-term memory engine.
//!
//! Rotated sessions are archived into a vector store: the transcript is
//! flattened, chunked by a sliding code-point window with 10% overlap,
//! embedded, and upserted under deterministic point ids so re-archival is
//! idempotent. Retrieval is either by similarity ([`MemoryManager::search`])
//! or by similarity-then-date ([`MemoryManager::search_by_date`]); the
//! vector backend cannot combine `order_by` with a vector query, so the
//! date-ordered variant over-fetches candidates and sorts client-side.
//!
//! All reads and writes are scoped by `workspace_id`.

pub mod embedding;
pub mod qdrant;

pub use embedding::{Embedder, EmbeddingClient};
pub use qdrant::{QdrantClient, SearchResult, VectorRecord, VectorStore};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::metrics::recorder;
use crate::session::{Message, Role};

/// Default chunk window in Unicode code points.
const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Sort order for date-ordered retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    /// Parse "asc"/"desc", defaulting to descending.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        }
    }
}

/// The memory engine: archival plus the two retrieval modes.
pub struct MemoryManager {
    store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        config: MemoryConfig,
        store: Option<Arc<dyn VectorStore>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// A manager that silently no-ops, used when memory is not configured.
    pub fn disabled() -> Self {
        Self {
            store: None,
            embedder: None,
            config: MemoryConfig::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.store.is_some() && self.embedder.is_some()
    }

    fn collection(&self) -> &str {
        if self.config.qdrant.collection_name.is_empty() {
            "picoclaw"
        } else {
            &self.config.qdrant.collection_name
        }
    }

    fn chunk_size(&self) -> usize {
        if self.config.embedding.chunk_size > 0 {
            self.config.embedding.chunk_size
        } else {
            DEFAULT_CHUNK_SIZE
        }
    }

    /// Archive a rotated session.
    ///
    /// System messages are always excluded; tool messages only when
    /// configured. Returns the number of chunks stored (0 when disabled or
    /// the transcript is empty). `timestamp` is unix seconds shared by every
    /// chunk of this archival, and part of the deterministic point id.
    pub async fn archive_session(
        &self,
        workspace_id: &str,
        session_id: &str,
        timestamp: i64,
        messages: &[Message],
    ) -> Result<usize> {
        let (Some(store), Some(embedder)) = (&self.store, &self.embedder) else {
            return Ok(0);
        };
        if !self.config.enabled {
            return Ok(0);
        }

        let text = flatten_transcript(messages, self.config.archive_tool_messages);
        if text.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let chunks = chunk_text(&text, self.chunk_size());
        let total = chunks.len();
        let collection = self.collection();

        // The first embedding discovers the vector dimension for the
        // collection; only then can it be ensured.
        let first_vector = embedder.embed(&chunks[0]).await?;
        store
            .ensure_collection(collection, first_vector.len())
            .await?;

        for (index, chunk) in chunks.iter().enumerate() {
            let vector = if index == 0 {
                first_vector.clone()
            } else {
                embedder.embed(chunk).await?
            };
            let record = VectorRecord {
                id: point_id(workspace_id, session_id, timestamp, index),
                vector,
                payload: serde_json::json!({
                    "workspace_id": workspace_id,
                    "session_id": session_id,
                    "content": chunk,
                    "timestamp": timestamp,
                    "chunk_index": index,
                    "total_chunks": total,
                }),
            };
            store.store(collection, record).await?;
        }

        recorder()
            .memory_archive_duration
            .observe(&[workspace_id], start.elapsed().as_secs_f64());
        debug!(
            session = session_id,
            chunks = total,
            "Archived session to vector store"
        );
        Ok(total)
    }

    /// Similarity search scoped to `workspace_id`.
    pub async fn search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>> {
        let (Some(store), Some(embedder)) = (&self.store, &self.embedder) else {
            return Ok(Vec::new());
        };
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let vector = embedder.embed(query).await?;
        let filters = HashMap::from([("workspace_id".to_string(), workspace_id.to_string())]);
        let results = store
            .search(self.collection(), vector, limit, offset, filters)
            .await?;
        recorder()
            .memory_search_duration
            .observe(&[], start.elapsed().as_secs_f64());
        Ok(results)
    }

    /// Similarity-then-date retrieval.
    ///
    /// Fetches `max(limit * 10, 50)` candidates by similarity, stable-sorts
    /// them by payload timestamp in the requested order, and truncates.
    pub async fn search_by_date(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<SearchResult>> {
        let candidates = (limit * 10).max(50);
        let mut results = self.search(workspace_id, query, candidates, 0).await?;
        sort_results_by_date(&mut results, order);
        results.truncate(limit);
        Ok(results)
    }
}

/// Flatten a transcript into `"<role>: <content>\n"` lines, skipping system
/// (and optionally tool) messages.
fn flatten_transcript(messages: &[Message], include_tools: bool) -> String {
    let mut out = String::new();
    for msg in messages {
        match msg.role {
            Role::System => continue,
            Role::Tool if !include_tools => continue,
            _ => {}
        }
        if msg.content.is_empty() {
            continue;
        }
        out.push_str(&format!("{}: {}\n", msg.role, msg.content));
    }
    out
}

/// Sliding-window chunking over Unicode code points with 10% overlap.
///
/// Text at most one window long yields a single chunk.
fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let runes: Vec<char> = text.chars().collect();
    if runes.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let overlap = chunk_size / 10;
    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < runes.len() {
        let end = (start + chunk_size).min(runes.len());
        chunks.push(runes[start..end].iter().collect());
        if end == runes.len() {
            break;
        }
        start += stride;
    }
    chunks
}

/// Deterministic point id: UUIDv3 (MD5) in the URL namespace over
/// `"<workspace>_<session>_<timestamp>_<chunk>"`. Re-archiving the same
/// content yields the same ids, making upserts idempotent.
fn point_id(workspace_id: &str, session_id: &str, timestamp: i64, chunk_index: usize) -> String {
    let raw = format!("{}_{}_{}_{}", workspace_id, session_id, timestamp, chunk_index);
    Uuid::new_v3(&Uuid::NAMESPACE_URL, raw.as_bytes()).to_string()
}

/// Stable in-place sort by payload timestamp.
fn sort_results_by_date(results: &mut [SearchResult], order: SortOrder) {
    match order {
        SortOrder::Ascending => results.sort_by_key(SearchResult::timestamp),
        SortOrder::Descending => {
            results.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory store capturing upserts and serving canned results.
    struct FakeStore {
        records: Mutex<Vec<(String, VectorRecord)>>,
        results: Mutex<Vec<SearchResult>>,
        ensured: Mutex<Vec<(String, usize)>>,
    }

    impl FakeStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                results: Mutex::new(Vec::new()),
                ensured: Mutex::new(Vec::new()),
            })
        }

        fn with_results(results: Vec<SearchResult>) -> Arc<Self> {
            let store = Self::new();
            *store.results.lock().unwrap() = results;
            store
        }

        fn stored_ids(&self) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|(_, r)| r.id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
            self.ensured
                .lock()
                .unwrap()
                .push((name.to_string(), dimension));
            Ok(())
        }

        async fn store(&self, collection: &str, record: VectorRecord) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .push((collection.to_string(), record));
            Ok(())
        }

        async fn search(
            &self,
            _collection: &str,
            _vector: Vec<f32>,
            limit: usize,
            _offset: usize,
            _filters: HashMap<String, String>,
        ) -> Result<Vec<SearchResult>> {
            let results = self.results.lock().unwrap();
            Ok(results.iter().take(limit).cloned().collect())
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3, 0.4])
        }
    }

    fn enabled_config() -> MemoryConfig {
        MemoryConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn manager_with(store: Arc<FakeStore>) -> MemoryManager {
        MemoryManager::new(enabled_config(), Some(store), Some(Arc::new(FakeEmbedder)))
    }

    fn hit(id: &str, score: f32, ts: i64) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            score,
            payload: serde_json::json!({"timestamp": ts, "session_id": "s"}),
        }
    }

    #[test]
    fn test_chunk_text_short_single_chunk() {
        let chunks = chunk_text("hello world", 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "hello world");
    }

    #[test]
    fn test_chunk_text_9000_chars_makes_3_chunks() {
        let text = "x".repeat(9000);
        let chunks = chunk_text(&text, 4096);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1].chars().count(), 4096);
        // Last chunk covers the tail from offset 7374.
        assert_eq!(chunks[2].chars().count(), 9000 - 7374);
    }

    #[test]
    fn test_chunk_text_overlap() {
        let text: String = ('a'..='z').cycle().take(300).collect();
        let chunks = chunk_text(&text, 100);
        // stride = 90, so chunk 1 starts 10 chars before chunk 0 ends.
        let chunk0: Vec<char> = chunks[0].chars().collect();
        let chunk1: Vec<char> = chunks[1].chars().collect();
        assert_eq!(&chunk0[90..], &chunk1[..10]);
    }

    #[test]
    fn test_chunk_text_multibyte_counts_code_points() {
        let text = "日".repeat(150);
        let chunks = chunk_text(&text, 100);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].chars().count(), 100);
    }

    #[test]
    fn test_point_id_deterministic() {
        let a = point_id("w1", "s1", 1_700_000_000, 0);
        let b = point_id("w1", "s1", 1_700_000_000, 0);
        assert_eq!(a, b);

        let c = point_id("w1", "s1", 1_700_000_000, 1);
        assert_ne!(a, c);
        let d = point_id("w2", "s1", 1_700_000_000, 0);
        assert_ne!(a, d);
    }

    #[test]
    fn test_flatten_transcript_skips_system() {
        let messages = vec![
            Message::system("prompt"),
            Message::user("hello"),
            Message::assistant("hi"),
            Message::tool_result("c1", "tool output"),
        ];
        let text = flatten_transcript(&messages, false);
        assert_eq!(text, "user: hello\nassistant: hi\n");

        let with_tools = flatten_transcript(&messages, true);
        assert!(with_tools.contains("tool: tool output"));
    }

    #[tokio::test]
    async fn test_archive_empty_transcript_is_noop() {
        let store = FakeStore::new();
        let manager = manager_with(Arc::clone(&store));
        let stored = manager
            .archive_session("w1", "s1", 1_700_000_000, &[Message::system("only system")])
            .await
            .unwrap();
        assert_eq!(stored, 0);
        assert!(store.stored_ids().is_empty());
    }

    #[tokio::test]
    async fn test_archive_disabled_is_noop() {
        let store = FakeStore::new();
        let manager = MemoryManager::new(
            MemoryConfig::default(),
            Some(Arc::clone(&store) as Arc<dyn VectorStore>),
            Some(Arc::new(FakeEmbedder)),
        );
        assert!(!manager.is_enabled());
        let stored = manager
            .archive_session("w1", "s1", 0, &[Message::user("hi")])
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn test_archive_stores_chunks_with_deterministic_ids() {
        let store = FakeStore::new();
        let manager = manager_with(Arc::clone(&store));

        let long = "m".repeat(9000);
        let messages = vec![Message::user(&long)];
        let stored = manager
            .archive_session("w1", "s1", 1_700_000_000, &messages)
            .await
            .unwrap();
        assert_eq!(stored, 3);

        let ids = store.stored_ids();
        assert_eq!(ids.len(), 3);

        // Re-archiving the same content yields byte-identical ids.
        let store2 = FakeStore::new();
        let manager2 = manager_with(Arc::clone(&store2));
        manager2
            .archive_session("w1", "s1", 1_700_000_000, &messages)
            .await
            .unwrap();
        assert_eq!(ids, store2.stored_ids());
    }

    #[tokio::test]
    async fn test_archive_payload_shape() {
        let store = FakeStore::new();
        let manager = manager_with(Arc::clone(&store));
        manager
            .archive_session("w1", "s1", 1_700_000_000, &[Message::user("short")])
            .await
            .unwrap();

        let records = store.records.lock().unwrap();
        let (collection, record) = &records[0];
        assert_eq!(collection, "picoclaw");
        assert_eq!(record.payload["workspace_id"], "w1");
        assert_eq!(record.payload["session_id"], "s1");
        assert_eq!(record.payload["timestamp"], 1_700_000_000i64);
        assert_eq!(record.payload["chunk_index"], 0);
        assert_eq!(record.payload["total_chunks"], 1);
        assert!(record.payload["content"]
            .as_str()
            .unwrap()
            .contains("user: short"));
    }

    #[tokio::test]
    async fn test_archive_ensures_collection_with_embedding_dimension() {
        let store = FakeStore::new();
        let manager = manager_with(Arc::clone(&store));
        manager
            .archive_session("w1", "s1", 1, &[Message::user("hi")])
            .await
            .unwrap();
        let ensured = store.ensured.lock().unwrap();
        assert_eq!(ensured[0], ("picoclaw".to_string(), 4));
    }

    #[tokio::test]
    async fn test_search_disabled_returns_empty() {
        let manager = MemoryManager::disabled();
        let results = manager.search("w1", "query", 5, 0).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_by_date_sorts_and_truncates() {
        let store = FakeStore::with_results(vec![
            hit("a", 0.9, 300),
            hit("b", 0.8, 100),
            hit("c", 0.7, 200),
        ]);
        let manager = manager_with(store);

        let asc = manager
            .search_by_date("w1", "topic", 2, SortOrder::Ascending)
            .await
            .unwrap();
        let ids: Vec<&str> = asc.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        let desc = manager
            .search_by_date("w1", "topic", 2, SortOrder::Descending)
            .await
            .unwrap();
        let ids: Vec<&str> = desc.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_sort_is_stable_on_equal_timestamps() {
        let mut results = vec![hit("first", 0.9, 100), hit("second", 0.8, 100)];
        sort_results_by_date(&mut results, SortOrder::Ascending);
        assert_eq!(results[0].id, "first");
        assert_eq!(results[1].id, "second");
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("asc"), SortOrder::Ascending);
        assert_eq!(SortOrder::parse("ASC"), SortOrder::Ascending);
        assert_eq!(SortOrder::parse("desc"), SortOrder::Descending);
        assert_eq!(SortOrder::parse("anything"), SortOrder::Descending);
    }
}
