//! Qdrant REST client.
//!
//! Covers the three operations the memory engine needs: ensure a collection
//! (with an integer payload index on `timestamp`), upsert points, and
//! filtered vector queries. The client is safe for concurrent use.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::QdrantConfig;
use crate::error::{PicoError, Result};

/// A point to upsert: stable id, vector and payload.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// One vector-search hit.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SearchResult {
    /// The payload `timestamp` field as unix seconds, 0 when missing.
    pub fn timestamp(&self) -> i64 {
        self.payload
            .get("timestamp")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
    }
}

/// Vector store operations used by the memory engine.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()>;
    async fn store(&self, collection: &str, record: VectorRecord) -> Result<()>;
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        offset: usize,
        filters: HashMap<String, String>,
    ) -> Result<Vec<SearchResult>>;
}

/// Qdrant over its REST API.
pub struct QdrantClient {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CollectionsResponse {
    result: CollectionsResult,
}

#[derive(Debug, Deserialize)]
struct CollectionsResult {
    collections: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<SearchResult>,
}

impl QdrantClient {
    pub fn new(config: &QdrantConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if !self.api_key.is_empty() {
            req = req.header("api-key", &self.api_key);
        }
        req
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PicoError::Memory(format!(
                "qdrant {} failed: status={} body={}",
                what, status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorStore for QdrantClient {
    /// Create the collection if absent and make sure an integer index on
    /// `timestamp` exists. Both operations are idempotent.
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "/collections")
            .send()
            .await?;
        let collections: CollectionsResponse =
            Self::check(response, "list collections").await?.json().await?;

        let exists = collections
            .result
            .collections
            .iter()
            .any(|c| c.name == name);

        if !exists {
            let body = json!({
                "vectors": {"size": dimension, "distance": "Cosine"}
            });
            let response = self
                .request(reqwest::Method::PUT, &format!("/collections/{}", name))
                .json(&body)
                .send()
                .await?;
            Self::check(response, "create collection").await?;
        }

        let index_body = json!({
            "field_name": "timestamp",
            "field_schema": "integer"
        });
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{}/index", name))
            .json(&index_body)
            .send()
            .await?;
        // Qdrant answers 200 whether the index is new or already present.
        Self::check(response, "create timestamp index").await?;
        Ok(())
    }

    async fn store(&self, collection: &str, record: VectorRecord) -> Result<()> {
        let body = json!({
            "points": [{
                "id": record.id,
                "vector": record.vector,
                "payload": record.payload,
            }]
        });
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points", collection),
            )
            .json(&body)
            .send()
            .await?;
        Self::check(response, "upsert point").await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        offset: usize,
        filters: HashMap<String, String>,
    ) -> Result<Vec<SearchResult>> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "offset": offset,
            "with_payload": true,
        });
        if !filters.is_empty() {
            let must: Vec<serde_json::Value> = filters
                .iter()
                .map(|(k, v)| json!({"key": k, "match": {"value": v}}))
                .collect();
            body["filter"] = json!({"must": must});
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/query", collection),
            )
            .json(&body)
            .send()
            .await?;
        let parsed: QueryResponse = Self::check(response, "query points").await?.json().await?;
        Ok(parsed.result.points)
    }
}
