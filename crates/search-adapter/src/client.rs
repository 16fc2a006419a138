//! The request/response client seam.
//!
//! [`SearchClient`] is the only way the adapter talks to the engine. The
//! Elasticsearch implementation lives in `backends::elasticsearch`; tests plug
//! in instrumented doubles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bulk::{BulkRequest, BulkResponse};
use crate::config::KeepAlive;
use crate::cursor::SortKey;
use crate::error::AdapterResult;

/// A shared, type-erased client.
pub type SharedClient = Arc<dyn SearchClient>;

/// One request/response round trip against the search engine.
///
/// Implementations translate engine failures into [`crate::error::TransportError`]
/// and never retry on their own.
#[async_trait]
pub trait SearchClient: Send + Sync + 'static {
    /// Executes a search. When `request.scroll` is set the engine opens a scroll
    /// cursor and returns its first token with the first page.
    async fn search(&self, request: SearchRequest) -> AdapterResult<SearchResponse>;

    /// Fetches the next page of a scroll cursor.
    async fn scroll(&self, scroll_id: &str, keep_alive: KeepAlive)
    -> AdapterResult<SearchResponse>;

    /// Releases a scroll cursor.
    async fn clear_scroll(&self, scroll_id: &str) -> AdapterResult<()>;

    /// Opens a point-in-time lease over `indices` and returns its id.
    async fn open_point_in_time(
        &self,
        indices: &[String],
        keep_alive: KeepAlive,
    ) -> AdapterResult<String>;

    /// Releases a point-in-time lease.
    async fn close_point_in_time(&self, pit_id: &str) -> AdapterResult<()>;

    /// Executes a batch of write operations.
    async fn bulk(&self, request: &BulkRequest) -> AdapterResult<BulkResponse>;
}

/// A search request ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Target indices. Empty when the body is bound to a point-in-time lease.
    pub indices: Vec<String>,
    /// The search body.
    pub body: Value,
    /// Opens a scroll cursor with this keep-alive.
    pub scroll: Option<KeepAlive>,
}

/// A search response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Scroll token for the next page, when the request opened or continued a scroll.
    #[serde(rename = "_scroll_id", default, skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,

    /// Point-in-time id echoed back by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pit_id: Option<String>,

    /// The hits envelope.
    #[serde(default)]
    pub hits: HitsEnvelope,
}

/// The `hits` object of a search response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HitsEnvelope {
    /// Total hit count, when tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalHits>,

    /// The hits in response order.
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

/// Total hit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    /// Number of hits.
    pub value: u64,
    /// Whether `value` is exact (`eq`) or a lower bound (`gte`).
    #[serde(default)]
    pub relation: TotalRelation,
}

/// Relation of a total hit count to the real count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalRelation {
    /// Exact count.
    #[default]
    Eq,
    /// Lower bound.
    Gte,
}

impl SearchResponse {
    /// Creates a response carrying `hits`.
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            hits: HitsEnvelope { total: None, hits },
            ..Default::default()
        }
    }

    /// Sets the scroll token.
    pub fn with_scroll_id(mut self, scroll_id: impl Into<String>) -> Self {
        self.scroll_id = Some(scroll_id.into());
        self
    }

    /// Returns the hits.
    pub fn hits(&self) -> &[SearchHit] {
        &self.hits.hits
    }

    /// Returns the total hit count if the engine tracked it.
    pub fn total(&self) -> Option<u64> {
        self.hits.total.map(|t| t.value)
    }
}

/// A raw search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Index the document lives in.
    #[serde(rename = "_index")]
    pub index: String,

    /// Document id.
    #[serde(rename = "_id", default)]
    pub id: Option<String>,

    /// Relevance score.
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,

    /// Document source.
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,

    /// Sort values of this hit, in sort-clause order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,

    /// Sequence number, when requested.
    #[serde(rename = "_seq_no", default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<i64>,

    /// Primary term, when requested.
    #[serde(rename = "_primary_term", default, skip_serializing_if = "Option::is_none")]
    pub primary_term: Option<i64>,

    /// Document version, when requested.
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl SearchHit {
    /// Creates a hit with a source document.
    pub fn new(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self {
            index: index.into(),
            id: Some(id.into()),
            score: None,
            source: Some(source),
            sort: Vec::new(),
            seq_no: None,
            primary_term: None,
            version: None,
        }
    }

    /// Sets the sort values.
    pub fn with_sort(mut self, sort: Vec<Value>) -> Self {
        self.sort = sort;
        self
    }

    /// Returns the continue-from key of this hit, if it has sort values.
    pub fn sort_key(&self) -> Option<SortKey> {
        if self.sort.is_empty() {
            None
        } else {
            Some(SortKey::new(self.sort.clone()))
        }
    }

    /// Deserializes `_source` into `T`.
    pub fn deserialize_source<T: DeserializeOwned>(&self) -> AdapterResult<T> {
        let source = self.source.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(source)?)
    }
}
