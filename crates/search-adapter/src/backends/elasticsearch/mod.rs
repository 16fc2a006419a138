//! Elasticsearch client.
//!
//! Talks to a single node over the official `elasticsearch` crate. Unbounded
//! reads use either scroll cursors or point-in-time leases; writes go through
//! the `_bulk` endpoint.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use helios_search_adapter::backends::elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
//! use helios_search_adapter::{SearchAdapterConfig, SearchOperations};
//!
//! let client = ElasticsearchClient::new(ElasticsearchConfig {
//!     nodes: vec!["http://localhost:9200".to_string()],
//!     ..Default::default()
//! })?;
//! let ops = SearchOperations::new(Arc::new(client), SearchAdapterConfig::default());
//! ```

mod client;
mod config;

pub use client::ElasticsearchClient;
pub use config::{ElasticsearchAuth, ElasticsearchConfig};
