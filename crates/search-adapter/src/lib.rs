//! Helios Search Adapter
//!
//! Streams arbitrarily large result sets out of a search engine and writes
//! batches of documents back, without losing track of server-side resources or
//! per-document failures.
//!
//! # Features
//!
//! - **Unbounded streaming**: queries without paging or limits are read page by
//!   page through a cursor lease (scroll or point-in-time)
//! - **Guaranteed release**: every lease is released exactly once, whether the
//!   stream is exhausted, fails or is dropped by the consumer
//! - **Stable ordering**: point-in-time streams append an ordinal tie-breaker so
//!   `search_after` never skips or repeats documents
//! - **Bulk reconciliation**: bulk responses are matched back to their
//!   operations; any failed item fails the batch with a per-id report
//!
//! # Backend Features
//!
//! - `elasticsearch` (default) - Elasticsearch client over the official crate
//!
//! # Architecture
//!
//! - [`query`] - Query model and sort directives
//! - [`client`] - The request/response seam to the engine
//! - [`cursor`] - Cursor variants, lease lifecycle and the cursor engine
//! - [`fetcher`] - One page request per cursor advance
//! - [`stream`] - Lazy document streams bound to a lease
//! - [`bulk`] - Write operations and bulk response reconciliation
//! - [`operations`] - The public entry point
//! - [`backends`] - Client implementations
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use helios_search_adapter::backends::elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
//! use helios_search_adapter::{Query, SearchAdapterConfig, SearchOperations, SortDirective};
//!
//! let client = Arc::new(ElasticsearchClient::new(ElasticsearchConfig::default())?);
//! let ops = SearchOperations::new(client, SearchAdapterConfig::default());
//!
//! let mut events = ops.stream(Query::new("events").with_sort(SortDirective::asc("ts")))?;
//! while let Some(hit) = events.next().await {
//!     println!("{:?}", hit?.id);
//! }
//! // The point-in-time lease is closed once the loop ends, or when `events` is dropped.
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod bulk;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod operations;
pub mod query;
pub mod stream;

// Re-export commonly used types at crate root
pub use bulk::{
    BulkItemOutcome, BulkOutcome, BulkReconciler, BulkRequest, BulkResponse, OperationKind,
    RefreshPolicy, WriteOperation,
};
pub use client::{SearchClient, SearchHit, SearchRequest, SearchResponse, SharedClient};
pub use config::{CursorStrategy, KeepAlive, SearchAdapterConfig};
pub use cursor::{Cursor, CursorEngine, LeaseState, Page, ReleaseAck, SortKey};
pub use error::{AdapterError, AdapterResult, BulkFailure, BulkItemFailure, TransportError};
pub use fetcher::PageFetcher;
pub use operations::SearchOperations;
pub use query::{Paging, Query, SortDirection, SortDirective};
pub use stream::{DocumentStream, LeaseGuard};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
