//! The public entry point: bounded search, unbounded streaming and bulk writes.

use std::fmt;

use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::bulk::{BulkItemOutcome, BulkReconciler, BulkRequest, WriteOperation};
use crate::client::SharedClient;
use crate::config::SearchAdapterConfig;
use crate::cursor::{CursorEngine, Page};
use crate::error::{AdapterError, AdapterResult};
use crate::fetcher::PageFetcher;
use crate::query::Query;
use crate::stream::DocumentStream;

/// Search and write operations over one [`crate::client::SearchClient`].
#[derive(Clone)]
pub struct SearchOperations {
    client: SharedClient,
    config: SearchAdapterConfig,
    engine: CursorEngine,
    fetcher: PageFetcher,
}

impl fmt::Debug for SearchOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchOperations")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SearchOperations {
    /// Creates the operations facade.
    pub fn new(client: SharedClient, config: SearchAdapterConfig) -> Self {
        Self {
            engine: CursorEngine::new(client.clone(), &config),
            fetcher: PageFetcher::new(client.clone(), config.stream_page_size),
            client,
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SearchAdapterConfig {
        &self.config
    }

    /// Runs a bounded query as a single request.
    ///
    /// Unbounded queries are rejected; use [`SearchOperations::stream`] for those.
    pub async fn search(&self, query: &Query) -> AdapterResult<Page> {
        if !query.is_bounded() {
            return Err(AdapterError::InvalidQuery {
                message: "query has neither paging nor a limit; stream it instead".to_string(),
            });
        }
        self.fetcher.fetch_bounded(query).await
    }

    /// Streams every hit of `query`.
    ///
    /// Paged queries are answered with a single request. Everything else goes
    /// through a cursor lease that is released once the stream ends, fails or
    /// is dropped. Nothing is sent until the stream is first polled.
    pub fn stream(&self, query: Query) -> AdapterResult<DocumentStream> {
        query.validate()?;

        if query.limit == Some(0) {
            return Ok(DocumentStream::empty());
        }

        if query.is_paged() {
            tracing::debug!(
                indices = ?query.indices,
                "Streaming paged query with a single request"
            );
            return Ok(DocumentStream::bounded(self.fetcher.clone(), query));
        }

        tracing::debug!(
            indices = ?query.indices,
            strategy = %self.engine.strategy(),
            limit = ?query.limit,
            "Streaming query through a cursor"
        );
        Ok(DocumentStream::scoped(self.engine.clone(), query))
    }

    /// Streams hits of `query` deserialized into `T`.
    pub fn stream_as<T>(&self, query: Query) -> AdapterResult<BoxStream<'static, AdapterResult<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Ok(self.stream(query)?.into_documents())
    }

    /// Executes `operations` as one bulk request.
    ///
    /// On success the per-item outcomes come back in operation order. If any
    /// item fails the whole call fails with [`AdapterError::BulkFailure`];
    /// items the engine accepted stay written.
    pub async fn bulk(
        &self,
        operations: Vec<WriteOperation>,
    ) -> AdapterResult<Vec<BulkItemOutcome>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }

        let request = BulkRequest::new(operations).with_refresh(self.config.refresh);
        let response = self.client.bulk(&request).await?;

        let outcome = BulkReconciler::reconcile(&request.operations, &response)?;
        match outcome.into_result() {
            Ok(items) => {
                tracing::debug!(
                    items = items.len(),
                    took_ms = response.took,
                    "Bulk request succeeded"
                );
                Ok(items)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Bulk request had failed items");
                Err(e)
            }
        }
    }
}
