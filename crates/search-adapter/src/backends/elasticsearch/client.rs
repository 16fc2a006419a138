//! [`SearchClient`] over the official Elasticsearch client.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::request::JsonBody;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::params::Refresh;
use elasticsearch::{
    BulkParts, ClearScrollParts, Elasticsearch, OpenPointInTimeParts, ScrollParts, SearchParts,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::config::{ElasticsearchAuth, ElasticsearchConfig};
use crate::bulk::{BulkRequest, BulkResponse, RefreshPolicy};
use crate::client::{SearchClient, SearchRequest, SearchResponse};
use crate::config::KeepAlive;
use crate::error::{AdapterError, AdapterResult, TransportError};

/// Elasticsearch implementation of [`SearchClient`].
pub struct ElasticsearchClient {
    client: Elasticsearch,
    config: ElasticsearchConfig,
}

impl Debug for ElasticsearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchClient")
            .field("node", &self.config.primary_node())
            .finish_non_exhaustive()
    }
}

impl ElasticsearchClient {
    /// Creates a client with the given configuration.
    pub fn new(config: ElasticsearchConfig) -> AdapterResult<Self> {
        let client = Self::build_client(&config)?;
        Ok(Self { client, config })
    }

    /// Builds the Elasticsearch client from configuration.
    fn build_client(config: &ElasticsearchConfig) -> AdapterResult<Elasticsearch> {
        if config.nodes.is_empty() {
            return Err(AdapterError::Configuration {
                message: "no Elasticsearch nodes configured".to_string(),
            });
        }
        let node = config.primary_node();

        let parsed_url: elasticsearch::http::Url =
            node.parse().map_err(|e| TransportError::ConnectionFailed {
                node: node.to_string(),
                message: format!("Invalid URL: {}", e),
            })?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);

        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some(ref auth) = config.auth {
            builder = match auth {
                ElasticsearchAuth::Basic { username, password } => {
                    builder.auth(Credentials::Basic(username.clone(), password.clone()))
                }
                ElasticsearchAuth::Bearer { token } => {
                    builder.auth(Credentials::Bearer(token.clone()))
                }
            };
        }

        let transport = builder
            .build()
            .map_err(|e| TransportError::ConnectionFailed {
                node: node.to_string(),
                message: format!("Failed to build transport: {}", e),
            })?;

        Ok(Elasticsearch::new(transport))
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    /// Refreshes an index so recent writes become searchable.
    ///
    /// Only needed for testing; in production ES refreshes automatically.
    pub async fn refresh_index(&self, index: &str) -> AdapterResult<()> {
        let response = self
            .client
            .indices()
            .refresh(elasticsearch::indices::IndicesRefreshParts::Index(&[index]))
            .send()
            .await
            .map_err(send_failed("refresh"))?;
        ensure_success("refresh", response).await?;
        Ok(())
    }
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    async fn search(&self, request: SearchRequest) -> AdapterResult<SearchResponse> {
        let indices: Vec<&str> = request.indices.iter().map(String::as_str).collect();
        let parts = if indices.is_empty() {
            SearchParts::None
        } else {
            SearchParts::Index(&indices)
        };
        let scroll = request.scroll.map(|k| k.as_param());

        let mut search = self.client.search(parts).body(request.body);
        if let Some(ref scroll) = scroll {
            search = search.scroll(scroll);
        }

        let response = search.send().await.map_err(send_failed("search"))?;
        read_json("search", response).await
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: KeepAlive,
    ) -> AdapterResult<SearchResponse> {
        let response = self
            .client
            .scroll(ScrollParts::None)
            .body(json!({
                "scroll": keep_alive.as_param(),
                "scroll_id": scroll_id,
            }))
            .send()
            .await
            .map_err(send_failed("scroll"))?;
        read_json("scroll", response).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> AdapterResult<()> {
        let response = self
            .client
            .clear_scroll(ClearScrollParts::None)
            .body(json!({ "scroll_id": [scroll_id] }))
            .send()
            .await
            .map_err(send_failed("clear_scroll"))?;

        // 404 means the scroll already expired
        if response.status_code().as_u16() == 404 {
            tracing::debug!("Scroll context already gone on release");
            return Ok(());
        }
        ensure_success("clear_scroll", response).await?;
        Ok(())
    }

    async fn open_point_in_time(
        &self,
        indices: &[String],
        keep_alive: KeepAlive,
    ) -> AdapterResult<String> {
        let indices: Vec<&str> = indices.iter().map(String::as_str).collect();
        let keep_alive = keep_alive.as_param();

        let response = self
            .client
            .open_point_in_time(OpenPointInTimeParts::Index(&indices))
            .keep_alive(&keep_alive)
            .send()
            .await
            .map_err(send_failed("open_point_in_time"))?;

        let body: Value = read_json("open_point_in_time", response).await?;
        body.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_owned)
            .ok_or_else(|| TransportError::malformed("open_point_in_time", "missing id").into())
    }

    async fn close_point_in_time(&self, pit_id: &str) -> AdapterResult<()> {
        let response = self
            .client
            .close_point_in_time()
            .body(json!({ "id": pit_id }))
            .send()
            .await
            .map_err(send_failed("close_point_in_time"))?;

        if response.status_code().as_u16() == 404 {
            tracing::debug!("Point-in-time already gone on release");
            return Ok(());
        }
        ensure_success("close_point_in_time", response).await?;
        Ok(())
    }

    async fn bulk(&self, request: &BulkRequest) -> AdapterResult<BulkResponse> {
        let body: Vec<JsonBody<Value>> = request
            .body_lines()
            .into_iter()
            .map(JsonBody::new)
            .collect();

        let mut bulk = self.client.bulk(BulkParts::None).body(body);
        match request.refresh {
            RefreshPolicy::None => {}
            RefreshPolicy::Immediate => bulk = bulk.refresh(Refresh::True),
            RefreshPolicy::WaitFor => bulk = bulk.refresh(Refresh::WaitFor),
        }

        let response = bulk.send().await.map_err(send_failed("bulk"))?;
        read_json("bulk", response).await
    }
}

fn send_failed(operation: &'static str) -> impl Fn(elasticsearch::Error) -> TransportError {
    move |e| TransportError::RequestFailed {
        operation,
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

/// Fails with [`TransportError::UnexpectedStatus`] unless the response is a success.
async fn ensure_success(operation: &'static str, response: Response) -> AdapterResult<Response> {
    let status = response.status_code();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransportError::UnexpectedStatus {
        operation,
        status: status.as_u16(),
        body,
    }
    .into())
}

async fn read_json<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> AdapterResult<T> {
    let response = ensure_success(operation, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::malformed(operation, e.to_string()).into())
}
