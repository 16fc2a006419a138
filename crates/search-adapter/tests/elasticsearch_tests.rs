//! Elasticsearch client integration tests.
//!
//! Tests that require a running Elasticsearch instance use testcontainers
//! to spin up a real ES instance in Docker.
//!
//! Run with: `cargo test -p helios-search-adapter --features elasticsearch -- --ignored es_integration`

#![cfg(feature = "elasticsearch")]

use helios_search_adapter::backends::elasticsearch::{
    ElasticsearchAuth, ElasticsearchClient, ElasticsearchConfig,
};

// ============================================================================
// Client Configuration Tests (no ES instance required)
// ============================================================================

#[test]
fn test_elasticsearch_config_defaults() {
    let config = ElasticsearchConfig::default();
    assert_eq!(config.nodes, vec!["http://localhost:9200".to_string()]);
    assert_eq!(config.request_timeout_ms, 30000);
    assert!(config.auth.is_none());
}

#[test]
fn test_elasticsearch_config_serialization() {
    let config = ElasticsearchConfig {
        nodes: vec!["http://es1:9200".to_string(), "http://es2:9200".to_string()],
        auth: Some(ElasticsearchAuth::Basic {
            username: "elastic".to_string(),
            password: "changeme".to_string(),
        }),
        ..Default::default()
    };

    let json = serde_json::to_string(&config).unwrap();
    let deserialized: ElasticsearchConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized.nodes, config.nodes);
    assert_eq!(deserialized.primary_node(), "http://es1:9200");
}

#[test]
fn test_client_creation() {
    // Building the client does not connect
    let client = ElasticsearchClient::new(ElasticsearchConfig::default());
    assert!(client.is_ok());
}

// ============================================================================
// Integration Tests (requires Docker for testcontainers)
// ============================================================================

/// Integration tests that require a real Elasticsearch instance via testcontainers.
///
/// Ignored by default; they need Docker.
#[cfg(test)]
mod es_integration {
    use std::sync::Arc;

    use futures::StreamExt;
    use serde_json::json;

    use helios_search_adapter::backends::elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
    use helios_search_adapter::{
        AdapterError, CursorStrategy, Query, RefreshPolicy, SearchAdapterConfig, SearchClient,
        SearchOperations, SortDirective, WriteOperation,
    };

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::elastic_search::ElasticSearch;
    use tokio::sync::OnceCell;

    /// Shared Elasticsearch container reused across all tests in this module.
    struct SharedEs {
        host: String,
        port: u16,
        /// Kept alive for the duration of the test binary; dropped at process exit.
        _container: testcontainers::ContainerAsync<ElasticSearch>,
    }

    static SHARED_ES: OnceCell<SharedEs> = OnceCell::const_new();

    async fn shared_es() -> &'static SharedEs {
        SHARED_ES
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = ElasticSearch::default()
                    .with_env_var("ES_JAVA_OPTS", "-Xms256m -Xmx256m")
                    .with_label("github.run_id", &run_id)
                    .with_startup_timeout(std::time::Duration::from_secs(120))
                    .start()
                    .await
                    .expect("Failed to start Elasticsearch container");

                let port = container
                    .get_host_port_ipv4(9200)
                    .await
                    .expect("Failed to get host port");

                let host = container
                    .get_host()
                    .await
                    .expect("Failed to get host")
                    .to_string();

                SharedEs {
                    host,
                    port,
                    _container: container,
                }
            })
            .await
    }

    /// Creates a client connected to the shared container and a unique index name.
    async fn create_client() -> (Arc<ElasticsearchClient>, String) {
        let es = shared_es().await;
        let config = ElasticsearchConfig {
            nodes: vec![format!("http://{}:{}", es.host, es.port)],
            ..Default::default()
        };
        let client = ElasticsearchClient::new(config).expect("Failed to create client");
        let index = format!("events_{}", uuid::Uuid::new_v4().simple());
        (Arc::new(client), index)
    }

    fn operations(client: Arc<ElasticsearchClient>, strategy: CursorStrategy) -> SearchOperations {
        let config = SearchAdapterConfig::default()
            .with_cursor_strategy(strategy)
            .with_stream_page_size(7)
            .with_refresh(RefreshPolicy::WaitFor);
        SearchOperations::new(client, config)
    }

    async fn seed(ops: &SearchOperations, index: &str, count: usize) {
        let writes = (1..=count)
            .map(|n| {
                WriteOperation::index(
                    index,
                    format!("doc-{:03}", n),
                    json!({ "n": n, "ts": (n / 3) as i64 }),
                )
            })
            .collect();
        ops.bulk(writes).await.expect("seed bulk failed");
    }

    async fn stream_ids(ops: &SearchOperations, query: Query) -> Vec<String> {
        ops.stream(query)
            .unwrap()
            .map(|hit| hit.unwrap().id.unwrap_or_default())
            .collect()
            .await
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_pit_stream_visits_every_document_once() {
        let (client, index) = create_client().await;
        let ops = operations(client, CursorStrategy::PointInTime);
        seed(&ops, &index, 50).await;

        let query = Query::new(&index).with_sort(SortDirective::asc("ts"));
        let mut ids = stream_ids(&ops, query).await;
        assert_eq!(ids.len(), 50);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_scroll_stream_visits_every_document_once() {
        let (client, index) = create_client().await;
        let ops = operations(client, CursorStrategy::Scroll);
        seed(&ops, &index, 23).await;

        let mut ids = stream_ids(&ops, Query::new(&index)).await;
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 23);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_limit_and_paging() {
        let (client, index) = create_client().await;
        let ops = operations(client, CursorStrategy::PointInTime);
        seed(&ops, &index, 20).await;

        let limited = stream_ids(&ops, Query::new(&index).with_limit(9)).await;
        assert_eq!(limited.len(), 9);

        let page = ops
            .search(&Query::new(&index).with_paging(1, 5))
            .await
            .unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page.total(), Some(20));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_bulk_conflict_is_reported() {
        let (client, index) = create_client().await;
        let ops = operations(client, CursorStrategy::PointInTime);
        seed(&ops, &index, 2).await;

        let err = ops
            .bulk(vec![
                WriteOperation::create(&index, "doc-001", json!({ "n": 1 })),
                WriteOperation::create(&index, "doc-new", json!({ "n": 99 })),
            ])
            .await
            .unwrap_err();

        match err {
            AdapterError::BulkFailure(failure) => {
                assert_eq!(failure.failed_ids().collect::<Vec<_>>(), vec!["doc-001"]);
                assert_eq!(failure.failure("doc-001").map(|f| f.status), Some(409));
            }
            other => panic!("expected a bulk failure, got {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_release_after_close_is_tolerated() {
        let (client, index) = create_client().await;
        let ops = operations(client.clone(), CursorStrategy::PointInTime);
        seed(&ops, &index, 1).await;

        let keep_alive = SearchAdapterConfig::default().pit_keep_alive();
        let pit_id = client
            .open_point_in_time(&[index.clone()], keep_alive)
            .await
            .unwrap();
        client.close_point_in_time(&pit_id).await.unwrap();
        // A second close finds nothing to release
        assert!(client.close_point_in_time(&pit_id).await.is_ok());
    }
}
