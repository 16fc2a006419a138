//! Test infrastructure for the search adapter.
//!
//! [`MockSearchClient`] is an in-memory engine that keeps documents ordered by
//! `(ts, ordinal)`, hands out scroll tokens and point-in-time ids, and counts
//! every call so tests can assert on lease lifecycles.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use helios_search_adapter::bulk::{BulkItemError, BulkItemResponse, BulkResponseItem};
use helios_search_adapter::client::{TotalHits, TotalRelation};
use helios_search_adapter::{
    AdapterError, AdapterResult, BulkRequest, BulkResponse, KeepAlive, SearchClient, SearchHit,
    SearchRequest, SearchResponse, SharedClient, TransportError,
};

pub const INDEX: &str = "events";

/// One stored document.
#[derive(Debug, Clone)]
pub struct Doc {
    pub id: String,
    pub ts: i64,
    pub ordinal: i64,
}

/// Call counters.
#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub search: usize,
    pub scroll: usize,
    pub open_pit: usize,
    pub clear_scroll: usize,
    pub close_pit: usize,
    pub bulk: usize,
}

impl Calls {
    /// Page requests: cursor searches plus scroll continuations.
    pub fn page_fetches(&self) -> usize {
        self.search + self.scroll
    }

    pub fn releases(&self) -> usize {
        self.clear_scroll + self.close_pit
    }
}

#[derive(Default)]
struct State {
    docs: Vec<Doc>,
    calls: Calls,
    /// Scroll token to (offset, page size).
    scrolls: HashMap<String, (usize, usize)>,
    next_scroll: usize,
    next_pit: usize,
    open_pits: BTreeSet<String>,
    released: Vec<String>,
    requests: Vec<SearchRequest>,
    last_bulk: Option<BulkRequest>,
    fail_fetch_at: Option<usize>,
    stall_fetch_at: Option<usize>,
    fail_open: bool,
    fail_release: bool,
    release_delay: Option<Duration>,
    bulk_failures: BTreeSet<usize>,
}

/// In-memory [`SearchClient`].
#[derive(Clone, Default)]
pub struct MockSearchClient {
    state: Arc<Mutex<State>>,
}

impl MockSearchClient {
    /// A client holding `count` documents `doc-1..=doc-count`, each with `ts = id * 10`.
    pub fn with_docs(count: usize) -> Self {
        let docs = (1..=count)
            .map(|n| Doc {
                id: format!("doc-{}", n),
                ts: n as i64 * 10,
                ordinal: n as i64,
            })
            .collect();
        Self::from_docs(docs)
    }

    /// A client holding `docs`, ordered by `(ts, ordinal)`.
    pub fn from_docs(mut docs: Vec<Doc>) -> Self {
        docs.sort_by_key(|d| (d.ts, d.ordinal));
        let client = Self::default();
        client.state.lock().docs = docs;
        client
    }

    pub fn shared(&self) -> SharedClient {
        Arc::new(self.clone())
    }

    /// Fails the `n`th page request (1-based).
    pub fn fail_fetch_at(&self, n: usize) {
        self.state.lock().fail_fetch_at = Some(n);
    }

    /// Makes the `n`th page request (1-based) never complete.
    pub fn stall_fetch_at(&self, n: usize) {
        self.state.lock().stall_fetch_at = Some(n);
    }

    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }

    pub fn fail_release(&self) {
        self.state.lock().fail_release = true;
    }

    /// Holds every release call for `delay` before the engine records it.
    pub fn delay_release(&self, delay: Duration) {
        self.state.lock().release_delay = Some(delay);
    }

    /// Makes the bulk items at these positions fail.
    pub fn fail_bulk_items(&self, positions: impl IntoIterator<Item = usize>) {
        self.state.lock().bulk_failures.extend(positions);
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().calls.clone()
    }

    /// Lease ids passed to release calls, in call order.
    pub fn released(&self) -> Vec<String> {
        self.state.lock().released.clone()
    }

    /// Point-in-time leases that were opened and not closed.
    pub fn open_pits(&self) -> Vec<String> {
        self.state.lock().open_pits.iter().cloned().collect()
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.state.lock().requests.clone()
    }

    pub fn last_bulk(&self) -> Option<BulkRequest> {
        self.state.lock().last_bulk.clone()
    }

    /// Counts a page request and applies injected failures.
    async fn page_request(&self) -> AdapterResult<()> {
        let (fail, stall) = {
            let state = self.state.lock();
            let n = state.calls.page_fetches();
            (state.fail_fetch_at == Some(n), state.stall_fetch_at == Some(n))
        };
        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(TransportError::UnexpectedStatus {
                operation: "search",
                status: 503,
                body: "injected".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn release_request(&self) {
        let delay = self.state.lock().release_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn hit(doc: &Doc) -> SearchHit {
    SearchHit::new(INDEX, doc.id.clone(), json!({ "id": doc.id, "ts": doc.ts }))
        .with_sort(vec![json!(doc.ts), json!(doc.ordinal)])
}

fn page_of(docs: &[Doc], from: usize, size: usize) -> Vec<SearchHit> {
    docs.iter().skip(from).take(size).map(hit).collect()
}

fn size_of(body: &Value) -> usize {
    body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize
}

#[async_trait]
impl SearchClient for MockSearchClient {
    async fn search(&self, request: SearchRequest) -> AdapterResult<SearchResponse> {
        {
            let mut state = self.state.lock();
            state.calls.search += 1;
            state.requests.push(request.clone());
        }
        self.page_request().await?;

        let mut state = self.state.lock();
        let size = size_of(&request.body);

        if let Some(pit) = request.body.get("pit") {
            let pit_id = pit["id"].as_str().unwrap_or_default().to_string();
            if !state.open_pits.contains(&pit_id) {
                return Err(TransportError::UnexpectedStatus {
                    operation: "search",
                    status: 404,
                    body: format!("no point in time {}", pit_id),
                }
                .into());
            }

            let from = match request.body.get("search_after").and_then(Value::as_array) {
                Some(key) => {
                    let key = (key[0].as_i64().unwrap_or(0), key[1].as_i64().unwrap_or(0));
                    state
                        .docs
                        .iter()
                        .position(|d| (d.ts, d.ordinal) > key)
                        .unwrap_or(state.docs.len())
                }
                None => 0,
            };
            let mut response = SearchResponse::with_hits(page_of(&state.docs, from, size));
            response.pit_id = Some(pit_id);
            return Ok(response);
        }

        if request.scroll.is_some() {
            state.next_scroll += 1;
            let token = format!("scroll-{}", state.next_scroll);
            state.scrolls.insert(token.clone(), (size, size));
            let hits = page_of(&state.docs, 0, size);
            return Ok(SearchResponse::with_hits(hits).with_scroll_id(token));
        }

        let from = request.body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let mut response = SearchResponse::with_hits(page_of(&state.docs, from, size));
        response.hits.total = Some(TotalHits {
            value: state.docs.len() as u64,
            relation: TotalRelation::Eq,
        });
        Ok(response)
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        _keep_alive: KeepAlive,
    ) -> AdapterResult<SearchResponse> {
        self.state.lock().calls.scroll += 1;
        self.page_request().await?;

        let mut state = self.state.lock();
        let Some((offset, size)) = state.scrolls.remove(scroll_id) else {
            return Err(TransportError::UnexpectedStatus {
                operation: "scroll",
                status: 404,
                body: format!("no scroll context {}", scroll_id),
            }
            .into());
        };

        let hits = page_of(&state.docs, offset, size);

        state.next_scroll += 1;
        let token = format!("scroll-{}", state.next_scroll);
        state.scrolls.insert(token.clone(), (offset + hits.len(), size));
        Ok(SearchResponse::with_hits(hits).with_scroll_id(token))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> AdapterResult<()> {
        self.release_request().await;
        let mut state = self.state.lock();
        state.calls.clear_scroll += 1;
        state.released.push(scroll_id.to_string());
        if state.fail_release {
            return Err(TransportError::ConnectionFailed {
                node: "mock".to_string(),
                message: "injected".to_string(),
            }
            .into());
        }
        state.scrolls.remove(scroll_id);
        Ok(())
    }

    async fn open_point_in_time(
        &self,
        _indices: &[String],
        _keep_alive: KeepAlive,
    ) -> AdapterResult<String> {
        let mut state = self.state.lock();
        state.calls.open_pit += 1;
        if state.fail_open {
            return Err(AdapterError::Transport(TransportError::UnexpectedStatus {
                operation: "open_point_in_time",
                status: 404,
                body: "index_not_found_exception".to_string(),
            }));
        }
        state.next_pit += 1;
        let pit_id = format!("pit-{}", state.next_pit);
        state.open_pits.insert(pit_id.clone());
        Ok(pit_id)
    }

    async fn close_point_in_time(&self, pit_id: &str) -> AdapterResult<()> {
        self.release_request().await;
        let mut state = self.state.lock();
        state.calls.close_pit += 1;
        state.released.push(pit_id.to_string());
        if state.fail_release {
            return Err(TransportError::ConnectionFailed {
                node: "mock".to_string(),
                message: "injected".to_string(),
            }
            .into());
        }
        state.open_pits.remove(pit_id);
        Ok(())
    }

    async fn bulk(&self, request: &BulkRequest) -> AdapterResult<BulkResponse> {
        let mut state = self.state.lock();
        state.calls.bulk += 1;
        state.last_bulk = Some(request.clone());

        let mut errors = false;
        let items = request
            .operations
            .iter()
            .enumerate()
            .map(|(position, op)| {
                let id = op
                    .id()
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("generated-{}", position));
                let body = if state.bulk_failures.contains(&position) {
                    errors = true;
                    BulkItemResponse {
                        index: op.target_index().to_string(),
                        id: Some(id.clone()),
                        status: 409,
                        error: Some(BulkItemError {
                            error_type: "version_conflict_engine_exception".to_string(),
                            reason: Some(format!("[{}]: version conflict", id)),
                        }),
                        ..Default::default()
                    }
                } else {
                    BulkItemResponse {
                        index: op.target_index().to_string(),
                        id: Some(id),
                        version: Some(1),
                        seq_no: Some(position as i64),
                        primary_term: Some(1),
                        result: Some("created".to_string()),
                        status: 201,
                        error: None,
                    }
                };
                BulkResponseItem::new(op.kind(), body)
            })
            .collect();

        Ok(BulkResponse {
            took: 3,
            errors,
            items,
        })
    }
}

/// Lets spawned release tasks run.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
