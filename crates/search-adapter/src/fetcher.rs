//! One page request per cursor advance.
//!
//! [`PageFetcher`] turns (cursor, query) into exactly one round trip and the
//! cursor state that follows from the response. It does not retry; errors go
//! back to the stream, which owns cleanup.

use std::fmt;

use serde_json::{Value, json};

use crate::client::{SearchRequest, SearchResponse, SharedClient};
use crate::cursor::{Cursor, Page, PitCursor, ScrollCursor};
use crate::error::{AdapterError, AdapterResult, TransportError};
use crate::query::{DOC_ORDER_FIELD, Paging, Query, SortDirective};

/// Issues page requests through the client.
#[derive(Clone)]
pub struct PageFetcher {
    client: SharedClient,
    default_fetch_size: u32,
}

impl fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFetcher")
            .field("default_fetch_size", &self.default_fetch_size)
            .finish_non_exhaustive()
    }
}

impl PageFetcher {
    /// Creates a fetcher. `default_fetch_size` applies to queries without a fetch size.
    pub fn new(client: SharedClient, default_fetch_size: u32) -> Self {
        Self {
            client,
            default_fetch_size: default_fetch_size.max(1),
        }
    }

    /// Fetches the page that follows `cursor`.
    pub async fn fetch_page(&self, cursor: &Cursor, query: &Query) -> AdapterResult<Page> {
        let size = self.page_size(query);

        match cursor {
            Cursor::Scroll(scroll) => self.fetch_scroll_page(scroll, query, size).await,
            Cursor::PointInTime(pit) => self.fetch_pit_page(pit, query, size).await,
            Cursor::Closed => Err(AdapterError::CursorClosed),
        }
    }

    /// Answers a bounded query with a single request. No lease is involved.
    pub async fn fetch_bounded(&self, query: &Query) -> AdapterResult<Page> {
        query.validate()?;

        let request = SearchRequest {
            indices: query.indices.clone(),
            body: bounded_body(query, self.default_fetch_size),
            scroll: None,
        };
        let response = self.client.search(request).await?;
        let total = response.total();

        Ok(Page::new(response.hits.hits).with_total(total))
    }

    async fn fetch_scroll_page(
        &self,
        scroll: &ScrollCursor,
        query: &Query,
        size: u32,
    ) -> AdapterResult<Page> {
        let response = match &scroll.scroll_id {
            None => {
                let request = SearchRequest {
                    indices: query.indices.clone(),
                    body: scroll_body(query, size),
                    scroll: Some(scroll.keep_alive),
                };
                self.client.search(request).await?
            }
            Some(scroll_id) => self.client.scroll(scroll_id, scroll.keep_alive).await?,
        };

        // The engine hands out a new token per page; the previous one is superseded.
        let scroll_id = match (response.scroll_id.clone(), &scroll.scroll_id) {
            (Some(next), _) => next,
            (None, Some(current)) => current.clone(),
            (None, None) => {
                return Err(TransportError::malformed("search", "missing _scroll_id").into());
            }
        };

        let next = Cursor::Scroll(ScrollCursor {
            scroll_id: Some(scroll_id),
            keep_alive: scroll.keep_alive,
        });
        Ok(into_page(response, next))
    }

    async fn fetch_pit_page(
        &self,
        pit: &PitCursor,
        query: &Query,
        size: u32,
    ) -> AdapterResult<Page> {
        let request = SearchRequest {
            indices: Vec::new(),
            body: pit_body(query, pit, size),
            scroll: None,
        };
        let response = self.client.search(request).await?;

        let search_after = match response.hits().last() {
            None => pit.search_after.clone(),
            Some(last) => Some(last.sort_key().ok_or_else(|| {
                TransportError::malformed("search", "point-in-time hit without sort values")
            })?),
        };

        let next = Cursor::PointInTime(PitCursor {
            pit_id: pit.pit_id.clone(),
            keep_alive: pit.keep_alive,
            search_after,
        });
        Ok(into_page(response, next))
    }

    fn page_size(&self, query: &Query) -> u32 {
        let size = query.fetch_size.unwrap_or(self.default_fetch_size);
        match query.limit {
            Some(limit) if limit > 0 => size.min(limit),
            _ => size,
        }
    }
}

fn into_page(response: SearchResponse, next: Cursor) -> Page {
    let total = response.total();
    Page::new(response.hits.hits)
        .with_cursor(next)
        .with_total(total)
}

/// Body of the request that opens a scroll cursor.
pub(crate) fn scroll_body(query: &Query, size: u32) -> Value {
    let sort = if query.sort.is_empty() {
        json!([SortDirective::asc(DOC_ORDER_FIELD).to_json()])
    } else {
        query.sort_clause()
    };

    let mut body = base_body(query);
    body["size"] = json!(size);
    body["sort"] = sort;
    body
}

/// Body of a point-in-time page request.
pub(crate) fn pit_body(query: &Query, pit: &PitCursor, size: u32) -> Value {
    let mut body = base_body(query);
    body["size"] = json!(size);
    body["sort"] = query.sort_clause();
    body["pit"] = json!({
        "id": pit.pit_id,
        "keep_alive": pit.keep_alive.as_param(),
    });
    body["track_total_hits"] = json!(false);

    if let Some(ref key) = pit.search_after {
        body["search_after"] = key.to_json();
    }
    body
}

/// Body of a single bounded request: `from`/`size` derived from paging, capped by the limit.
pub(crate) fn bounded_body(query: &Query, default_size: u32) -> Value {
    let (from, size) = match query.paging {
        Paging::Paged { page, size } => (u64::from(page) * u64::from(size), u64::from(size)),
        Paging::Unpaged => (0, u64::from(query.limit.unwrap_or(default_size))),
    };
    let size = match query.limit {
        Some(limit) => size.min(u64::from(limit).saturating_sub(from)),
        None => size,
    };

    let mut body = base_body(query);
    body["from"] = json!(from);
    body["size"] = json!(size);
    body["track_total_hits"] = json!(true);
    if !query.sort.is_empty() {
        body["sort"] = query.sort_clause();
    }
    body
}

fn base_body(query: &Query) -> Value {
    let mut body = json!({
        "query": query.query_clause(),
        "seq_no_primary_term": true,
        "version": true,
    });
    if !query.source_includes.is_empty() {
        body["_source"] = json!({ "includes": query.source_includes });
    }
    body
}
