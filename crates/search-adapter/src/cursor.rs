//! Cursors over result sets larger than a single response window.
//!
//! A [`Cursor`] is a plain value. [`CursorEngine::advance`] never mutates the
//! cursor it is given; it returns the next cursor alongside the page, and the
//! owner of the stream decides which one to keep. That keeps the state known
//! *before* an in-flight fetch available for release if the fetch is dropped.
//!
//! # Lease lifecycle
//!
//! ```text
//! Idle --open--> Leased --advance(non-empty)--> Leased --advance(empty)--> Exhausted --release--> Closed
//! Leased --advance(error)--> Failing --release--> Closed(failed)
//! Leased --cancel--> Cancelling --release--> Closed(cancelled)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{SearchClient, SearchHit, SharedClient};
use crate::config::{CursorStrategy, KeepAlive, SearchAdapterConfig};
use crate::error::{AdapterError, AdapterResult};
use crate::fetcher::PageFetcher;
use crate::query::Query;

/// Sort values of the last hit of a page: the continue-from position.
///
/// Values are opaque and compared by the engine in sort-clause order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortKey(Vec<Value>);

impl SortKey {
    /// Creates a sort key from sort values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Returns the sort values.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Renders the key as a `search_after` array.
    pub fn to_json(&self) -> Value {
        Value::Array(self.0.clone())
    }
}

/// Scroll cursor state.
///
/// Every scroll page yields a new token. Only the most recent token is kept,
/// and only that one is released.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollCursor {
    /// Current token; `None` until the first page has been requested.
    pub scroll_id: Option<String>,
    /// Keep-alive sent with every page request.
    pub keep_alive: KeepAlive,
}

/// Point-in-time cursor state.
#[derive(Debug, Clone, PartialEq)]
pub struct PitCursor {
    /// Lease id. Stays the same for the whole stream.
    pub pit_id: String,
    /// Keep-alive sent with every page request.
    pub keep_alive: KeepAlive,
    /// Sort key of the last hit seen so far.
    pub search_after: Option<SortKey>,
}

/// Progress through a matching document set.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    /// Legacy scroll-token cursor.
    Scroll(ScrollCursor),
    /// Point-in-time lease with `search_after` paging.
    PointInTime(PitCursor),
    /// Released. Releasing again is a no-op.
    Closed,
}

impl Cursor {
    /// Returns true once the cursor has been released.
    pub fn is_closed(&self) -> bool {
        matches!(self, Cursor::Closed)
    }

    /// The server-side lease id, if one is held.
    pub fn lease_id(&self) -> Option<&str> {
        match self {
            Cursor::Scroll(scroll) => scroll.scroll_id.as_deref(),
            Cursor::PointInTime(pit) => Some(pit.pit_id.as_str()),
            Cursor::Closed => None,
        }
    }

    /// The continue-from key of a point-in-time cursor.
    pub fn search_after(&self) -> Option<&SortKey> {
        match self {
            Cursor::PointInTime(pit) => pit.search_after.as_ref(),
            _ => None,
        }
    }
}

/// One page of hits.
#[derive(Debug, Clone, Default)]
pub struct Page {
    hits: Vec<SearchHit>,
    cursor: Option<Cursor>,
    total: Option<u64>,
}

impl Page {
    /// Creates a page without cursor state.
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            cursor: None,
            total: None,
        }
    }

    /// Attaches the cursor state for the next fetch.
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Attaches the total hit count.
    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total = total;
        self
    }

    /// The hits in response order.
    pub fn hits(&self) -> &[SearchHit] {
        &self.hits
    }

    /// Consumes the page, returning its hits.
    pub fn into_hits(self) -> Vec<SearchHit> {
        self.hits
    }

    /// Cursor state for the next fetch, if this page came from a cursor.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Total hit count, when the engine reported one.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Number of hits.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// An empty page signals exhaustion.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// How a lease ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The cursor ran out of hits.
    Completed,
    /// A fetch failed.
    Failed,
    /// The consumer stopped early.
    Cancelled,
}

/// Lifecycle state of a stream's lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Nothing opened yet.
    Idle,
    /// Lease held, more pages may follow.
    Leased,
    /// Empty page seen, release pending.
    Exhausted,
    /// Fetch failed, release pending.
    Failing,
    /// Consumer stopped, release pending.
    Cancelling,
    /// Released.
    Closed(CloseReason),
}

/// Events driving [`LeaseState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent {
    /// The cursor was opened.
    Opened,
    /// A page came back.
    PageFetched {
        /// Whether the page had no hits.
        empty: bool,
    },
    /// Opening or fetching failed.
    FetchFailed,
    /// The consumer stopped consuming.
    Cancelled,
    /// Release was issued.
    Released,
}

impl LeaseState {
    /// Applies an event. Returns `None` for transitions the lifecycle does not allow.
    pub fn on(self, event: LeaseEvent) -> Option<LeaseState> {
        use LeaseEvent::*;
        use LeaseState::*;

        match (self, event) {
            (Idle, Opened) => Some(Leased),
            (Idle | Leased, FetchFailed) => Some(Failing),
            (Idle | Leased, Cancelled) => Some(Cancelling),
            (Leased, PageFetched { empty: false }) => Some(Leased),
            (Leased, PageFetched { empty: true }) => Some(Exhausted),
            (Exhausted, Released) => Some(Closed(CloseReason::Completed)),
            (Failing, Released) => Some(Closed(CloseReason::Failed)),
            (Cancelling, Released) => Some(Closed(CloseReason::Cancelled)),
            _ => None,
        }
    }

    /// Returns true once the lease has been released.
    pub fn is_closed(&self) -> bool {
        matches!(self, LeaseState::Closed(_))
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseState::Idle => write!(f, "idle"),
            LeaseState::Leased => write!(f, "leased"),
            LeaseState::Exhausted => write!(f, "exhausted"),
            LeaseState::Failing => write!(f, "failing"),
            LeaseState::Cancelling => write!(f, "cancelling"),
            LeaseState::Closed(CloseReason::Completed) => write!(f, "closed"),
            LeaseState::Closed(CloseReason::Failed) => write!(f, "closed(error)"),
            LeaseState::Closed(CloseReason::Cancelled) => write!(f, "closed(cancelled)"),
        }
    }
}

/// Outcome of a release call. Release never fails the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAck {
    /// The engine acknowledged the release.
    Released,
    /// The cursor was already closed; nothing was sent.
    AlreadyClosed,
    /// No server-side lease existed yet; nothing was sent.
    NotLeased,
    /// The release call failed. The lease expires with its keep-alive.
    Failed,
}

/// Opens, advances and releases cursors.
#[derive(Clone)]
pub struct CursorEngine {
    client: SharedClient,
    fetcher: PageFetcher,
    strategy: CursorStrategy,
    scroll_keep_alive: KeepAlive,
    pit_keep_alive: KeepAlive,
}

impl fmt::Debug for CursorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorEngine")
            .field("strategy", &self.strategy)
            .field("scroll_keep_alive", &self.scroll_keep_alive)
            .field("pit_keep_alive", &self.pit_keep_alive)
            .finish_non_exhaustive()
    }
}

impl CursorEngine {
    /// Creates an engine using the configured cursor strategy.
    pub fn new(client: SharedClient, config: &SearchAdapterConfig) -> Self {
        Self {
            fetcher: PageFetcher::new(client.clone(), config.stream_page_size),
            client,
            strategy: config.cursor_strategy,
            scroll_keep_alive: config.scroll_keep_alive(),
            pit_keep_alive: config.pit_keep_alive(),
        }
    }

    /// The cursor variant this engine opens.
    pub fn strategy(&self) -> CursorStrategy {
        self.strategy
    }

    /// Opens a cursor for `query`.
    ///
    /// Point-in-time cursors open their lease here and return the query with
    /// the ordinal tie-breaker appended. Scroll cursors get their first token
    /// from the first page request, so nothing is sent yet.
    pub async fn open(&self, query: &Query) -> AdapterResult<(Cursor, Query)> {
        query.validate()?;

        match self.strategy {
            CursorStrategy::Scroll => Ok((
                Cursor::Scroll(ScrollCursor {
                    scroll_id: None,
                    keep_alive: self.scroll_keep_alive,
                }),
                query.clone(),
            )),
            CursorStrategy::PointInTime => {
                let pit_id = self
                    .client
                    .open_point_in_time(&query.indices, self.pit_keep_alive)
                    .await?;

                tracing::debug!(
                    indices = ?query.indices,
                    pit_id = %pit_id,
                    keep_alive = %self.pit_keep_alive,
                    "Opened point-in-time lease"
                );

                Ok((
                    Cursor::PointInTime(PitCursor {
                        pit_id,
                        keep_alive: self.pit_keep_alive,
                        search_after: None,
                    }),
                    query.clone().with_tie_breaker(),
                ))
            }
        }
    }

    /// Fetches the next page and returns it with the cursor for the fetch after it.
    ///
    /// An empty page means the cursor is exhausted; do not advance it again.
    pub async fn advance(&self, cursor: &Cursor, query: &Query) -> AdapterResult<(Page, Cursor)> {
        if cursor.is_closed() {
            return Err(AdapterError::CursorClosed);
        }

        let page = self.fetcher.fetch_page(cursor, query).await?;
        let next = page.cursor().cloned().unwrap_or_else(|| cursor.clone());

        tracing::debug!(
            hits = page.len(),
            lease = next.lease_id().unwrap_or("-"),
            "Advanced cursor"
        );

        Ok((page, next))
    }

    /// Releases the cursor's server-side lease.
    ///
    /// Failures are logged and reported as [`ReleaseAck::Failed`], never raised.
    pub async fn release(&self, cursor: &Cursor) -> ReleaseAck {
        release_lease(self.client.as_ref(), cursor).await
    }
}

/// Releases whatever lease `cursor` holds.
pub(crate) async fn release_lease(client: &dyn SearchClient, cursor: &Cursor) -> ReleaseAck {
    let result = match cursor {
        Cursor::Closed => return ReleaseAck::AlreadyClosed,
        Cursor::Scroll(ScrollCursor {
            scroll_id: None, ..
        }) => return ReleaseAck::NotLeased,
        Cursor::Scroll(ScrollCursor {
            scroll_id: Some(scroll_id),
            ..
        }) => client.clear_scroll(scroll_id).await,
        Cursor::PointInTime(pit) => client.close_point_in_time(&pit.pit_id).await,
    };

    let lease = cursor.lease_id().unwrap_or("-");
    match result {
        Ok(()) => {
            tracing::debug!(lease = %lease, "Released cursor lease");
            ReleaseAck::Released
        }
        Err(e) => {
            tracing::warn!(
                lease = %lease,
                error = %e,
                "Failed to release cursor lease; it will expire with its keep-alive"
            );
            ReleaseAck::Failed
        }
    }
}
