//! Lazy document streams bound to a cursor lease.
//!
//! [`DocumentStream`] opens its cursor on first poll, fetches one page at a
//! time and releases the lease exactly once. All three ways out share a single
//! [`LeaseGuard`]:
//!
//! - exhaustion: the empty page is followed by an awaited release
//! - fetch error: release is awaited, then the error is yielded
//! - cancellation: dropping the stream drops the guard, which spawns the release
//!
//! A stream is single-use. Iterating again means building a new stream, which
//! opens a new lease.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::stream;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::client::SearchHit;
use crate::cursor::{Cursor, CursorEngine, LeaseEvent, LeaseState, Page, ReleaseAck};
use crate::error::{AdapterError, AdapterResult};
use crate::fetcher::PageFetcher;
use crate::query::Query;

/// Owns a cursor for the lifetime of a stream and guarantees its release.
///
/// The guard only ever replaces its cursor after a fetch completes, so if a
/// fetch is dropped mid-flight the release uses the state from before it.
pub struct LeaseGuard {
    engine: CursorEngine,
    cursor: Option<Cursor>,
    state: LeaseState,
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LeaseGuard {
    /// Creates an idle guard.
    pub fn new(engine: CursorEngine) -> Self {
        Self {
            engine,
            cursor: None,
            state: LeaseState::Idle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// Current cursor, if one was opened.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Opens the cursor and returns the query bound to it.
    pub async fn open(&mut self, query: &Query) -> AdapterResult<Query> {
        match self.engine.open(query).await {
            Ok((cursor, bound)) => {
                self.cursor = Some(cursor);
                self.transition(LeaseEvent::Opened);
                Ok(bound)
            }
            Err(e) => {
                self.transition(LeaseEvent::FetchFailed);
                Err(e)
            }
        }
    }

    /// Fetches the next page and keeps the cursor it returns.
    pub async fn advance(&mut self, query: &Query) -> AdapterResult<Page> {
        let Some(cursor) = self.cursor.as_ref() else {
            return Err(AdapterError::CursorClosed);
        };

        let result = self.engine.advance(cursor, query).await;
        match result {
            Ok((page, next)) => {
                self.cursor = Some(next);
                self.transition(LeaseEvent::PageFetched {
                    empty: page.is_empty(),
                });
                Ok(page)
            }
            Err(e) => {
                self.transition(LeaseEvent::FetchFailed);
                Err(e)
            }
        }
    }

    /// Marks the lease as abandoned by the consumer.
    pub fn cancel(&mut self) {
        self.transition(LeaseEvent::Cancelled);
    }

    /// Releases the lease. Later calls, and the guard's drop, do nothing.
    ///
    /// Inside a Tokio runtime the release runs as its own task, so it still
    /// completes if this future is dropped before the engine answers.
    pub async fn release(&mut self) -> ReleaseAck {
        // Swap first: a release dropped mid-flight must not be repeated on drop.
        let ack = match self.cursor.replace(Cursor::Closed) {
            Some(cursor) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let engine = self.engine.clone();
                    let task = handle.spawn(async move { engine.release(&cursor).await });
                    task.await.unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "Lease release task did not complete");
                        ReleaseAck::Failed
                    })
                }
                Err(_) => self.engine.release(&cursor).await,
            },
            None => ReleaseAck::NotLeased,
        };
        self.transition(LeaseEvent::Released);
        ack
    }

    fn transition(&mut self, event: LeaseEvent) {
        match self.state.on(event) {
            Some(next) => {
                tracing::debug!(from = %self.state, to = %next, "Lease state transition");
                self.state = next;
            }
            None => {
                tracing::debug!(state = %self.state, ?event, "Ignored lease event");
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(cursor) = self.cursor.take() else {
            return;
        };
        let Some(lease) = cursor.lease_id().map(str::to_owned) else {
            return;
        };

        self.transition(LeaseEvent::Cancelled);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = self.engine.clone();
                handle.spawn(async move {
                    engine.release(&cursor).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    lease = %lease,
                    "Cursor dropped outside a Tokio runtime; lease will expire with its keep-alive"
                );
            }
        }
    }
}

/// A lazy, finite, single-use sequence of hits.
#[must_use = "streams do nothing unless polled"]
pub struct DocumentStream {
    inner: BoxStream<'static, AdapterResult<SearchHit>>,
}

impl fmt::Debug for DocumentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStream").finish_non_exhaustive()
    }
}

impl DocumentStream {
    /// Streams every match of `query` through a cursor lease.
    ///
    /// A limiting query stops after `limit` hits and releases early.
    pub fn scoped(engine: CursorEngine, query: Query) -> Self {
        let limit = query.limit.map(u64::from);
        if limit == Some(0) {
            return Self::empty();
        }

        let inner = stream! {
            let mut guard = LeaseGuard::new(engine);

            let bound = match guard.open(&query).await {
                Ok(bound) => bound,
                Err(e) => {
                    guard.release().await;
                    yield Err(e);
                    return;
                }
            };

            let mut remaining = limit;
            loop {
                let page = match guard.advance(&bound).await {
                    Ok(page) => page,
                    Err(e) => {
                        guard.release().await;
                        yield Err(e);
                        return;
                    }
                };

                if page.is_empty() {
                    guard.release().await;
                    return;
                }

                for hit in page.into_hits() {
                    yield Ok(hit);

                    if let Some(left) = remaining.as_mut() {
                        *left = left.saturating_sub(1);
                        if *left == 0 {
                            guard.cancel();
                            guard.release().await;
                            return;
                        }
                    }
                }
            }
        };

        Self {
            inner: inner.boxed(),
        }
    }

    /// Streams the single page of a bounded query. No lease is opened.
    pub fn bounded(fetcher: PageFetcher, query: Query) -> Self {
        let inner = stream! {
            match fetcher.fetch_bounded(&query).await {
                Ok(page) => {
                    for hit in page.into_hits() {
                        yield Ok(hit);
                    }
                }
                Err(e) => yield Err(e),
            }
        };

        Self {
            inner: inner.boxed(),
        }
    }

    /// A stream with no hits.
    pub fn empty() -> Self {
        Self {
            inner: futures::stream::empty().boxed(),
        }
    }

    /// Maps every hit's `_source` into `T`.
    pub fn into_documents<T>(self) -> BoxStream<'static, AdapterResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.map(|hit| hit.and_then(|hit| hit.deserialize_source()))
            .boxed()
    }
}

impl Stream for DocumentStream {
    type Item = AdapterResult<SearchHit>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
