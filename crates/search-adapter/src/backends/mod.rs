//! Search engine client implementations.
//!
//! Each backend implements [`crate::client::SearchClient`] and is gated
//! behind a feature flag.
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Elasticsearch | `elasticsearch` | Scroll, point-in-time and bulk over HTTP |

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
