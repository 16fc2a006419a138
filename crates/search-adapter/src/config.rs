//! Adapter configuration.
//!
//! Connection settings live with the client implementation (see
//! `backends::elasticsearch::ElasticsearchConfig`). This module holds the
//! settings that drive cursor streaming and bulk writes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bulk::RefreshPolicy;

/// Which cursor variant unbounded queries use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStrategy {
    /// Legacy scroll cursors: every page returns a new scroll token.
    Scroll,
    /// Point-in-time lease with `search_after` paging.
    #[default]
    PointInTime,
}

impl fmt::Display for CursorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorStrategy::Scroll => write!(f, "scroll"),
            CursorStrategy::PointInTime => write!(f, "point_in_time"),
        }
    }
}

/// Lease keep-alive sent with every cursor request.
///
/// The server-side keep-alive is the only timeout that applies to a cursor.
/// The adapter never renews a lease on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive(Duration);

impl KeepAlive {
    /// Creates a keep-alive of the given duration.
    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Returns the keep-alive duration.
    pub const fn duration(&self) -> Duration {
        self.0
    }

    /// Renders the keep-alive in the engine's time unit syntax
    /// (`"5m"`, `"30s"`, `"1500ms"`).
    pub fn as_param(&self) -> String {
        let millis = self.0.as_millis();
        if millis == 0 {
            return "0ms".to_string();
        }
        if millis % 3_600_000 == 0 {
            format!("{}h", millis / 3_600_000)
        } else if millis % 60_000 == 0 {
            format!("{}m", millis / 60_000)
        } else if millis % 1_000 == 0 {
            format!("{}s", millis / 1_000)
        } else {
            format!("{}ms", millis)
        }
    }
}

impl fmt::Display for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_param())
    }
}

impl From<Duration> for KeepAlive {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

/// Configuration for cursor streaming and bulk writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAdapterConfig {
    /// Cursor variant used for unbounded queries (default: point-in-time).
    #[serde(default)]
    pub cursor_strategy: CursorStrategy,

    /// Keep-alive for scroll cursors (default: 1m).
    #[serde(with = "humantime_serde", default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: Duration,

    /// Keep-alive for point-in-time leases (default: 5m).
    #[serde(with = "humantime_serde", default = "default_pit_keep_alive")]
    pub pit_keep_alive: Duration,

    /// Page size used when a streamed query sets no fetch size (default: 500).
    #[serde(default = "default_stream_page_size")]
    pub stream_page_size: u32,

    /// Refresh policy applied to bulk requests (default: none).
    #[serde(default)]
    pub refresh: RefreshPolicy,
}

fn default_scroll_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_pit_keep_alive() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_stream_page_size() -> u32 {
    500
}

impl Default for SearchAdapterConfig {
    fn default() -> Self {
        Self {
            cursor_strategy: CursorStrategy::default(),
            scroll_keep_alive: default_scroll_keep_alive(),
            pit_keep_alive: default_pit_keep_alive(),
            stream_page_size: default_stream_page_size(),
            refresh: RefreshPolicy::default(),
        }
    }
}

impl SearchAdapterConfig {
    /// Sets the cursor strategy.
    pub fn with_cursor_strategy(mut self, strategy: CursorStrategy) -> Self {
        self.cursor_strategy = strategy;
        self
    }

    /// Sets the stream page size.
    pub fn with_stream_page_size(mut self, size: u32) -> Self {
        self.stream_page_size = size;
        self
    }

    /// Sets the bulk refresh policy.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Keep-alive for scroll cursors.
    pub fn scroll_keep_alive(&self) -> KeepAlive {
        KeepAlive::new(self.scroll_keep_alive)
    }

    /// Keep-alive for point-in-time leases.
    pub fn pit_keep_alive(&self) -> KeepAlive {
        KeepAlive::new(self.pit_keep_alive)
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
