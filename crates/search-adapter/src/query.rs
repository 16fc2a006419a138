//! The query model consumed by the adapter.
//!
//! A [`Query`] is *bounded* when it is paged or limiting. Bounded queries are
//! answered with a single request. Anything else is *unbounded* and has to go
//! through the cursor engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AdapterError, AdapterResult};

/// Internal per-shard document ordinal used as the point-in-time tie-breaker.
pub const SHARD_DOC_FIELD: &str = "_shard_doc";

/// Index order; the cheapest sort for scroll cursors without an explicit sort.
pub const DOC_ORDER_FIELD: &str = "_doc";

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order (default).
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

impl SortDirection {
    /// The engine's order keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// A sort directive on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// The field to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Ascending sort on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending sort on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Parses a sort value (e.g., "-ts" for descending).
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('-') {
            Some(stripped) => Self::desc(stripped),
            None => Self::asc(s),
        }
    }

    /// Returns true if this directive sorts on the internal document ordinal.
    pub fn is_tie_breaker(&self) -> bool {
        self.field == SHARD_DOC_FIELD
    }

    /// Renders the directive as an engine sort clause.
    pub fn to_json(&self) -> Value {
        let mut clause = Map::new();
        clause.insert(
            self.field.clone(),
            json!({ "order": self.direction.as_str() }),
        );
        Value::Object(clause)
    }
}

/// Paging state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Paging {
    /// No paging: the caller wants every match.
    #[default]
    Unpaged,
    /// A single page of `size` results starting at page number `page` (zero based).
    Paged {
        /// Zero-based page number.
        page: u32,
        /// Page size.
        size: u32,
    },
}

/// A search query against one or more indices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    /// Indices to search.
    pub indices: Vec<String>,

    /// Query clause. `Null` matches every document.
    #[serde(default)]
    pub filter: Value,

    /// Paging parameters.
    #[serde(default)]
    pub paging: Paging,

    /// Maximum number of results to return.
    #[serde(default)]
    pub limit: Option<u32>,

    /// Sort directives, applied in order.
    #[serde(default)]
    pub sort: Vec<SortDirective>,

    /// Batch size for cursor pages. Falls back to the adapter's stream page size.
    #[serde(default)]
    pub fetch_size: Option<u32>,

    /// `_source` fields to return. Empty returns the full source.
    #[serde(default)]
    pub source_includes: Vec<String>,
}

impl Query {
    /// Creates a match-all query over a single index.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            indices: vec![index.into()],
            ..Default::default()
        }
    }

    /// Creates a match-all query over several indices.
    pub fn for_indices<I, S>(indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the query clause.
    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = filter;
        self
    }

    /// Requests a single page.
    pub fn with_paging(mut self, page: u32, size: u32) -> Self {
        self.paging = Paging::Paged { page, size };
        self
    }

    /// Caps the number of results.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Adds a sort directive.
    pub fn with_sort(mut self, sort: SortDirective) -> Self {
        self.sort.push(sort);
        self
    }

    /// Sets the cursor page size.
    pub fn with_fetch_size(mut self, size: u32) -> Self {
        self.fetch_size = Some(size);
        self
    }

    /// Restricts the returned `_source` fields.
    pub fn with_source_includes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_includes = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the query asks for a single page.
    pub fn is_paged(&self) -> bool {
        matches!(self.paging, Paging::Paged { .. })
    }

    /// Returns true if the query caps its result size.
    pub fn is_limiting(&self) -> bool {
        self.limit.is_some()
    }

    /// Returns true if one request can answer the query.
    pub fn is_bounded(&self) -> bool {
        self.is_paged() || self.is_limiting()
    }

    /// Returns true if the sort already carries the internal ordinal tie-breaker.
    pub fn has_tie_breaker(&self) -> bool {
        self.sort.iter().any(SortDirective::is_tie_breaker)
    }

    /// Returns the query with the ordinal tie-breaker appended, unless one is present.
    pub fn with_tie_breaker(mut self) -> Self {
        if !self.has_tie_breaker() {
            self.sort.push(SortDirective::asc(SHARD_DOC_FIELD));
        }
        self
    }

    /// Checks that the query can be sent at all.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.indices.is_empty() {
            return Err(invalid("query has no indices"));
        }
        if let Paging::Paged { size: 0, .. } = self.paging {
            return Err(invalid("page size must be greater than zero"));
        }
        if self.fetch_size == Some(0) {
            return Err(invalid("fetch size must be greater than zero"));
        }
        Ok(())
    }

    /// The query clause, defaulting to match-all.
    pub fn query_clause(&self) -> Value {
        if self.filter.is_null() {
            json!({ "match_all": {} })
        } else {
            self.filter.clone()
        }
    }

    /// The sort clause as an engine sort array.
    pub fn sort_clause(&self) -> Value {
        Value::Array(self.sort.iter().map(SortDirective::to_json).collect())
    }
}

fn invalid(message: &str) -> AdapterError {
    AdapterError::InvalidQuery {
        message: message.to_string(),
    }
}
