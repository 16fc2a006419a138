//! Bulk writes and reconciliation of bulk responses.
//!
//! A bulk request is a list of heterogeneous [`WriteOperation`]s. The response
//! holds one item per operation, in request order. [`BulkReconciler`] lines the
//! two up and turns the response into a [`BulkOutcome`]:
//!
//! - every item succeeded: one [`BulkItemOutcome`] per operation, in order
//! - any item failed: a [`BulkFailure`] keyed by document id, and nothing else
//!
//! Successful items of a failed batch are not rolled back by the engine. The
//! failure report is what the caller uses to retry the failed subset.

// Operation and response fields mirror the engine's bulk API
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AdapterError, AdapterResult, BulkFailure, BulkItemFailure, TransportError};

/// The kind of a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create or replace a document.
    Index,
    /// Create a document, failing if it exists.
    Create,
    /// Partially update a document.
    Update,
    /// Delete a document.
    Delete,
}

impl OperationKind {
    /// The action name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Index => "index",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index (create or replace) a document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOperation {
    pub index: String,
    /// Document id. The engine generates one when absent.
    pub id: Option<String>,
    pub document: Value,
    /// Optimistic concurrency: expected sequence number.
    pub if_seq_no: Option<i64>,
    /// Optimistic concurrency: expected primary term.
    pub if_primary_term: Option<i64>,
    pub routing: Option<String>,
}

/// Create a document that must not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOperation {
    pub index: String,
    pub id: Option<String>,
    pub document: Value,
    pub routing: Option<String>,
}

/// Partially update an existing document.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub index: String,
    pub id: String,
    /// Partial document merged into the existing one.
    pub doc: Value,
    /// Insert `doc` as-is if the document does not exist.
    pub doc_as_upsert: bool,
    /// Document to insert if the document does not exist.
    pub upsert: Option<Value>,
    pub retry_on_conflict: Option<u32>,
    pub if_seq_no: Option<i64>,
    pub if_primary_term: Option<i64>,
    pub routing: Option<String>,
}

/// Delete a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOperation {
    pub index: String,
    pub id: String,
    pub if_seq_no: Option<i64>,
    pub if_primary_term: Option<i64>,
    pub routing: Option<String>,
}

/// One write in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    Index(IndexOperation),
    Create(CreateOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
}

impl WriteOperation {
    /// Indexes `document` under `id`.
    pub fn index(index: impl Into<String>, id: impl Into<String>, document: Value) -> Self {
        WriteOperation::Index(IndexOperation {
            index: index.into(),
            id: Some(id.into()),
            document,
            if_seq_no: None,
            if_primary_term: None,
            routing: None,
        })
    }

    /// Creates `document` under `id`.
    pub fn create(index: impl Into<String>, id: impl Into<String>, document: Value) -> Self {
        WriteOperation::Create(CreateOperation {
            index: index.into(),
            id: Some(id.into()),
            document,
            routing: None,
        })
    }

    /// Merges `doc` into the document `id`.
    pub fn update(index: impl Into<String>, id: impl Into<String>, doc: Value) -> Self {
        WriteOperation::Update(UpdateOperation {
            index: index.into(),
            id: id.into(),
            doc,
            doc_as_upsert: false,
            upsert: None,
            retry_on_conflict: None,
            if_seq_no: None,
            if_primary_term: None,
            routing: None,
        })
    }

    /// Deletes the document `id`.
    pub fn delete(index: impl Into<String>, id: impl Into<String>) -> Self {
        WriteOperation::Delete(DeleteOperation {
            index: index.into(),
            id: id.into(),
            if_seq_no: None,
            if_primary_term: None,
            routing: None,
        })
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            WriteOperation::Index(_) => OperationKind::Index,
            WriteOperation::Create(_) => OperationKind::Create,
            WriteOperation::Update(_) => OperationKind::Update,
            WriteOperation::Delete(_) => OperationKind::Delete,
        }
    }

    /// Target index.
    pub fn target_index(&self) -> &str {
        match self {
            WriteOperation::Index(op) => &op.index,
            WriteOperation::Create(op) => &op.index,
            WriteOperation::Update(op) => &op.index,
            WriteOperation::Delete(op) => &op.index,
        }
    }

    /// Document id, if the caller supplied one.
    pub fn id(&self) -> Option<&str> {
        match self {
            WriteOperation::Index(op) => op.id.as_deref(),
            WriteOperation::Create(op) => op.id.as_deref(),
            WriteOperation::Update(op) => Some(op.id.as_str()),
            WriteOperation::Delete(op) => Some(op.id.as_str()),
        }
    }

    /// The NDJSON lines for this operation: the action line, then the payload line if any.
    pub fn to_lines(&self) -> Vec<Value> {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), json!(self.target_index()));
        if let Some(id) = self.id() {
            meta.insert("_id".to_string(), json!(id));
        }

        let payload = match self {
            WriteOperation::Index(op) => {
                insert_opt(&mut meta, "routing", op.routing.as_ref());
                insert_opt(&mut meta, "if_seq_no", op.if_seq_no.as_ref());
                insert_opt(&mut meta, "if_primary_term", op.if_primary_term.as_ref());
                Some(op.document.clone())
            }
            WriteOperation::Create(op) => {
                insert_opt(&mut meta, "routing", op.routing.as_ref());
                Some(op.document.clone())
            }
            WriteOperation::Update(op) => {
                insert_opt(&mut meta, "routing", op.routing.as_ref());
                insert_opt(&mut meta, "if_seq_no", op.if_seq_no.as_ref());
                insert_opt(&mut meta, "if_primary_term", op.if_primary_term.as_ref());
                insert_opt(&mut meta, "retry_on_conflict", op.retry_on_conflict.as_ref());

                let mut body = json!({ "doc": op.doc });
                if op.doc_as_upsert {
                    body["doc_as_upsert"] = json!(true);
                }
                if let Some(ref upsert) = op.upsert {
                    body["upsert"] = upsert.clone();
                }
                Some(body)
            }
            WriteOperation::Delete(op) => {
                insert_opt(&mut meta, "routing", op.routing.as_ref());
                insert_opt(&mut meta, "if_seq_no", op.if_seq_no.as_ref());
                insert_opt(&mut meta, "if_primary_term", op.if_primary_term.as_ref());
                None
            }
        };

        let mut action = Map::new();
        action.insert(self.kind().as_str().to_string(), Value::Object(meta));

        let mut lines = vec![Value::Object(action)];
        lines.extend(payload);
        lines
    }
}

fn insert_opt<T: Serialize>(meta: &mut Map<String, Value>, key: &str, value: Option<&T>) {
    if let Some(v) = value {
        meta.insert(key.to_string(), json!(v));
    }
}

/// When written documents become visible to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Do not refresh; documents show up with the next periodic refresh.
    #[default]
    None,
    /// Refresh the affected shards immediately.
    Immediate,
    /// Wait for the next refresh before answering.
    WaitFor,
}

/// A batch of write operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkRequest {
    pub operations: Vec<WriteOperation>,
    pub refresh: RefreshPolicy,
}

impl BulkRequest {
    /// Creates a request with the default refresh policy.
    pub fn new(operations: Vec<WriteOperation>) -> Self {
        Self {
            operations,
            refresh: RefreshPolicy::default(),
        }
    }

    /// Sets the refresh policy.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// All NDJSON lines of the request body, in operation order.
    pub fn body_lines(&self) -> Vec<Value> {
        self.operations
            .iter()
            .flat_map(WriteOperation::to_lines)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A bulk response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    /// Set by the engine when at least one item failed.
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkResponseItem>,
}

/// One item of a bulk response, tagged with its operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkResponseItem {
    Index(BulkItemResponse),
    Create(BulkItemResponse),
    Update(BulkItemResponse),
    Delete(BulkItemResponse),
}

impl BulkResponseItem {
    /// Builds an item of the given kind.
    pub fn new(kind: OperationKind, body: BulkItemResponse) -> Self {
        match kind {
            OperationKind::Index => BulkResponseItem::Index(body),
            OperationKind::Create => BulkResponseItem::Create(body),
            OperationKind::Update => BulkResponseItem::Update(body),
            OperationKind::Delete => BulkResponseItem::Delete(body),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            BulkResponseItem::Index(_) => OperationKind::Index,
            BulkResponseItem::Create(_) => OperationKind::Create,
            BulkResponseItem::Update(_) => OperationKind::Update,
            BulkResponseItem::Delete(_) => OperationKind::Delete,
        }
    }

    pub fn body(&self) -> &BulkItemResponse {
        match self {
            BulkResponseItem::Index(body)
            | BulkResponseItem::Create(body)
            | BulkResponseItem::Update(body)
            | BulkResponseItem::Delete(body) => body,
        }
    }
}

/// Per-item result in a bulk response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BulkItemResponse {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(rename = "_seq_no", default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<i64>,
    #[serde(rename = "_primary_term", default, skip_serializing_if = "Option::is_none")]
    pub primary_term: Option<i64>,
    /// `created`, `updated`, `deleted`, `noop` or `not_found`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

/// Error object of a failed bulk item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of one successful write, for merging back into caller objects.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemOutcome {
    pub kind: OperationKind,
    pub id: String,
    pub index: String,
    pub seq_no: Option<i64>,
    pub primary_term: Option<i64>,
    pub version: Option<i64>,
    pub result: Option<String>,
    /// Always `None` in a [`BulkOutcome::Success`].
    pub failure: Option<BulkItemFailure>,
}

/// Outcome of a reconciled bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome {
    /// Every item succeeded; outcomes are aligned with the request operations.
    Success(Vec<BulkItemOutcome>),
    /// At least one item failed.
    Failure(BulkFailure),
}

impl BulkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BulkOutcome::Success(_))
    }

    /// Converts the outcome into a result, raising the failure.
    pub fn into_result(self) -> AdapterResult<Vec<BulkItemOutcome>> {
        match self {
            BulkOutcome::Success(items) => Ok(items),
            BulkOutcome::Failure(failure) => Err(AdapterError::BulkFailure(failure)),
        }
    }
}

/// Maps a bulk response back onto the operations that produced it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkReconciler;

impl BulkReconciler {
    /// Reconciles `response` against `operations`.
    ///
    /// Errors only when the response cannot be lined up with the request
    /// (wrong item count, wrong operation kind, missing id). Item failures are
    /// reported as [`BulkOutcome::Failure`].
    pub fn reconcile(
        operations: &[WriteOperation],
        response: &BulkResponse,
    ) -> AdapterResult<BulkOutcome> {
        if operations.len() != response.items.len() {
            return Err(AdapterError::BulkResponseMismatch {
                expected: operations.len(),
                actual: response.items.len(),
                message: "item count differs from operation count".to_string(),
            });
        }

        let mut outcomes = Vec::with_capacity(operations.len());
        let mut failures = BTreeMap::new();
        let mut failed = 0;

        for (position, (operation, item)) in operations.iter().zip(&response.items).enumerate() {
            if operation.kind() != item.kind() {
                return Err(AdapterError::BulkResponseMismatch {
                    expected: operations.len(),
                    actual: response.items.len(),
                    message: format!(
                        "item {} is a {} result for a {} operation",
                        position,
                        item.kind(),
                        operation.kind()
                    ),
                });
            }

            let body = item.body();
            let id = body
                .id
                .as_deref()
                .or_else(|| operation.id())
                .map(str::to_owned);

            if let Some(ref error) = body.error {
                let failure = BulkItemFailure {
                    status: body.status,
                    error_type: error.error_type.clone(),
                    reason: error.reason.clone().unwrap_or_default(),
                };
                // Without any id the position is the only handle the caller has.
                let key = id.unwrap_or_else(|| format!("#{}", position));
                failures.insert(key, failure);
                failed += 1;
                continue;
            }

            let id = id.ok_or_else(|| {
                TransportError::malformed("bulk", format!("item {} has no document id", position))
            })?;

            outcomes.push(BulkItemOutcome {
                kind: item.kind(),
                id,
                index: if body.index.is_empty() {
                    operation.target_index().to_string()
                } else {
                    body.index.clone()
                },
                seq_no: body.seq_no,
                primary_term: body.primary_term,
                version: body.version,
                result: body.result.clone(),
                failure: None,
            });
        }

        if failures.is_empty() {
            if response.errors {
                tracing::debug!("Bulk response flagged errors but no item carried one");
            }
            Ok(BulkOutcome::Success(outcomes))
        } else {
            Ok(BulkOutcome::Failure(BulkFailure::with_failed(
                failures,
                failed,
                operations.len(),
            )))
        }
    }
}
