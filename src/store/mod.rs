//! Remote job store interface.
//!
//! The store is a document database holding one document per job. This
//! engine needs four operations from it: a live filtered subscription, a point
//! update, a read-modify-write transaction and a one-shot query. The store,
//! not the caller, retries a transaction when a concurrent writer committed
//! first; callers see either the committed document or an error.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::state_machine::{JobStatus, Message};

pub use memory::MemoryJobStore;

pub const FIELD_STATUS: &str = "status";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_MESSAGES: &str = "messages";

/// A job document as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDocument {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl JobDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// `None` when the field is missing or holds an unknown value.
    pub fn status(&self) -> Option<JobStatus> {
        self.fields
            .get(FIELD_STATUS)
            .and_then(Value::as_str)
            .and_then(JobStatus::parse)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get(FIELD_CREATED_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The `messages` field exactly as stored.
    pub fn raw_messages(&self) -> Option<&Value> {
        self.fields.get(FIELD_MESSAGES)
    }

    /// The `messages` field decoded as expanded messages. A missing field
    /// decodes as an empty list.
    pub fn messages(&self) -> Result<Vec<Message>, serde_json::Error> {
        match self.raw_messages() {
            Some(value) => Vec::<Message>::deserialize(value),
            None => Ok(Vec::new()),
        }
    }
}

/// Top-level field assignments applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPatch {
    fields: Map<String, Value>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.set(FIELD_STATUS, Value::String(status.as_str().to_string()))
    }

    pub fn messages(self, messages: &[Message]) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(messages)?;
        Ok(self.set(FIELD_MESSAGES, value))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Write every assignment into `target`, replacing existing values.
    pub fn apply_to(&self, target: &mut Map<String, Value>) {
        for (field, value) in &self.fields {
            target.insert(field.clone(), value.clone());
        }
    }
}

/// Equality filter on job status, ordered by `createdAt` ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQuery {
    pub status: JobStatus,
    pub limit: Option<usize>,
}

impl JobQuery {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            limit: None,
        }
    }

    /// The query the job watcher listens on: the single oldest pending job.
    pub fn oldest_pending() -> Self {
        Self {
            status: JobStatus::Pending,
            limit: Some(1),
        }
    }

    pub fn matches(&self, doc: &JobDocument) -> bool {
        doc.status() == Some(self.status)
    }
}

/// One notification on a live subscription.
pub type SnapshotEvent = Result<Vec<JobDocument>, StoreError>;

/// A live query. Dropping it, or calling [`Subscription::release`], detaches it
/// from the store.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SnapshotEvent>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<SnapshotEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next snapshot. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.rx.recv().await
    }

    pub fn release(mut self) {
        self.rx.close();
    }
}

/// Read-modify-write body of a transaction.
///
/// Called with the current document and the store's commit clock. Returning
/// `Ok(None)` ends the transaction without writing. The store may call it more
/// than once when a concurrent writer wins the race.
pub type TransactionFn<'a> =
    dyn Fn(&JobDocument, DateTime<Utc>) -> Result<Option<FieldPatch>, StoreError> + Send + Sync + 'a;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Open a live query. The first snapshot arrives right away; later ones
    /// follow every change to the result set.
    async fn subscribe(&self, query: JobQuery) -> Result<Subscription, StoreError>;

    async fn update(&self, job_id: &str, patch: FieldPatch) -> Result<(), StoreError>;

    /// Run `body` against the latest document and commit its patch atomically,
    /// retrying on write conflicts. Returns the committed document, or `None`
    /// when `body` chose not to write.
    async fn run_transaction(
        &self,
        job_id: &str,
        body: &TransactionFn<'_>,
    ) -> Result<Option<JobDocument>, StoreError>;

    async fn query(&self, query: JobQuery) -> Result<Vec<JobDocument>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> JobDocument {
        match fields {
            Value::Object(map) => JobDocument::new("j1", map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn document_accessors() {
        let d = doc(json!({
            "status": "processing",
            "createdAt": "2026-01-02T03:04:05Z",
            "messages": [{"id": "msg_1_0", "phone": "555", "message": "hi", "status": "sent"}]
        }));
        assert_eq!(d.status(), Some(JobStatus::Processing));
        assert_eq!(d.created_at().unwrap().to_rfc3339(), "2026-01-02T03:04:05+00:00");
        let messages = d.messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "hi");
    }

    #[test]
    fn unknown_status_reads_as_none() {
        let d = doc(json!({"status": "archived"}));
        assert_eq!(d.status(), None);
        assert!(d.messages().unwrap().is_empty());
    }

    #[test]
    fn patch_applies_top_level_fields() {
        let mut target = Map::new();
        target.insert("status".into(), json!("pending"));
        target.insert("owner".into(), json!("ops"));
        FieldPatch::new()
            .status(JobStatus::Processing)
            .apply_to(&mut target);
        assert_eq!(target["status"], "processing");
        assert_eq!(target["owner"], "ops");
    }

    #[test]
    fn oldest_pending_query_shape() {
        let q = JobQuery::oldest_pending();
        assert_eq!(q.status, JobStatus::Pending);
        assert_eq!(q.limit, Some(1));
        assert!(q.matches(&doc(json!({"status": "pending"}))));
        assert!(!q.matches(&doc(json!({"status": "processing"}))));
    }
}
