//! In-process [`JobStore`] used by the CLI and the test suite.
//!
//! Documents live behind a `std::sync::Mutex`; no lock is held across an
//! `.await`. Transactions are optimistic: the body runs against a copy and
//! the commit only lands if the document version is still the one that was
//! read, otherwise the body is re-run. Subscribers receive a fresh snapshot
//! whenever their result set changes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{
    FIELD_CREATED_AT, FIELD_MESSAGES, FIELD_STATUS, FieldPatch, JobDocument, JobQuery, JobStore,
    SnapshotEvent, Subscription, TransactionFn,
};
use crate::error::StoreError;
use crate::state_machine::JobStatus;

/// Attempts per transaction before giving up with [`StoreError::Contention`].
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<String, StoredJob>,
    next_seq: u64,
    subscribers: Vec<Subscriber>,
    unavailable: bool,
    pending_conflicts: u32,
}

struct StoredJob {
    doc: JobDocument,
    version: u64,
    seq: u64,
}

struct Subscriber {
    query: JobQuery,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
    last: Option<Vec<(String, u64)>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a job document and return its store-assigned id.
    ///
    /// `status` defaults to `pending` and `createdAt` to now when absent.
    pub fn insert_job(&self, mut fields: Map<String, Value>) -> String {
        let id = Uuid::new_v4().to_string();
        fields
            .entry(FIELD_STATUS)
            .or_insert_with(|| Value::String(JobStatus::Pending.as_str().to_string()));
        fields
            .entry(FIELD_CREATED_AT)
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            id.clone(),
            StoredJob {
                doc: JobDocument::new(id.clone(), fields),
                version: 1,
                seq,
            },
        );
        inner.notify();
        id
    }

    /// Insert a pending job whose `messages` field holds `messages` verbatim.
    pub fn insert_pending(&self, messages: Value) -> String {
        let mut fields = Map::new();
        fields.insert(FIELD_MESSAGES.to_string(), messages);
        self.insert_job(fields)
    }

    pub fn get(&self, job_id: &str) -> Option<JobDocument> {
        self.lock().jobs.get(job_id).map(|job| job.doc.clone())
    }

    /// Make every read and write fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make the next `count` transaction commits lose to a simulated concurrent writer.
    pub fn inject_conflicts(&self, count: u32) {
        self.lock().pending_conflicts = count;
    }

    /// Push a fault to every open subscription.
    pub fn fail_subscriptions(&self, reason: &str) {
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| {
            sub.tx
                .send(Err(StoreError::Subscription(reason.to_string())))
                .is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }
}

impl Inner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Unavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }

    fn run_query(&self, query: &JobQuery) -> Vec<(&StoredJob, Option<DateTime<Utc>>)> {
        let mut hits: Vec<_> = self
            .jobs
            .values()
            .filter(|job| query.matches(&job.doc))
            .map(|job| (job, job.doc.created_at()))
            .collect();
        hits.sort_by(|(a, a_at), (b, b_at)| a_at.cmp(b_at).then(a.seq.cmp(&b.seq)));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        hits
    }

    fn snapshot(&self, query: &JobQuery) -> Vec<JobDocument> {
        self.run_query(query)
            .into_iter()
            .map(|(job, _)| job.doc.clone())
            .collect()
    }

    // Re-evaluate every live query and push a snapshot where the result changed.
    fn notify(&mut self) {
        let mut subscribers = std::mem::take(&mut self.subscribers);
        subscribers.retain_mut(|sub| {
            let keys: Vec<(String, u64)> = self
                .run_query(&sub.query)
                .into_iter()
                .map(|(job, _)| (job.doc.id.clone(), job.version))
                .collect();
            if sub.last.as_ref() == Some(&keys) {
                return !sub.tx.is_closed();
            }
            sub.last = Some(keys);
            sub.tx.send(Ok(self.snapshot(&sub.query))).is_ok()
        });
        self.subscribers = subscribers;
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn subscribe(&self, query: JobQuery) -> Result<Subscription, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(Subscriber {
            query,
            tx,
            last: None,
        });
        inner.notify();
        Ok(Subscription::new(rx))
    }

    async fn update(&self, job_id: &str, patch: FieldPatch) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        patch.apply_to(&mut job.doc.fields);
        job.version += 1;
        inner.notify();
        Ok(())
    }

    async fn run_transaction(
        &self,
        job_id: &str,
        body: &TransactionFn<'_>,
    ) -> Result<Option<JobDocument>, StoreError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let (snapshot, read_version) = {
                let inner = self.lock();
                inner.check_available()?;
                let job = inner
                    .jobs
                    .get(job_id)
                    .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
                (job.doc.clone(), job.version)
            };

            let Some(patch) = body(&snapshot, Utc::now())? else {
                return Ok(None);
            };

            let mut inner = self.lock();
            inner.check_available()?;
            let simulated_conflict = inner.pending_conflicts > 0;
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            if simulated_conflict {
                job.version += 1;
            }
            if job.version != read_version {
                if simulated_conflict {
                    inner.pending_conflicts -= 1;
                }
                debug!(job_id, attempt, "transaction conflict, retrying");
                continue;
            }
            if patch.is_empty() {
                return Ok(Some(job.doc.clone()));
            }
            patch.apply_to(&mut job.doc.fields);
            job.version += 1;
            let committed = job.doc.clone();
            inner.notify();
            return Ok(Some(committed));
        }
        Err(StoreError::Contention {
            job_id: job_id.to_string(),
            attempts: MAX_TRANSACTION_ATTEMPTS,
        })
    }

    async fn query(&self, query: JobQuery) -> Result<Vec<JobDocument>, StoreError> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner.snapshot(&query))
    }
}
