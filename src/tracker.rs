//! Delivery tracker: turns transport outcomes into message status writes.
//!
//! Every write goes through one store transaction per outcome: read the job,
//! apply [`StatusMachine::next`] to the one message, stamp its timestamp,
//! and mark the job `completed` when all of its messages are settled. Events
//! for different messages of the same job race on the same document; the
//! store's conflict retry serialises them.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{RelayError, StoreError};
use crate::gateway::{EventStream, ReportKind, TransportEvent};
use crate::state_machine::{JobStatus, MessageStatus, StatusMachine, Transition, all_settled};
use crate::store::{FieldPatch, JobStore};

/// Which transport reports count, shared by the tracker and the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerPolicy {
    /// Discard delivered reports; jobs complete once every message is sent.
    pub ignore_delivery_reports: bool,
}

/// What happened to one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeReport {
    Applied {
        status: MessageStatus,
        job_completed: bool,
    },
    /// Unknown job or message, a rejected transition, or a discarded report.
    Ignored,
}

pub struct DeliveryTracker {
    store: Arc<dyn JobStore>,
    policy: TrackerPolicy,
}

impl DeliveryTracker {
    pub fn new(store: Arc<dyn JobStore>, policy: TrackerPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> TrackerPolicy {
        self.policy
    }

    /// Apply `outcome` to one message. A transition refused by the status
    /// machine is a successful no-op. With `is_final` the timestamp that
    /// belongs to `outcome` is stamped if it is not set yet.
    pub async fn apply_outcome(
        &self,
        job_id: &str,
        message_id: &str,
        outcome: MessageStatus,
        is_final: bool,
    ) -> Result<OutcomeReport, RelayError> {
        let policy = self.policy;
        let result = self
            .store
            .run_transaction(job_id, &|doc, now| {
                let mut messages = match doc.messages() {
                    Ok(messages) => messages,
                    Err(e) => {
                        debug!(job_id, error = %e, "job messages unreadable, ignoring outcome");
                        return Ok(None);
                    }
                };
                let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
                    debug!(job_id, message_id, "message not in job, ignoring outcome");
                    return Ok(None);
                };
                match StatusMachine::next(message.status, outcome) {
                    Transition::Advance(next) => {
                        message.status = next;
                        if is_final {
                            message.stamp(next, now);
                        }
                    }
                    Transition::Unchanged => return Ok(None),
                    Transition::Rejected { current, requested } => {
                        debug!(job_id, message_id, %current, %requested, "transition rejected");
                        return Ok(None);
                    }
                }

                let mut patch = FieldPatch::new().messages(&messages)?;
                if doc.status() == Some(JobStatus::Processing)
                    && all_settled(&messages, policy.ignore_delivery_reports)
                {
                    patch = patch.status(JobStatus::Completed);
                }
                Ok(Some(patch))
            })
            .await;

        let committed = match result {
            Ok(Some(doc)) => doc,
            Ok(None) => return Ok(OutcomeReport::Ignored),
            Err(StoreError::NotFound(_)) => {
                debug!(job_id, message_id, "job not found, ignoring outcome");
                return Ok(OutcomeReport::Ignored);
            }
            Err(e) => return Err(e.into()),
        };

        let job_completed = committed.status() == Some(JobStatus::Completed);
        debug!(job_id, message_id, status = %outcome, "message status updated");
        if job_completed {
            info!(job_id, "all messages settled, job completed");
        }
        Ok(OutcomeReport::Applied {
            status: outcome,
            job_completed,
        })
    }

    /// Map one transport event onto [`DeliveryTracker::apply_outcome`].
    pub async fn handle_event(&self, event: TransportEvent) -> Result<OutcomeReport, RelayError> {
        let TransportEvent { token, result } = event;
        let (outcome, is_final) = match token.kind {
            ReportKind::Sent if result.is_ok() => {
                (MessageStatus::Sent, self.policy.ignore_delivery_reports)
            }
            ReportKind::Sent => (MessageStatus::ErrorNotSent, false),
            ReportKind::Delivered if self.policy.ignore_delivery_reports => {
                debug!(%token, "delivery reports ignored");
                return Ok(OutcomeReport::Ignored);
            }
            ReportKind::Delivered if result.is_ok() => (MessageStatus::Delivered, true),
            ReportKind::Delivered => {
                warn!(%token, code = result.code(), "delivery report carried a failure code");
                return Ok(OutcomeReport::Ignored);
            }
        };
        debug!(%token, code = result.code(), %outcome, "transport report received");
        self.apply_outcome(&token.job_id, &token.message_id, outcome, is_final)
            .await
    }

    /// Consume transport events until shutdown. Each event is applied on its
    /// own task; on shutdown, events already being applied are allowed to
    /// finish and no new ones are taken.
    pub async fn run(self: Arc<Self>, mut events: EventStream, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("transport event stream closed");
                break;
            };
            let tracker = Arc::clone(&self);
            in_flight.spawn(async move {
                let token = event.token.clone();
                if let Err(e) = tracker.handle_event(event).await {
                    warn!(%token, scope = %e.scope(), error = %e, "dropping transport event");
                }
            });
            while in_flight.try_join_next().is_some() {}
        }
        while in_flight.join_next().await.is_some() {}
        debug!("delivery tracker stopped");
    }
}
