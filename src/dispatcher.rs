//! Message dispatcher: expands a claimed job into messages and hands them to
//! the transport.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{RelayError, StoreError};
use crate::gateway::{CallbackToken, TransportGateway};
use crate::state_machine::{JobStatus, Message, MessageStatus, RawMessage, all_settled};
use crate::store::{FieldPatch, JobStore};
use crate::tracker::DeliveryTracker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Store messages as `sent` at expansion instead of `pending`.
    pub optimistic_sent_on_dispatch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// The job payload could not be parsed; the job is now `error_malformed_data`.
    Malformed { reason: String },
    /// The job left `processing` (or vanished) before expansion.
    Skipped,
    /// Messages were expanded; `sent` were accepted by the transport, `failed`
    /// were rejected at send time.
    Dispatched { sent: usize, failed: usize },
}

pub struct MessageDispatcher {
    store: Arc<dyn JobStore>,
    gateway: Arc<dyn TransportGateway>,
    tracker: Arc<DeliveryTracker>,
    options: DispatchOptions,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        gateway: Arc<dyn TransportGateway>,
        tracker: Arc<DeliveryTracker>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            gateway,
            tracker,
            options,
        }
    }

    /// Expand and send one claimed job.
    ///
    /// The expanded list is committed before the first send, so every
    /// transport report refers to a message that already exists in the store.
    pub async fn dispatch(
        &self,
        job_id: &str,
        raw: Option<&Value>,
    ) -> Result<DispatchReport, RelayError> {
        let raw_messages = match RawMessage::parse_list(raw) {
            Ok(list) => list,
            Err(reason) => {
                let e = RelayError::MalformedJob {
                    job_id: job_id.to_string(),
                    reason: reason.clone(),
                };
                warn!(job_id, scope = %e.scope(), error = %e, "skipping job");
                self.store
                    .update(
                        job_id,
                        FieldPatch::new().status(JobStatus::ErrorMalformedData),
                    )
                    .await?;
                return Ok(DispatchReport::Malformed { reason });
            }
        };

        let Some(messages) = self.expand(job_id, &raw_messages).await? else {
            debug!(job_id, "job no longer processing, skipping dispatch");
            return Ok(DispatchReport::Skipped);
        };
        info!(job_id, count = messages.len(), "job expanded");

        let mut sent = 0;
        let mut failed = 0;
        for message in &messages {
            match self.send_one(job_id, message).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!(job_id, message_id = %message.id, scope = %e.scope(), error = %e, "send failed");
                    if let Err(e) = self
                        .tracker
                        .apply_outcome(job_id, &message.id, MessageStatus::ErrorSendingFailed, false)
                        .await
                    {
                        warn!(job_id, message_id = %message.id, scope = %e.scope(), error = %e, "could not record send failure");
                    }
                }
            }
        }
        Ok(DispatchReport::Dispatched { sent, failed })
    }

    /// Write the expanded message list in one transaction. `None` when the job
    /// is missing or no longer `processing`.
    async fn expand(
        &self,
        job_id: &str,
        raw_messages: &[RawMessage],
    ) -> Result<Option<Vec<Message>>, RelayError> {
        let optimistic = self.options.optimistic_sent_on_dispatch;
        let ignore_delivery_reports = self.tracker.policy().ignore_delivery_reports;
        let initial = if optimistic {
            MessageStatus::Sent
        } else {
            MessageStatus::Pending
        };

        let result = self
            .store
            .run_transaction(job_id, &|doc, now| {
                if doc.status() != Some(JobStatus::Processing) {
                    return Ok(None);
                }
                let millis = now.timestamp_millis();
                let messages: Vec<Message> = raw_messages
                    .iter()
                    .enumerate()
                    .map(|(index, raw)| {
                        let mut message = Message::expand(raw, millis, index, initial);
                        if optimistic {
                            message.stamp(MessageStatus::Sent, now);
                        }
                        message
                    })
                    .collect();
                let mut patch = FieldPatch::new().messages(&messages)?;
                if all_settled(&messages, ignore_delivery_reports) {
                    patch = patch.status(JobStatus::Completed);
                }
                Ok(Some(patch))
            })
            .await;

        match result {
            Ok(Some(doc)) => {
                if doc.status() == Some(JobStatus::Completed) {
                    info!(job_id, "job settled at expansion");
                }
                Ok(Some(doc.messages().map_err(StoreError::from)?))
            }
            Ok(None) | Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn send_one(&self, job_id: &str, message: &Message) -> Result<(), RelayError> {
        let parts = self.gateway.segment(&message.outbound_body());
        let (sent, delivered) = CallbackToken::pairs_for(job_id, &message.id, parts.len());
        debug!(job_id, message_id = %message.id, parts = parts.len(), "sending message");
        self.gateway
            .send_segments(&message.phone, parts, sent, delivered)
            .await?;
        Ok(())
    }
}
