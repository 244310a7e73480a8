//! Reconciliation syncer.
//!
//! Transport delivery reports can be lost. The device's own outgoing log
//! cannot: each pass reads it, joins it to in-progress messages by address,
//! and replays `delivered` through the tracker's transactional path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::device_log::{AddressMatcher, LogStatus, TransportLog, latest_per_address};
use crate::error::RelayError;
use crate::state_machine::{JobStatus, MessageStatus};
use crate::store::{JobQuery, JobStore};
use crate::tracker::{DeliveryTracker, OutcomeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub interval: Duration,
    /// How many of the most recent log records to read per pass.
    pub window: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            window: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub jobs_examined: usize,
    /// Messages moved to `delivered` by this pass.
    pub updated: usize,
}

pub struct ReconciliationSyncer {
    store: Arc<dyn JobStore>,
    log: Arc<dyn TransportLog>,
    tracker: Arc<DeliveryTracker>,
    matcher: Arc<dyn AddressMatcher>,
    options: SyncOptions,
}

impl ReconciliationSyncer {
    pub fn new(
        store: Arc<dyn JobStore>,
        log: Arc<dyn TransportLog>,
        tracker: Arc<DeliveryTracker>,
        matcher: Arc<dyn AddressMatcher>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            log,
            tracker,
            matcher,
            options,
        }
    }

    /// One reconciliation pass.
    ///
    /// An empty or unreadable log makes the pass a no-op. Failing to update
    /// one message is logged and the pass moves on to the next one.
    pub async fn sync_once(&self) -> Result<SyncReport, RelayError> {
        let jobs = self
            .store
            .query(JobQuery::with_status(JobStatus::Processing))
            .await?;
        if jobs.is_empty() {
            debug!("no jobs in progress, nothing to reconcile");
            return Ok(SyncReport::default());
        }

        let records = match self.log.query_recent(self.options.window).await {
            Ok(records) => latest_per_address(records),
            Err(e) => {
                warn!(error = %e, "transport log unreadable, skipping reconciliation");
                return Ok(SyncReport::default());
            }
        };
        let mut report = SyncReport {
            jobs_examined: jobs.len(),
            updated: 0,
        };
        if records.is_empty() {
            debug!("transport log empty, nothing to reconcile");
            return Ok(report);
        }

        for job in &jobs {
            let messages = match job.messages() {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "unreadable messages, skipping job");
                    continue;
                }
            };
            for message in messages
                .iter()
                .filter(|m| m.status != MessageStatus::Delivered)
            {
                let Some(record) = records
                    .iter()
                    .find(|r| self.matcher.same_address(&r.address, &message.phone))
                else {
                    continue;
                };
                if record.status != LogStatus::Complete {
                    continue;
                }
                match self
                    .tracker
                    .apply_outcome(&job.id, &message.id, MessageStatus::Delivered, true)
                    .await
                {
                    Ok(OutcomeReport::Applied { .. }) => {
                        debug!(job_id = %job.id, message_id = %message.id, "delivery recovered from transport log");
                        report.updated += 1;
                    }
                    Ok(OutcomeReport::Ignored) => {}
                    Err(e) => {
                        warn!(job_id = %job.id, message_id = %message.id, scope = %e.scope(), error = %e, "reconciliation update failed");
                    }
                }
            }
        }

        if report.updated > 0 {
            info!(
                jobs = report.jobs_examined,
                updated = report.updated,
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Run a pass now and then once per interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        warn!(scope = %e.scope(), error = %e, "reconciliation pass failed");
                    }
                }
            }
        }
        debug!("reconciliation syncer stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_log::{LogRecord, LooseNumberMatcher, MemoryTransportLog};
    use crate::store::MemoryJobStore;
    use crate::test_support::eventually;
    use crate::tracker::TrackerPolicy;
    use chrono::Utc;
    use serde_json::json;

    struct Fixture {
        store: MemoryJobStore,
        log: MemoryTransportLog,
        syncer: Arc<ReconciliationSyncer>,
    }

    fn fixture(interval: Duration) -> Fixture {
        let store = MemoryJobStore::new();
        let log = MemoryTransportLog::new();
        let shared: Arc<dyn JobStore> = Arc::new(store.clone());
        let tracker = Arc::new(DeliveryTracker::new(shared.clone(), TrackerPolicy::default()));
        let syncer = Arc::new(ReconciliationSyncer::new(
            shared,
            Arc::new(log.clone()),
            tracker,
            Arc::new(LooseNumberMatcher::default()),
            SyncOptions {
                interval,
                window: 200,
            },
        ));
        Fixture { store, log, syncer }
    }

    fn processing_job(store: &MemoryJobStore, phones: &[(&str, &str)]) -> String {
        let messages: Vec<_> = phones
            .iter()
            .enumerate()
            .map(|(i, (phone, status))| {
                json!({"id": format!("m{i}"), "phone": phone, "message": "hi", "status": status})
            })
            .collect();
        let mut fields = serde_json::Map::new();
        fields.insert("status".into(), json!("processing"));
        fields.insert("messages".into(), json!(messages));
        store.insert_job(fields)
    }

    fn record(address: &str, status: LogStatus) -> LogRecord {
        LogRecord {
            address: address.into(),
            status,
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn joins_log_to_messages_by_address() {
        let f = fixture(Duration::from_secs(60));
        let job = processing_job(&f.store, &[("15550100", "sent"), ("15550199", "sent")]);
        f.log.append(record("+1 555 0100", LogStatus::Complete));

        let report = f.syncer.sync_once().await.unwrap();
        assert_eq!(report, SyncReport { jobs_examined: 1, updated: 1 });

        let messages = f.store.get(&job).unwrap().messages().unwrap();
        assert_eq!(messages[0].status, MessageStatus::Delivered);
        assert!(messages[0].delivered_at.is_some());
        assert_eq!(messages[1].status, MessageStatus::Sent);
        assert!(messages[1].delivered_at.is_none());
        assert_eq!(f.store.get(&job).unwrap().status(), Some(JobStatus::Processing));
    }

    #[tokio::test]
    async fn only_the_newest_record_per_address_counts() {
        let f = fixture(Duration::from_secs(60));
        let job = processing_job(&f.store, &[("555 0100", "sent")]);
        f.log.append(LogRecord {
            address: "5550100".into(),
            status: LogStatus::Complete,
            sent_at: Utc::now() - chrono::Duration::seconds(30),
        });
        f.log.append(record("5550100", LogStatus::Failed));

        let report = f.syncer.sync_once().await.unwrap();
        assert_eq!(report.updated, 0);
        let messages = f.store.get(&job).unwrap().messages().unwrap();
        assert_eq!(messages[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn recovers_errored_messages_and_completes_jobs() {
        let f = fixture(Duration::from_secs(60));
        let job = processing_job(&f.store, &[("600100200", "error_not_sent")]);
        f.log.append(record("+48 600 100 200", LogStatus::Complete));

        let report = f.syncer.sync_once().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(f.store.get(&job).unwrap().status(), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn already_delivered_messages_are_not_counted() {
        let f = fixture(Duration::from_secs(60));
        processing_job(&f.store, &[("555", "delivered"), ("777", "pending")]);
        f.log.append(record("555", LogStatus::Complete));

        let report = f.syncer.sync_once().await.unwrap();
        assert_eq!(report, SyncReport { jobs_examined: 1, updated: 0 });
    }

    #[tokio::test]
    async fn empty_or_unreadable_log_is_a_no_op() {
        let f = fixture(Duration::from_secs(60));
        let job = processing_job(&f.store, &[("555", "sent")]);

        assert_eq!(f.syncer.sync_once().await.unwrap().updated, 0);

        f.log.append(record("555", LogStatus::Complete));
        f.log.set_unreadable(true);
        assert_eq!(f.syncer.sync_once().await.unwrap(), SyncReport::default());
        let messages = f.store.get(&job).unwrap().messages().unwrap();
        assert_eq!(messages[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn no_jobs_in_progress_skips_the_log() {
        let f = fixture(Duration::from_secs(60));
        f.log.set_unreadable(true);
        assert_eq!(f.syncer.sync_once().await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn store_outage_is_reported() {
        let f = fixture(Duration::from_secs(60));
        f.store.set_unavailable(true);
        assert!(f.syncer.sync_once().await.is_err());
    }

    #[tokio::test]
    async fn timer_runs_immediately_and_stops_on_shutdown() {
        let f = fixture(Duration::from_secs(3600));
        let job = processing_job(&f.store, &[("555", "sent")]);
        f.log.append(record("555", LogStatus::Complete));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = f.syncer.spawn(shutdown_rx);

        eventually("first pass", || {
            f.store.get(&job).unwrap().status() == Some(JobStatus::Completed)
        })
        .await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
