//! Process bootstrap: builds the components around injected collaborators
//! and owns the shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::device_log::TransportLog;
use crate::dispatcher::MessageDispatcher;
use crate::error::RelayError;
use crate::gateway::{EventStream, TransportGateway};
use crate::store::JobStore;
use crate::syncer::{ReconciliationSyncer, SyncReport};
use crate::tracker::DeliveryTracker;
use crate::watcher::{JobWatcher, WatcherState};

/// A running engine: job watcher, delivery tracker and reconciliation timer.
pub struct Engine {
    watcher: Arc<JobWatcher>,
    syncer: Arc<ReconciliationSyncer>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Wire the components and start all three triggers.
    ///
    /// `events` must be the receiving end of the channel `gateway` reports on.
    pub async fn start(
        store: Arc<dyn JobStore>,
        gateway: Arc<dyn TransportGateway>,
        events: EventStream,
        log: Arc<dyn TransportLog>,
        config: &RelayConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let tracker = Arc::new(DeliveryTracker::new(store.clone(), config.tracker_policy()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            store.clone(),
            gateway,
            tracker.clone(),
            config.dispatch_options(),
        ));
        let watcher = Arc::new(JobWatcher::new(store.clone(), dispatcher));
        let syncer = Arc::new(ReconciliationSyncer::new(
            store,
            log,
            tracker.clone(),
            config.address_matcher(),
            config.sync_options(),
        ));

        let tracker_task = tokio::spawn(tracker.run(events, shutdown_rx.clone()));
        if let Err(e) = watcher.start(shutdown_rx.clone()).await {
            shutdown.send_replace(true);
            let _ = tracker_task.await;
            return Err(e);
        }
        let syncer_task = syncer.spawn(shutdown_rx);

        info!(
            optimistic_sent = config.optimistic_sent_on_dispatch,
            ignore_delivery_reports = config.ignore_delivery_reports,
            sync_interval_secs = config.sync_interval_secs,
            "engine started"
        );
        Ok(Self {
            watcher,
            syncer,
            shutdown,
            tasks: vec![tracker_task, syncer_task],
        })
    }

    pub fn watcher_state(&self) -> watch::Receiver<WatcherState> {
        self.watcher.state()
    }

    /// Run a reconciliation pass outside the timer.
    pub async fn sync_now(&self) -> Result<SyncReport, RelayError> {
        self.syncer.sync_once().await
    }

    /// Release the subscription, cancel the timer and let in-flight writes
    /// finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        self.watcher.join().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task failed");
            }
        }
        info!("engine stopped");
    }
}
