//! Job watcher: listens for the oldest pending job and claims it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::MessageDispatcher;
use crate::error::{RelayError, StoreError};
use crate::state_machine::JobStatus;
use crate::store::{FieldPatch, JobDocument, JobQuery, JobStore, Subscription};

/// What the watcher is doing right now, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Waiting,
    Processing { job_id: String },
    /// The subscription reported a fault; the watcher is still listening.
    Faulted { reason: String },
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherState::Idle => write!(f, "idle"),
            WatcherState::Waiting => write!(f, "waiting for jobs"),
            WatcherState::Processing { job_id } => write!(f, "processing {job_id}"),
            WatcherState::Faulted { reason } => write!(f, "faulted: {reason}"),
            WatcherState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct JobWatcher {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<MessageDispatcher>,
    state: watch::Sender<WatcherState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobWatcher {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<MessageDispatcher>) -> Self {
        let (state, _) = watch::channel(WatcherState::Idle);
        Self {
            store,
            dispatcher,
            state,
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    /// Subscribe and start listening. Returns `false` without doing anything
    /// when a listener is already running.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<bool, RelayError> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("job watcher already subscribed");
            return Ok(false);
        }

        let subscription = match self.store.subscribe(JobQuery::oldest_pending()).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.state.send_replace(WatcherState::Faulted {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };
        self.state.send_replace(WatcherState::Waiting);
        info!("job watcher subscribed");

        let watcher = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            watcher.listen(subscription, shutdown).await;
        }));
        Ok(true)
    }

    /// Wait for the listener to finish after shutdown was signalled.
    pub async fn join(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "job watcher task failed");
            }
        }
    }

    async fn listen(&self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
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
                event = subscription.next() => event,
            };
            match event {
                None => {
                    warn!("job subscription closed by the store");
                    break;
                }
                Some(Err(e)) => {
                    let e = RelayError::from(e);
                    warn!(scope = %e.scope(), error = %e, "job subscription fault, waiting for next snapshot");
                    self.state.send_replace(WatcherState::Faulted {
                        reason: e.to_string(),
                    });
                }
                Some(Ok(docs)) => {
                    if let Some(doc) = docs.into_iter().next() {
                        self.process(doc).await;
                    }
                    self.state.send_replace(WatcherState::Waiting);
                }
            }
        }
        subscription.release();
        self.state.send_replace(WatcherState::Stopped);
        debug!("job watcher stopped");
    }

    async fn process(&self, doc: JobDocument) {
        let job_id = doc.id;
        let claimed = match self.claim(&job_id).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                debug!(job_id = %job_id, "job no longer pending, not claimed");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, scope = %e.scope(), error = %e, "claim failed, job left pending");
                return;
            }
        };

        info!(job_id = %job_id, "job claimed");
        self.state.send_replace(WatcherState::Processing {
            job_id: job_id.clone(),
        });
        match self.dispatcher.dispatch(&job_id, claimed.raw_messages()).await {
            Ok(report) => debug!(job_id = %job_id, ?report, "dispatch finished"),
            Err(e) => warn!(job_id = %job_id, scope = %e.scope(), error = %e, "dispatch failed"),
        }
    }

    /// Move the job from `pending` to `processing`. `None` when another
    /// claimer got there first or the job is gone.
    async fn claim(&self, job_id: &str) -> Result<Option<JobDocument>, RelayError> {
        let result = self
            .store
            .run_transaction(job_id, &|doc, _now| {
                if doc.status() == Some(JobStatus::Pending) {
                    Ok(Some(FieldPatch::new().status(JobStatus::Processing)))
                } else {
                    Ok(None)
                }
            })
            .await;
        match result {
            Ok(doc) => Ok(doc),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
