//! Connectivity monitor: decides when sync passes run.
//!
//! The monitor is the single consumer of sync requests. Any module holding a
//! [`SyncRequester`] may ask for a sync without knowing the orchestrator; the
//! host platform reports connectivity through a [`ConnectivityHandle`].
//!
//! Passes run on the offline to online transition, on every interval tick
//! while online, on request while online, and when the earliest retry
//! backoff expires. Requests made while offline are folded into the pass
//! that runs on reconnect.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::manager::{SyncManager, SyncPassResult};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tillsync_store::{migrate_legacy_queue, EntityStore, EntityType, LegacyQueue, MigrationReport};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 32;

/// Network state reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The remote service is reachable.
    Online,
    /// No network.
    Offline,
}

/// Commands accepted by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Sync every registered type.
    SyncAll,
    /// Sync one type.
    SyncEntity(EntityType),
    /// Stop the monitor.
    Shutdown,
}

/// Host-side handle for reporting connectivity changes.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityHandle {
    /// Reports a connectivity state. Repeating the current state is a no-op.
    pub fn set(&self, state: Connectivity) {
        self.tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Reports that the network came back.
    pub fn set_online(&self) {
        self.set(Connectivity::Online);
    }

    /// Reports that the network went away.
    pub fn set_offline(&self) {
        self.set(Connectivity::Offline);
    }

    /// Last reported state.
    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }
}

/// Handle for publishing "sync requested".
#[derive(Debug, Clone)]
pub struct SyncRequester {
    tx: mpsc::Sender<MonitorCommand>,
}

impl SyncRequester {
    /// Requests a sync of every registered type.
    pub async fn request_all(&self) -> SyncResult<()> {
        self.send(MonitorCommand::SyncAll).await
    }

    /// Requests a sync of one type.
    pub async fn request(&self, entity_type: EntityType) -> SyncResult<()> {
        self.send(MonitorCommand::SyncEntity(entity_type)).await
    }

    /// Stops the monitor.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(MonitorCommand::Shutdown).await
    }

    /// Requests a sync without waiting, for callers outside async code.
    ///
    /// Returns false if the request could not be queued.
    pub fn try_request(&self, entity_type: Option<EntityType>) -> bool {
        let command = entity_type.map_or(MonitorCommand::SyncAll, MonitorCommand::SyncEntity);
        self.tx.try_send(command).is_ok()
    }

    async fn send(&self, command: MonitorCommand) -> SyncResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// Requests received while offline.
#[derive(Debug, Default)]
struct Deferred {
    all: bool,
    types: BTreeSet<EntityType>,
}

impl Deferred {
    fn is_empty(&self) -> bool {
        !self.all && self.types.is_empty()
    }
}

/// Drives the orchestrator from connectivity, timers and requests.
pub struct ConnectivityMonitor {
    manager: Arc<SyncManager>,
    sync_interval: Duration,
    commands: mpsc::Receiver<MonitorCommand>,
    connectivity: watch::Receiver<Connectivity>,
    deferred: Deferred,
    retry_at: Option<Instant>,
}

impl ConnectivityMonitor {
    /// Creates a monitor and the handles that feed it.
    ///
    /// Connectivity starts offline. If the host reports online before
    /// [`Self::run`] starts, the first pass runs as soon as it does.
    pub fn new(
        manager: Arc<SyncManager>,
        config: &SyncConfig,
    ) -> (Self, SyncRequester, ConnectivityHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (connectivity_tx, connectivity_rx) = watch::channel(Connectivity::Offline);

        let monitor = Self {
            manager,
            sync_interval: config.sync_interval,
            commands: command_rx,
            connectivity: connectivity_rx,
            deferred: Deferred::default(),
            retry_at: None,
        };
        (
            monitor,
            SyncRequester { tx: command_tx },
            ConnectivityHandle {
                tx: Arc::new(connectivity_tx),
            },
        )
    }

    /// Runs until shut down or until every [`SyncRequester`] is dropped.
    pub async fn run(mut self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut online = *self.connectivity.borrow_and_update() == Connectivity::Online;
        let mut watching = true;
        info!(online, "sync monitor started");
        if online {
            self.sync_all().await;
        }

        loop {
            let retry_deadline = self.retry_at.unwrap_or_else(|| Instant::now() + self.sync_interval);

            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(MonitorCommand::Shutdown) => {
                        info!("sync monitor shutting down");
                        break;
                    }
                    Some(MonitorCommand::SyncAll) if online => self.sync_all().await,
                    Some(MonitorCommand::SyncEntity(entity_type)) if online => {
                        self.sync_one(entity_type).await;
                    }
                    Some(MonitorCommand::SyncAll) => {
                        debug!("offline, deferring sync request");
                        self.deferred.all = true;
                    }
                    Some(MonitorCommand::SyncEntity(entity_type)) => {
                        debug!(entity_type = %entity_type, "offline, deferring sync request");
                        self.deferred.types.insert(entity_type);
                    }
                },

                changed = self.connectivity.changed(), if watching => {
                    if changed.is_err() {
                        debug!("connectivity source dropped, keeping last state");
                        watching = false;
                        continue;
                    }
                    let now_online = *self.connectivity.borrow_and_update() == Connectivity::Online;
                    if now_online && !online {
                        online = true;
                        let deferred = std::mem::take(&mut self.deferred);
                        if !deferred.is_empty() {
                            debug!(
                                all = deferred.all,
                                types = deferred.types.len(),
                                "folding deferred requests into reconnect pass"
                            );
                        }
                        info!("connectivity restored, syncing");
                        self.sync_all().await;
                        ticker.reset();
                    } else if !now_online && online {
                        info!("connectivity lost, sync paused");
                        online = false;
                    }
                },

                _ = ticker.tick(), if online => {
                    debug!("sync interval tick");
                    self.sync_all().await;
                },

                _ = tokio::time::sleep_until(retry_deadline), if online && self.retry_at.is_some() => {
                    debug!("retry backoff elapsed");
                    self.retry_at = None;
                    self.sync_all().await;
                },
            }
        }
    }

    async fn sync_all(&mut self) {
        let results = self.manager.sync_all().await;
        self.schedule_retry(&results);
    }

    async fn sync_one(&mut self, entity_type: EntityType) {
        match self.manager.sync_entity(entity_type).await {
            Ok(result) => self.schedule_retry(std::slice::from_ref(&result)),
            Err(e) => warn!(entity_type = %entity_type, error = %e, "requested sync failed"),
        }
    }

    fn schedule_retry(&mut self, results: &[SyncPassResult]) {
        if results.iter().all(|r| r.failed == 0) && self.retry_at.is_none() {
            return;
        }
        self.retry_at = self.manager.next_retry_due().map(|delay| Instant::now() + delay);
        if let Some(at) = self.retry_at {
            debug!(in_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64, "retry scheduled");
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("sync_interval", &self.sync_interval)
            .field("deferred", &self.deferred)
            .field("retry_at", &self.retry_at)
            .finish_non_exhaustive()
    }
}

/// Startup work: drains the legacy offline queue into the store, once.
///
/// Never fails; a migration error is logged and retried on the next start
/// since the legacy queue stays in place.
pub fn bootstrap(store: &EntityStore, legacy_queue: &mut dyn LegacyQueue) -> Option<MigrationReport> {
    match migrate_legacy_queue(store, legacy_queue) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "legacy queue migration failed");
            None
        }
    }
}
