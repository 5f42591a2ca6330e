use crate::results::{LiveSnapshot, ResultsService};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::pending;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Something a dashboard can poll for results.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    type Snapshot: Clone + Send + Sync + 'static;

    async fn fetch(&self) -> Result<Self::Snapshot, FetchError>;
}

/// Visibility of the surface showing the results, as reported by its host.
#[async_trait]
pub trait Foreground: Send + 'static {
    fn is_foregrounded(&self) -> bool;

    /// Waits for the next visibility change. Returns `false` once the host
    /// stops reporting, which ends the refresh loop.
    async fn changed(&mut self) -> bool;
}

#[async_trait]
impl Foreground for watch::Receiver<bool> {
    fn is_foregrounded(&self) -> bool {
        *self.borrow()
    }

    async fn changed(&mut self) -> bool {
        watch::Receiver::changed(self).await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

pub struct LiveRefresh;

impl LiveRefresh {
    /// Starts the refresh loop for one viewing session.
    ///
    /// The loop fetches right away when the surface is visible, then once per
    /// `interval` after each fetch completes. Hiding the surface cancels the
    /// pending fetch; showing it again fetches immediately unless a fetch is
    /// already scheduled. Only one fetch runs at a time. A failed fetch flips
    /// connectivity to `Disconnected` and the schedule carries on.
    pub fn spawn<S, F>(source: S, foreground: F, interval: Duration) -> LiveRefreshHandle<S::Snapshot>
    where
        S: SnapshotSource,
        F: Foreground,
    {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (connectivity_tx, connectivity_rx) = watch::channel(Connectivity::Connected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(refresh_loop(
            source,
            foreground,
            interval,
            snapshot_tx,
            connectivity_tx,
            shutdown_rx,
        ));

        LiveRefreshHandle {
            snapshot: snapshot_rx,
            connectivity: connectivity_rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Owned by the viewing session. Dropping it stops the loop and its timer.
pub struct LiveRefreshHandle<T> {
    snapshot: watch::Receiver<Option<T>>,
    connectivity: watch::Receiver<Connectivity>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl<T: Clone> LiveRefreshHandle<T> {
    /// Last successfully fetched snapshot.
    pub fn latest(&self) -> Option<T> {
        self.snapshot.borrow().clone()
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.snapshot.clone()
    }

    /// Stops the loop and waits until it has exited.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Live refresh task ended abnormally: {}", e);
        }
    }
}

async fn refresh_loop<S, F>(
    source: S,
    mut foreground: F,
    interval: Duration,
    snapshot_tx: watch::Sender<Option<S::Snapshot>>,
    connectivity_tx: watch::Sender<Connectivity>,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: SnapshotSource,
    F: Foreground,
{
    info!("Starting live refresh every {:?}", interval);
    let mut next_fetch = foreground.is_foregrounded().then(Instant::now);

    loop {
        let deadline = next_fetch;
        let due = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown => break,
            alive = foreground.changed() => {
                if !alive {
                    debug!("Visibility source closed");
                    break;
                }
                if foreground.is_foregrounded() {
                    if next_fetch.is_none() {
                        next_fetch = Some(Instant::now());
                    }
                } else if next_fetch.take().is_some() {
                    debug!("Surface hidden, pending refresh cancelled");
                }
            }
            _ = due => {
                next_fetch = None;
                let outcome = tokio::select! {
                    _ = &mut shutdown => break,
                    outcome = source.fetch() => outcome,
                };

                match outcome {
                    Ok(snapshot) => {
                        snapshot_tx.send_replace(Some(snapshot));
                        if connectivity_tx.send_replace(Connectivity::Connected) == Connectivity::Disconnected {
                            info!("Live refresh reconnected");
                        }
                    }
                    Err(e) => {
                        warn!("Live refresh failed: {}", e);
                        connectivity_tx.send_replace(Connectivity::Disconnected);
                    }
                }

                if foreground.is_foregrounded() {
                    next_fetch = Some(Instant::now() + interval);
                }
            }
        }
    }

    info!("Live refresh stopped");
}

/// Polls [`ResultsService::live_snapshot`] in-process.
pub struct ServiceSource {
    service: ResultsService,
    event_id: String,
    position_ids: Vec<String>,
}

impl ServiceSource {
    pub fn new(service: ResultsService, event_id: String, position_ids: Vec<String>) -> Self {
        Self {
            service,
            event_id,
            position_ids,
        }
    }
}

#[async_trait]
impl SnapshotSource for ServiceSource {
    type Snapshot = LiveSnapshot;

    async fn fetch(&self) -> Result<LiveSnapshot, FetchError> {
        Ok(self.service.live_snapshot(&self.event_id, &self.position_ids).await?)
    }
}
