//! Selection and background services

pub mod health;
pub mod manager;
pub mod rotation;
pub mod sources;

pub use health::{HealthMonitor, Prober, TcpProber};
pub use manager::{ProxyManager, Selection};
pub use rotation::{next_daily_boundary, RotationScheduler};
pub use sources::{parse_list, HttpListSource, ProxySource, SourceAggregator};

use tokio::sync::watch;

/// Handle for stopping the background loops
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ServiceHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    /// Another receiver for an additional loop
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ServiceHandle {
    fn default() -> Self {
        Self::new().0
    }
}
