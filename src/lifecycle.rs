//! Process lifecycle: the shared stop flag, termination signals and the ordered stop.
//!
//! Order on stop: raise the flag, wait for the MQTT supervisor to disconnect and exit,
//! then release the modem.

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use crate::modem::ModemHandle;
use crate::mqtt::SupervisorHandle;

/// Cloneable stop flag. Once triggered it stays triggered.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called on any clone.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // the sender lives as long as any clone of self, so this cannot fail
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Wait for SIGINT, or SIGTERM on unix.
pub async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received interrupt signal"),
                    _ = term.recv() => info!("Received terminate signal"),
                }
                return;
            }
            Err(e) => warn!("Cannot install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for interrupt signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received interrupt signal");
}

/// Trigger `shutdown` when the process is asked to terminate.
pub fn spawn_signal_listener(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_termination() => shutdown.trigger(),
            _ = shutdown.wait() => {}
        }
    })
}

/// Ordered stop: flag, supervisor exit, then the modem.
pub async fn stop(shutdown: &Shutdown, supervisor: SupervisorHandle, modem: ModemHandle) {
    info!("Shutting down...");
    shutdown.trigger();
    supervisor.join().await;
    if let Err(e) = modem.close().await {
        warn!("Modem close failed: {}", e);
    }
    info!("Shutdown complete");
}
