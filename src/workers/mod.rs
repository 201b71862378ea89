use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::adaptive::PersistenceBridge;

/// Periodically drains dirty algorithm states to the stats store and picks up
/// configuration changes. A final flush runs on shutdown.
pub struct FlushWorker {
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    bridge: Arc<PersistenceBridge>,
    flush_interval: Duration,
    reload_interval: Duration,
}

impl FlushWorker {
    pub fn new(
        bridge: Arc<PersistenceBridge>,
        flush_interval: Duration,
        reload_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            handle: Mutex::new(None),
            bridge,
            flush_interval,
            reload_interval,
        }
    }

    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            warn!("flush worker already running");
            return;
        }

        let bridge = Arc::clone(&self.bridge);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let flush_interval = self.flush_interval;
        let reload_interval = self.reload_interval;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_reload = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if last_reload.elapsed() >= reload_interval {
                            last_reload = Instant::now();
                            if let Err(e) = bridge.reload_configs().await {
                                warn!(error = %e, "config reload failed");
                            }
                        }
                        // Failures are logged by the bridge and retried next tick.
                        let _ = bridge.flush().await;
                    }
                }
            }

            if let Err(e) = bridge.flush().await {
                error!(error = %e, "final flush failed");
            }
        }));

        info!(
            flush_ms = flush_interval.as_millis() as u64,
            reload_ms = reload_interval.as_millis() as u64,
            "flush worker started"
        );
    }

    pub async fn stop(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };

        info!("stopping flush worker");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!(error = %e, "flush worker panicked");
        }
        info!("flush worker stopped");
    }
}
