//! # Aggregated change broadcaster.
//!
//! Collapses every change source (queue, observer, records, service lifecycle)
//! into one coalesced "something changed" signal. Consumers re-read whatever
//! they display after each notification.
//!
//! ```text
//! Bus ──► listener task ──► is_change() or Lagged? ──► watch<()>::send_replace
//!                                                          │
//!                                     subscribe_change() ◄─┘ Subscription<()>
//! ```
//!
//! A lagged listener cannot tell which events it missed, so lag is treated as
//! a change. When the listener stops (bus closed or [`AggregatedChangeBroadcaster::stop`]),
//! the watch sender is dropped and every subscription yields `ConnectionLost`.

use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::subscription::Subscription;
use crate::events::Bus;

/// Coalesced change notifier.
pub struct AggregatedChangeBroadcaster {
    rx: watch::Receiver<()>,
    token: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl AggregatedChangeBroadcaster {
    /// Spawns the bus listener. Must be called inside a tokio runtime.
    pub fn spawn(bus: &Bus) -> Self {
        let (tx, rx) = watch::channel(());
        let token = CancellationToken::new();
        let mut events = bus.subscribe();
        let stop = token.clone();

        let listener = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    ev = events.recv() => match ev {
                        Ok(ev) if ev.is_change() => {
                            trace!(seq = ev.seq, kind = ?ev.kind, "aggregated change");
                            tx.send_replace(());
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "change listener lagged");
                            tx.send_replace(());
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!("change broadcaster stopped");
        });

        Self {
            rx,
            token,
            listener: Some(listener),
        }
    }

    /// One coalesced notification per burst of changes.
    pub fn subscribe_change(&self) -> Subscription<()> {
        let mut rx = self.rx.clone();
        rx.borrow_and_update();
        Subscription::new(rx, "aggregated change broadcaster")
    }

    /// Stops the listener; subscriptions then yield `ConnectionLost`.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(listener) = self.listener.take() {
            let _ = listener.await;
        }
    }
}

impl Drop for AggregatedChangeBroadcaster {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
