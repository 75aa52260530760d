//! # Change subscriptions.
//!
//! Every service keeps a `tokio::sync::watch` channel holding its latest
//! snapshot. [`Subscription`] wraps the receiving side: each call to
//! [`Subscription::changed`] waits for the next mutation and returns the
//! current snapshot. Intermediate snapshots may be coalesced; the last one is
//! never lost.
//!
//! When the owning service is dropped the channel closes and the subscription
//! yields [`TimingError::ConnectionLost`].

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

use crate::error::TimingError;

/// Stream of snapshots from one service.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
    source: &'static str,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    pub(crate) fn new(rx: watch::Receiver<T>, source: &'static str) -> Self {
        Self { rx, source }
    }

    /// Latest snapshot without waiting.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Waits for the next change and returns the snapshot after it.
    pub async fn changed(&mut self) -> Result<T, TimingError> {
        self.rx.changed().await.map_err(|_| {
            TimingError::connection_lost(format!("{} change channel closed", self.source))
        })?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Converts into a stream that ends with one `Err` when the source goes away.
    pub fn into_stream(self) -> BoxStream<'static, Result<T, TimingError>> {
        stream::unfold(Some(self), |state| async move {
            let mut sub = state?;
            match sub.changed().await {
                Ok(v) => Some((Ok(v), Some(sub))),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_changed_returns_latest_and_reports_close() {
        let (tx, rx) = watch::channel(0u32);
        let mut sub = Subscription::new(rx, "test");
        tx.send_replace(1);
        tx.send_replace(2);
        assert_eq!(sub.changed().await, Ok(2));

        drop(tx);
        let err = sub.changed().await.unwrap_err();
        assert_eq!(err.as_label(), "connection_lost");
    }

    #[tokio::test]
    async fn test_stream_terminates_after_error() {
        let (tx, rx) = watch::channel(0u32);
        let mut stream = Subscription::new(rx, "test").into_stream();
        tx.send_replace(7);
        assert_eq!(stream.next().await, Some(Ok(7)));
        drop(tx);
        assert!(matches!(stream.next().await, Some(Err(_))));
        assert_eq!(stream.next().await, None);
    }
}
