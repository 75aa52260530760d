//! # ChangePool: reference-counted shared upstream subscription.
//!
//! Many consumer widgets want "tell me when anything changed". The pool keeps
//! at most one upstream change stream per source and fans it out.
//!
//! ```text
//! subscribe() ─► [connect lock] ─► [state lock] upstream? ──no──► source.connect() ─► pump task (generation g)
//!                                                    │yes
//!                                                    └──────────► add listener (same lock)
//!
//! pump(g):  Ok(())          ─► PoolNotice::Changed to every listener
//!           Err(e) / end    ─► PoolNotice::Disconnected(e) to every listener, pool reset
//!
//! drop(PooledSubscription) ─► remove listener ─► last one? ─► cancel upstream
//! ```
//!
//! ## Rules
//! - The first subscriber connects; later subscribers share the upstream.
//! - Each subscription releases its reference exactly once, on drop.
//! - After a disconnect the pool is empty; the next `subscribe` reconnects.
//! - A listener is only ever added while an upstream is registered, under the
//!   same state lock `disconnect` drains with.
//! - The pool is an ordinary value: construct it, clone it, pass it around.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TimingError;

/// Upstream change feed.
#[async_trait]
pub trait ChangeSource: Send + Sync + 'static {
    /// Opens a new change stream. Each `Ok(())` item is one change notification.
    async fn connect(&self) -> Result<BoxStream<'static, Result<(), TimingError>>, TimingError>;
}

/// What a pooled subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolNotice {
    /// Something changed upstream.
    Changed,
    /// The upstream ended; this subscription will receive nothing more.
    Disconnected(TimingError),
}

struct Upstream {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct PoolState {
    upstream: Option<Upstream>,
    listeners: HashMap<u64, mpsc::UnboundedSender<PoolNotice>>,
    generation: u64,
}

struct PoolInner<S> {
    source: S,
    connect: tokio::sync::Mutex<()>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl<S> PoolInner<S> {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn broadcast(&self, generation: u64) {
        let st = self.state();
        if st.upstream.as_ref().map(|u| u.generation) != Some(generation) {
            return;
        }
        for tx in st.listeners.values() {
            let _ = tx.send(PoolNotice::Changed);
        }
    }

    fn disconnect(&self, generation: u64, err: TimingError) {
        let mut st = self.state();
        if st.upstream.as_ref().map(|u| u.generation) != Some(generation) {
            return;
        }
        st.upstream = None;
        let listeners: Vec<_> = st.listeners.drain().map(|(_, tx)| tx).collect();
        drop(st);
        warn!(generation, listeners = listeners.len(), err = %err, "change upstream lost");
        for tx in listeners {
            let _ = tx.send(PoolNotice::Disconnected(err.clone()));
        }
    }
}

trait Release: Send + Sync {
    fn release(&self, id: u64);
}

impl<S: Send + Sync> Release for PoolInner<S> {
    fn release(&self, id: u64) {
        let mut st = self.state();
        if st.listeners.remove(&id).is_none() || !st.listeners.is_empty() {
            return;
        }
        if let Some(up) = st.upstream.take() {
            debug!(generation = up.generation, "last pooled subscriber gone, closing upstream");
            up.cancel.cancel();
        }
    }
}

/// Shared, lazily connected change subscription pool.
pub struct ChangePool<S: ChangeSource> {
    inner: Arc<PoolInner<S>>,
}

impl<S: ChangeSource> Clone for ChangePool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ChangeSource> ChangePool<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                source,
                connect: tokio::sync::Mutex::new(()),
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Joins the shared upstream, connecting it if this is the first subscriber.
    pub async fn subscribe(&self) -> Result<PooledSubscription, TimingError> {
        let _connecting = self.inner.connect.lock().await;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut st = self.inner.state();
            if st.upstream.is_some() {
                st.listeners.insert(id, tx);
                return Ok(self.subscription(id, rx));
            }
        }

        let stream = self.inner.source.connect().await?;
        let cancel = CancellationToken::new();
        let generation = {
            let mut st = self.inner.state();
            st.generation += 1;
            let generation = st.generation;
            st.upstream = Some(Upstream {
                generation,
                cancel: cancel.clone(),
            });
            st.listeners.insert(id, tx);
            generation
        };
        debug!(generation, "change upstream connected");
        tokio::spawn(pump(Arc::clone(&self.inner), generation, stream, cancel));
        Ok(self.subscription(id, rx))
    }

    fn subscription(&self, id: u64, rx: mpsc::UnboundedReceiver<PoolNotice>) -> PooledSubscription {
        let release: Arc<dyn Release> = self.inner.clone();
        PooledSubscription { id, rx, release }
    }

    /// Live pooled subscriptions.
    pub fn ref_count(&self) -> usize {
        self.inner.state().listeners.len()
    }

    /// Whether an upstream stream is open.
    pub fn is_connected(&self) -> bool {
        self.inner.state().upstream.is_some()
    }
}

async fn pump<S>(
    inner: Arc<PoolInner<S>>,
    generation: u64,
    mut stream: BoxStream<'static, Result<(), TimingError>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => match item {
                Some(Ok(())) => inner.broadcast(generation),
                Some(Err(e)) => return inner.disconnect(generation, e),
                None => {
                    return inner.disconnect(
                        generation,
                        TimingError::connection_lost("change stream ended"),
                    )
                }
            }
        }
    }
}

/// One reference to a [`ChangePool`] upstream. Dropping it releases the reference.
pub struct PooledSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<PoolNotice>,
    release: Arc<dyn Release>,
}

impl PooledSubscription {
    /// Next notice; `None` after a disconnect has been delivered.
    pub async fn next(&mut self) -> Option<PoolNotice> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for PooledSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSubscription").field("id", &self.id).finish()
    }
}

impl Drop for PooledSubscription {
    fn drop(&mut self) {
        self.release.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    /// Counts connects; each connect hands out a stream driven by the test.
    #[derive(Default)]
    struct ScriptedSource {
        connects: AtomicUsize,
        feeds: AsyncMutex<Vec<mpsc::UnboundedSender<Result<(), TimingError>>>>,
    }

    #[async_trait]
    impl ChangeSource for Arc<ScriptedSource> {
        async fn connect(
            &self,
        ) -> Result<BoxStream<'static, Result<(), TimingError>>, TimingError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().await.push(tx);
            Ok(tokio_stream_from(rx))
        }
    }

    fn tokio_stream_from(
        rx: mpsc::UnboundedReceiver<Result<(), TimingError>>,
    ) -> BoxStream<'static, Result<(), TimingError>> {
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) })
            .boxed()
    }

    async fn feed(src: &ScriptedSource) -> mpsc::UnboundedSender<Result<(), TimingError>> {
        src.feeds.lock().await.last().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_subscribers_share_one_upstream() {
        let src = Arc::new(ScriptedSource::default());
        let pool = ChangePool::new(src.clone());
        let mut a = pool.subscribe().await.unwrap();
        let mut b = pool.subscribe().await.unwrap();
        assert_eq!(src.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(), 2);

        feed(&src).await.send(Ok(())).unwrap();
        assert_eq!(a.next().await, Some(PoolNotice::Changed));
        assert_eq!(b.next().await, Some(PoolNotice::Changed));
    }

    #[tokio::test]
    async fn test_last_release_closes_upstream() {
        let src = Arc::new(ScriptedSource::default());
        let pool = ChangePool::new(src.clone());
        let a = pool.subscribe().await.unwrap();
        let b = pool.subscribe().await.unwrap();

        drop(a);
        assert!(pool.is_connected());
        drop(b);
        assert!(!pool.is_connected());
        assert_eq!(pool.ref_count(), 0);

        let _c = pool.subscribe().await.unwrap();
        assert_eq!(src.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_upstream_error_reaches_everyone_and_resets() {
        let src = Arc::new(ScriptedSource::default());
        let pool = ChangePool::new(src.clone());
        let mut a = pool.subscribe().await.unwrap();
        let mut b = pool.subscribe().await.unwrap();

        let lost = TimingError::connection_lost("server went away");
        feed(&src).await.send(Err(lost.clone())).unwrap();
        assert_eq!(a.next().await, Some(PoolNotice::Disconnected(lost.clone())));
        assert_eq!(b.next().await, Some(PoolNotice::Disconnected(lost)));
        assert_eq!(a.next().await, None);
        assert!(!pool.is_connected());
        assert_eq!(pool.ref_count(), 0);

        // Dropping drained subscriptions is a no-op.
        drop(a);
        drop(b);

        let mut c = pool.subscribe().await.unwrap();
        assert_eq!(src.connects.load(Ordering::SeqCst), 2);
        feed(&src).await.send(Ok(())).unwrap();
        assert_eq!(c.next().await, Some(PoolNotice::Changed));
    }

    #[tokio::test]
    async fn test_stream_end_disconnects() {
        let src = Arc::new(ScriptedSource::default());
        let pool = ChangePool::new(src.clone());
        let mut a = pool.subscribe().await.unwrap();
        src.feeds.lock().await.clear();
        match a.next().await {
            Some(PoolNotice::Disconnected(e)) => assert_eq!(e.as_label(), "connection_lost"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribers_share_one_upstream() {
        let src = Arc::new(ScriptedSource::default());
        let pool = ChangePool::new(src.clone());
        let joins: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.subscribe().await.unwrap() })
            })
            .collect();
        let mut subs = Vec::new();
        for join in joins {
            subs.push(join.await.unwrap());
        }
        assert_eq!(src.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(), 16);

        feed(&src).await.send(Ok(())).unwrap();
        for sub in &mut subs {
            assert_eq!(sub.next().await, Some(PoolNotice::Changed));
        }
        drop(subs);
        assert!(!pool.is_connected());
        assert_eq!(pool.ref_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_disconnect_is_never_half_open() {
        let src = Arc::new(ScriptedSource::default());
        let pool = ChangePool::new(src.clone());
        let lost = TimingError::connection_lost("server went away");

        for _ in 0..50 {
            let mut a = pool.subscribe().await.unwrap();
            let upstream = feed(&src).await;
            let racer = {
                let pool = pool.clone();
                tokio::spawn(async move { pool.subscribe().await.unwrap() })
            };
            upstream.send(Err(lost.clone())).unwrap();
            let mut b = racer.await.unwrap();
            assert_eq!(a.next().await, Some(PoolNotice::Disconnected(lost.clone())));

            if pool.is_connected() {
                assert_eq!(pool.ref_count(), 1);
            } else {
                assert_eq!(pool.ref_count(), 0);
                assert_eq!(b.next().await, Some(PoolNotice::Disconnected(lost.clone())));
            }
            drop(a);
            drop(b);
            assert!(!pool.is_connected());
        }
    }
}
