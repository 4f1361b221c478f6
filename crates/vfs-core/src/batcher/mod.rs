//! Batcher (spec §4.4): coalesces small per-item finalize operations into
//! bounded multi-item API calls with per-item result fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Caller waits for the committed result.
    Sync,
    /// Returns once enqueued; the result is discarded.
    Async,
    /// Commits one item at a time, bypassing batching entirely.
    Off,
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub mode: BatchMode,
    pub max_batch_size: usize,
    pub flush_timeout: Duration,
}

impl BatcherConfig {
    pub fn sync_default() -> Self {
        Self {
            mode: BatchMode::Sync,
            max_batch_size: 100,
            flush_timeout: Duration::from_secs(1),
        }
    }

    pub fn async_default() -> Self {
        Self {
            mode: BatchMode::Async,
            max_batch_size: 100,
            flush_timeout: Duration::from_secs(10),
        }
    }
}

/// The adapter-supplied commit callback: given one secondary key and the
/// ordered payloads submitted under it, return one outcome per payload (in
/// submission order).
#[async_trait]
pub trait Committer<K, I, R>: Send + Sync
where
    K: Eq + std::hash::Hash + Clone + Send + Sync,
    I: Send + Sync,
    R: Send + Sync,
{
    async fn commit(&self, key: &K, items: &[I]) -> Vec<Result<R>>;
}

struct Pending<K, I, R> {
    key: K,
    item: I,
    reply: oneshot::Sender<Result<R>>,
}

struct State<K, I, R> {
    pending: Vec<Pending<K, I, R>>,
    closed: bool,
}

/// Commits are grouped by secondary key and, within a flush, the commit
/// callback is invoked once per distinct key, in submission order (spec
/// §4.4, §5).
pub struct Batcher<K, I, R, C>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    C: Committer<K, I, R> + 'static,
{
    config: BatcherConfig,
    committer: Arc<C>,
    state: Arc<Mutex<State<K, I, R>>>,
    notify: Arc<Notify>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<K, I, R, C> Batcher<K, I, R, C>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    C: Committer<K, I, R> + 'static,
{
    pub fn new(config: BatcherConfig, committer: C) -> Self {
        let state = Arc::new(Mutex::new(State {
            pending: Vec::new(),
            closed: false,
        }));
        let notify = Arc::new(Notify::new());
        let committer = Arc::new(committer);

        let flusher = if config.mode == BatchMode::Off {
            None
        } else {
            let state = state.clone();
            let notify = notify.clone();
            let committer = committer.clone();
            let timeout = config.flush_timeout;
            let max_size = config.max_batch_size;
            Some(tokio::spawn(async move {
                loop {
                    let fired = tokio::time::timeout(timeout, notify.notified()).await;
                    let should_flush = match fired {
                        Ok(()) => true,
                        Err(_elapsed) => true, // timer expiry also flushes
                    };
                    if should_flush {
                        let is_closed = flush_once(&state, &committer, max_size).await;
                        if is_closed {
                            break;
                        }
                    }
                }
            }))
        };

        Self {
            config,
            committer,
            state,
            notify,
            flusher: Mutex::new(flusher),
        }
    }

    /// Submits one item under `key` and blocks until its outcome is known
    /// (spec: "each submission is delivered exactly one outcome"). In
    /// `Async` mode, use [`Batcher::submit`] instead — the result here
    /// would just be discarded anyway.
    pub async fn commit(&self, key: K, item: I) -> Result<R> {
        if self.config.mode == BatchMode::Off {
            let results = self.committer.commit(&key, std::slice::from_ref(&item)).await;
            return results
                .into_iter()
                .next()
                .unwrap_or_else(|| Err(Error::Other("committer returned no results".into())));
        }

        let rx = self.enqueue(key, item).await?;
        rx.await
            .unwrap_or_else(|_| Err(Error::Cancelled("batcher dropped reply channel".into())))
    }

    /// Enqueues one item and returns immediately once it has landed in the
    /// batch, without waiting for the outcome (`Async` mode).
    pub async fn submit(&self, key: K, item: I) -> Result<()> {
        let rx = self.enqueue(key, item).await?;
        tokio::spawn(async move {
            let _ = rx.await;
        });
        Ok(())
    }

    async fn enqueue(&self, key: K, item: I) -> Result<oneshot::Receiver<Result<R>>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Cancelled("batcher is shut down".into()));
        }
        state.pending.push(Pending { key, item, reply: tx });
        if state.pending.len() >= self.config.max_batch_size {
            self.notify.notify_one();
        }
        Ok(rx)
    }

    /// Flushes any in-flight batch, waits for the commit callback, then
    /// refuses new submissions.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.closed = true;
        }
        flush_once(&self.state, &self.committer, usize::MAX).await;
        if let Some(handle) = self.flusher.lock().await.take() {
            handle.abort();
        }
    }
}

/// Drains currently pending items, grouped by key in submission order, and
/// invokes the committer once per distinct key. Returns whether the
/// batcher was closed (so the background flusher can stop).
async fn flush_once<K, I, R, C>(
    state: &Arc<Mutex<State<K, I, R>>>,
    committer: &Arc<C>,
    max_size: usize,
) -> bool
where
    K: Eq + std::hash::Hash + Clone + Send + Sync,
    I: Send + Sync,
    R: Clone + Send + Sync,
    C: Committer<K, I, R>,
{
    let (batch, closed) = {
        let mut state = state.lock().await;
        let take = batch_take_len(state.pending.len(), max_size);
        let batch: Vec<_> = state.pending.drain(..take).collect();
        (batch, state.closed)
    };
    if batch.is_empty() {
        return closed;
    }

    let mut order: Vec<K> = Vec::new();
    let mut grouped: HashMap<usize, (K, Vec<I>, Vec<oneshot::Sender<Result<R>>>)> = HashMap::new();
    let mut key_to_slot: HashMap<K, usize> = HashMap::new();

    for p in batch {
        let slot = *key_to_slot.entry(p.key.clone()).or_insert_with(|| {
            let slot = order.len();
            order.push(p.key.clone());
            slot
        });
        grouped
            .entry(slot)
            .or_insert_with(|| (p.key.clone(), Vec::new(), Vec::new()))
            .1
            .push(p.item);
        grouped.get_mut(&slot).unwrap().2.push(p.reply);
    }

    for (slot_idx, key) in order.into_iter().enumerate() {
        let (_, items, replies) = grouped.remove(&slot_idx).expect("slot present");
        debug!(batch_size = items.len(), "batcher: committing one key group");
        let mut results = committer.commit(&key, &items).await;
        if results.len() < replies.len() {
            warn!(
                expected = replies.len(),
                got = results.len(),
                "batcher: commit callback under-reported results; broadcasting a whole-batch error to the rest"
            );
            while results.len() < replies.len() {
                results.push(Err(Error::Other(
                    "commit callback returned no per-item verdict".into(),
                )));
            }
        }
        for (reply, result) in replies.into_iter().zip(results.into_iter()) {
            let _ = reply.send(result);
        }
    }

    closed
}

fn batch_take_len(len: usize, max_size: usize) -> usize {
    len.min(max_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCommitter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Committer<String, u32, u32> for CountingCommitter {
        async fn commit(&self, _key: &String, items: &[u32]) -> Vec<Result<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            items.iter().map(|i| Ok(i * 10)).collect()
        }
    }

    #[tokio::test]
    async fn off_mode_commits_one_at_a_time() {
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Off,
                max_batch_size: 10,
                flush_timeout: Duration::from_secs(1),
            },
            CountingCommitter { calls: AtomicUsize::new(0) },
        );
        let r = batcher.commit("k".into(), 4).await.unwrap();
        assert_eq!(r, 40);
    }

    #[tokio::test]
    async fn sync_mode_fans_out_per_item_results_and_groups_by_key() {
        let batcher = Arc::new(Batcher::new(
            BatcherConfig {
                mode: BatchMode::Sync,
                max_batch_size: 4,
                flush_timeout: Duration::from_millis(50),
            },
            CountingCommitter { calls: AtomicUsize::new(0) },
        ));

        let mut handles = Vec::new();
        for (key, item) in [("a", 1u32), ("a", 2), ("b", 3), ("a", 4)] {
            let b = batcher.clone();
            handles.push(tokio::spawn(async move { b.commit(key.to_string(), item).await }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        results.sort();
        assert_eq!(results, vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn shutdown_flushes_in_flight_batch() {
        let batcher = Arc::new(Batcher::new(
            BatcherConfig {
                mode: BatchMode::Sync,
                // Large enough that size alone never triggers a flush, and
                // a flush_timeout long enough that only `shutdown` forces it.
                max_batch_size: 100,
                flush_timeout: Duration::from_secs(60),
            },
            CountingCommitter { calls: AtomicUsize::new(0) },
        ));

        let b = batcher.clone();
        let commit_fut = tokio::spawn(async move { b.commit("k".to_string(), 7).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        batcher.shutdown().await;

        assert_eq!(commit_fut.await.unwrap().unwrap(), 70);
        // A submission after shutdown is refused.
        assert!(batcher.commit("k".to_string(), 1).await.is_err());
    }
}
