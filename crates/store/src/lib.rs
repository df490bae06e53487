//! kindex store: in-RAM indexer, coalescing queue and ingest loop.
//!
//! Readers always see a whole published snapshot. Writers build the next
//! snapshot off to the side and swap it in, one swap per batch.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use kindex_core::{key_of, Delta, DeltaKind, Indexer, IndexerError, NAMESPACE_INDEX};
use metrics::{counter, histogram};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Values an object contributes to one index.
pub type IndexValues = SmallVec<[String; 1]>;

/// Computes the index values of an object.
pub type IndexFunc<K> = Arc<dyn Fn(&K) -> IndexValues + Send + Sync>;

/// Index function keyed by namespace (empty for cluster-scoped objects).
pub fn namespace_index_func<K: kube::Resource + 'static>() -> IndexFunc<K> {
    Arc::new(|obj: &K| -> IndexValues { smallvec![obj.meta().namespace.clone().unwrap_or_default()] })
}

struct Snapshot<K> {
    epoch: u64,
    items: FxHashMap<String, Arc<K>>,
    /// index name -> index value -> keys
    indices: FxHashMap<String, FxHashMap<String, FxHashSet<String>>>,
}

impl<K> Default for Snapshot<K> {
    fn default() -> Self {
        Self { epoch: 0, items: FxHashMap::default(), indices: FxHashMap::default() }
    }
}

impl<K> Clone for Snapshot<K> {
    fn clone(&self) -> Self {
        Self { epoch: self.epoch, items: self.items.clone(), indices: self.indices.clone() }
    }
}

impl<K> Snapshot<K> {
    fn upsert(&mut self, key: String, obj: Arc<K>, indexers: &FxHashMap<String, IndexFunc<K>>) {
        if let Some(old) = self.items.insert(key.clone(), Arc::clone(&obj)) {
            self.unindex(&key, &old, indexers);
        }
        for (name, f) in indexers {
            let idx = self.indices.entry(name.clone()).or_default();
            for value in f(obj.as_ref()) {
                idx.entry(value).or_default().insert(key.clone());
            }
        }
    }

    fn remove(&mut self, key: &str, indexers: &FxHashMap<String, IndexFunc<K>>) {
        if let Some(old) = self.items.remove(key) {
            self.unindex(key, &old, indexers);
        }
    }

    fn unindex(&mut self, key: &str, old: &K, indexers: &FxHashMap<String, IndexFunc<K>>) {
        for (name, f) in indexers {
            let Some(idx) = self.indices.get_mut(name) else { continue };
            for value in f(old) {
                if let Some(keys) = idx.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        idx.remove(&value);
                    }
                }
            }
        }
    }
}

/// Thread-safe indexer over objects of one kind.
///
/// Every write publishes a fresh snapshot (copy of the previous one plus the
/// change), so reads never block and never observe a half-applied batch.
/// Prefer [`Cache::apply`] or [`Cache::replace`] for bulk changes.
pub struct Cache<K> {
    snap: ArcSwap<Snapshot<K>>,
    indexers: FxHashMap<String, IndexFunc<K>>,
}

impl<K: kube::Resource + Send + Sync + 'static> Cache<K> {
    /// Cache with the namespace index registered.
    pub fn new() -> Self {
        let mut indexers = FxHashMap::default();
        indexers.insert(NAMESPACE_INDEX.to_string(), namespace_index_func::<K>());
        Self::with_indexers(indexers)
    }

    /// Cache with exactly the given indices.
    pub fn with_indexers(indexers: FxHashMap<String, IndexFunc<K>>) -> Self {
        Self { snap: ArcSwap::from_pointee(Snapshot::default()), indexers }
    }

    pub fn len(&self) -> usize {
        self.snap.load().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of snapshots published so far.
    pub fn epoch(&self) -> u64 {
        self.snap.load().epoch
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.snap.load().items.keys().cloned().collect()
    }

    /// Insert or replace an object.
    pub fn add(&self, obj: impl Into<Arc<K>>) -> u64 {
        self.apply(vec![Delta::applied(obj)])
    }

    pub fn update(&self, obj: impl Into<Arc<K>>) -> u64 {
        self.add(obj)
    }

    pub fn delete(&self, obj: impl Into<Arc<K>>) -> u64 {
        self.apply(vec![Delta::deleted(obj)])
    }

    /// Apply a batch of deltas as a single snapshot; returns the new epoch.
    pub fn apply(&self, batch: Vec<Delta<K>>) -> u64 {
        let started = Instant::now();
        let count = batch.len() as u64;
        let keyed: Vec<(String, Delta<K>)> = batch.into_iter().map(|d| (key_of(d.obj.as_ref()), d)).collect();
        let epoch = self.publish(|next| {
            for (key, d) in keyed.iter() {
                match d.kind {
                    DeltaKind::Applied => next.upsert(key.clone(), Arc::clone(&d.obj), &self.indexers),
                    DeltaKind::Deleted => next.remove(key, &self.indexers),
                }
            }
        });
        counter!("cache_apply_total", count);
        histogram!("cache_apply_ms", started.elapsed().as_secs_f64() * 1000.0);
        epoch
    }

    /// Replace the whole content, as after a relist.
    pub fn replace(&self, items: Vec<Arc<K>>) -> u64 {
        let keyed: Vec<(String, Arc<K>)> = items.into_iter().map(|o| (key_of(o.as_ref()), o)).collect();
        let epoch = self.publish(|next| {
            next.items.clear();
            next.indices.clear();
            for (key, obj) in keyed.iter() {
                next.upsert(key.clone(), Arc::clone(obj), &self.indexers);
            }
        });
        debug!(items = keyed.len(), epoch, "cache replaced");
        epoch
    }

    fn publish(&self, change: impl Fn(&mut Snapshot<K>)) -> u64 {
        let prev = self.snap.rcu(|cur| {
            let mut next: Snapshot<K> = (**cur).clone();
            change(&mut next);
            next.epoch = cur.epoch.saturating_add(1);
            next
        });
        prev.epoch.saturating_add(1)
    }
}

impl<K: kube::Resource + Send + Sync + 'static> Default for Cache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Send + Sync> Indexer<K> for Cache<K> {
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, IndexerError> {
        Ok(self.snap.load().items.get(key).cloned())
    }

    fn list(&self) -> Result<Vec<Arc<K>>, IndexerError> {
        Ok(self.snap.load().items.values().cloned().collect())
    }

    fn by_index(&self, index_name: &str, value: &str) -> Result<Vec<Arc<K>>, IndexerError> {
        if !self.indexers.contains_key(index_name) {
            return Err(IndexerError::IndexNotFound(index_name.to_string()));
        }
        let snap = self.snap.load();
        let Some(keys) = snap.indices.get(index_name).and_then(|idx| idx.get(value)) else {
            return Ok(Vec::new());
        };
        Ok(keys.iter().filter_map(|k| snap.items.get(k).cloned()).collect())
    }
}

/// Coalescing queue keyed by object key, FIFO by first arrival.
///
/// Never drops a delta: once `cap` distinct keys are pending, [`Coalescer::push`]
/// reports the queue full and the owner must drain it before pushing more.
pub struct Coalescer<K> {
    map: FxHashMap<String, Delta<K>>,
    order: VecDeque<String>,
    cap: usize,
}

impl<K: kube::Resource> Coalescer<K> {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1) }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn is_full(&self) -> bool { self.order.len() >= self.cap }

    /// Queue a delta; a later delta for the same key replaces the pending one.
    /// Returns true when the queue is full and must be drained.
    pub fn push(&mut self, d: Delta<K>) -> bool {
        let key = key_of(d.obj.as_ref());
        if !self.map.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.map.insert(key, d);
        self.is_full()
    }

    /// Drain all pending deltas in arrival order of their keys.
    pub fn drain_ready(&mut self) -> Vec<Delta<K>> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&key) {
                out.push(d);
            }
        }
        out
    }
}

/// Ingest loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Channel and coalescer capacity.
    pub cap: usize,
    /// Flush interval.
    pub tick: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { cap: 2048, tick: Duration::from_millis(8) }
    }
}

impl IngestConfig {
    /// Read `KINDEX_INGEST_CAP` and `KINDEX_INGEST_TICK_MS`, keeping defaults for unset or invalid values.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`IngestConfig::from_env`] with variables resolved by `lookup`.
    /// Zero values are raised to the smallest usable setting.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let def = Self::default();
        let cap = lookup("KINDEX_INGEST_CAP").and_then(|s| s.trim().parse::<usize>().ok()).unwrap_or(def.cap);
        let tick = lookup("KINDEX_INGEST_TICK_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(def.tick);
        Self { cap: cap.max(1), tick: tick.max(Duration::from_millis(1)) }
    }
}

/// Handle on a running ingest loop.
pub struct IngestHandle {
    epoch_rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl IngestHandle {
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Wait until the cache has published at least `epoch`; false on timeout or loop exit.
    pub async fn wait_for_epoch(&self, epoch: u64, timeout: Duration) -> bool {
        let mut rx = self.epoch_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|e| *e >= epoch)).await.map(|r| r.is_ok()).unwrap_or(false)
    }

    /// Wait for the loop to drain and stop. All senders must be dropped first.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "ingest task failed");
        }
    }
}

/// Spawn the loop that feeds `cache`. Returns a sender for deltas and a handle on the loop.
pub fn spawn_ingest<K>(cache: Arc<Cache<K>>, cfg: IngestConfig) -> (mpsc::Sender<Delta<K>>, IngestHandle)
where
    K: kube::Resource + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Delta<K>>(cfg.cap);
    let (epoch_tx, epoch_rx) = watch::channel(cache.epoch());

    let task = tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cfg.cap);
        let mut ticker = tokio::time::interval(cfg.tick);
        let flush = |coalescer: &mut Coalescer<K>| {
            let batch = coalescer.drain_ready();
            if !batch.is_empty() {
                let n = batch.len();
                let epoch = cache.apply(batch);
                debug!(deltas = n, epoch, "flushed batch");
                let _ = epoch_tx.send(epoch);
            }
        };
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(d) => {
                            if coalescer.push(d) {
                                counter!("ingest_full_flush_total", 1u64);
                                flush(&mut coalescer);
                            }
                        }
                        None => {
                            debug!("delta channel closed; draining and exiting ingest loop");
                            flush(&mut coalescer);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => flush(&mut coalescer),
            }
        }
        info!(epoch = cache.epoch(), "ingest loop stopped");
    });

    (tx, IngestHandle { epoch_rx, task })
}
