use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    cache::{DeleteOutcome, LocalCache, PartitionSnapshot},
    connectivity::Connectivity,
    lease::LeaseRegistry,
    observability::SyncMetrics,
    reconciler::{Reconciler, ReconcilerHandle},
    remote::RemoteStore,
    ConnectionState, Document, DocumentId, PartitionKey, PartitionStatus, Payload,
    ReconcilerStatus, ReplicaId, SyncConfig, SyncError, SyncEvent, SyncResult,
};

pub type EventStream = Pin<Box<dyn Stream<Item = SyncEvent> + Send + 'static>>;

/// Result of [`SyncEngine::import_snapshot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Restored,
    /// The snapshot was inconsistent; the partition starts empty and resyncs
    Rebuilt { reason: String },
}

struct AttachedPartition {
    handle: ReconcilerHandle,
    status: watch::Receiver<ReconcilerStatus>,
    wake: Arc<Notify>,
}

struct EngineInner {
    replica: ReplicaId,
    cache: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    leases: Arc<LeaseRegistry>,
    connectivity: Connectivity,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    metrics: Arc<SyncMetrics>,
    attached: Mutex<HashMap<PartitionKey, AttachedPartition>>,
}

/// Owns the local cache of one replica and the reconcilers of its attached
/// partitions. Cloning is cheap and shares everything.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

pub struct SyncEngineBuilder {
    remote: Arc<dyn RemoteStore>,
    replica: Option<ReplicaId>,
    config: SyncConfig,
    connectivity: Option<Connectivity>,
    leases: Option<Arc<LeaseRegistry>>,
}

impl SyncEngineBuilder {
    pub fn with_replica(mut self, replica: impl Into<ReplicaId>) -> Self {
        self.replica = Some(replica.into());
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Share a lease registry with other engines driving the same partitions
    pub fn with_leases(mut self, leases: Arc<LeaseRegistry>) -> Self {
        self.leases = Some(leases);
        self
    }

    pub fn build(self) -> SyncEngine {
        let replica = self.replica.unwrap_or_default();
        let leases = self
            .leases
            .unwrap_or_else(|| Arc::new(LeaseRegistry::new(self.config.lease_ttl)));
        let (events, _) = broadcast::channel(self.config.event_capacity);

        SyncEngine {
            inner: Arc::new(EngineInner {
                cache: Arc::new(LocalCache::new(replica.clone())),
                replica,
                remote: self.remote,
                leases,
                connectivity: self.connectivity.unwrap_or_default(),
                config: self.config,
                events,
                metrics: Arc::new(SyncMetrics::new()),
                attached: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl SyncEngine {
    pub fn builder(remote: Arc<dyn RemoteStore>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            remote,
            replica: None,
            config: SyncConfig::default(),
            connectivity: None,
            leases: None,
        }
    }

    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self::builder(remote).build()
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.inner.replica
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn leases(&self) -> &Arc<LeaseRegistry> {
        &self.inner.leases
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.inner.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Sync events as a stream; lagged events are skipped
    pub fn event_stream(&self) -> EventStream {
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// Start the reconciler for `partition` under a fresh lease
    #[instrument(skip_all, fields(tenant_id = %partition.tenant_id, collection = %partition.collection))]
    pub fn attach(&self, partition: &PartitionKey) -> SyncResult<()> {
        let mut attached = self.inner.attached.lock();
        if attached.contains_key(partition) {
            return Err(SyncError::LeaseHeld {
                partition: partition.to_string(),
                holder: self.inner.replica.to_string(),
            });
        }
        let lease = self.inner.leases.acquire(partition, &self.inner.replica)?;

        let (reconciler, status) = Reconciler::new(
            partition.clone(),
            Arc::clone(&self.inner.cache),
            Arc::clone(&self.inner.remote),
            self.inner.config.clone(),
            self.inner.events.clone(),
            Arc::clone(&self.inner.metrics),
        );
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let run = reconciler.run(
            shutdown_rx,
            self.inner.connectivity.subscribe(),
            Arc::clone(&wake),
            lease,
        );
        let engine = Arc::downgrade(&self.inner);
        let key = partition.clone();
        let join_handle = tokio::spawn(async move {
            let result = run.await;
            // lost lease: the entry is stale, free the slot for a later attach
            if result.is_err() {
                if let Some(inner) = engine.upgrade() {
                    inner.attached.lock().remove(&key);
                    inner.cache.end_push(&key);
                    warn!("Partition {} detached after losing its lease", key);
                }
            }
            result
        });

        attached.insert(
            partition.clone(),
            AttachedPartition {
                handle: ReconcilerHandle::new(shutdown_tx, join_handle),
                status,
                wake,
            },
        );
        info!("Attached partition {}", partition);
        Ok(())
    }

    /// Stop the reconciler, cancelling any in-flight round. Local state is kept.
    #[instrument(skip_all, fields(tenant_id = %partition.tenant_id, collection = %partition.collection))]
    pub async fn detach(&self, partition: &PartitionKey) -> SyncResult<()> {
        let entry = self.inner.attached.lock().remove(partition);
        let Some(entry) = entry else {
            return Err(SyncError::not_found(format!("attached partition {partition}")));
        };
        entry.handle.shutdown().await?;
        self.inner.cache.end_push(partition);
        info!("Detached partition {}", partition);
        Ok(())
    }

    /// Detach every partition
    pub async fn shutdown(&self) -> SyncResult<()> {
        let entries: Vec<_> = self.inner.attached.lock().drain().collect();
        for (partition, entry) in entries {
            entry.handle.shutdown().await?;
            self.inner.cache.end_push(&partition);
        }
        Ok(())
    }

    pub fn is_attached(&self, partition: &PartitionKey) -> bool {
        self.inner.attached.lock().contains_key(partition)
    }

    pub fn attached_partitions(&self) -> Vec<PartitionKey> {
        let mut partitions: Vec<_> = self.inner.attached.lock().keys().cloned().collect();
        partitions.sort_by_key(|p| p.to_string());
        partitions
    }

    pub fn status(&self, partition: &PartitionKey) -> PartitionStatus {
        let (attached, reconciler) = match self.inner.attached.lock().get(partition) {
            Some(entry) => (true, entry.status.borrow().clone()),
            None => (false, ReconcilerStatus::default()),
        };
        PartitionStatus {
            partition: partition.clone(),
            attached,
            state: reconciler.state,
            pending: self.inner.cache.pending_len(partition),
            cursor: self.inner.cache.cursor(partition),
            rounds_finished: reconciler.rounds_finished,
            last_error: reconciler.last_error,
            last_synced_at: reconciler.last_synced_at,
        }
    }

    pub fn is_online(&self, partition: &PartitionKey) -> bool {
        self.status(partition).is_online()
    }

    fn watch_status(&self, partition: &PartitionKey) -> SyncResult<(watch::Receiver<ReconcilerStatus>, Arc<Notify>)> {
        self.inner
            .attached
            .lock()
            .get(partition)
            .map(|entry| (entry.status.clone(), Arc::clone(&entry.wake)))
            .ok_or_else(|| SyncError::not_found(format!("attached partition {partition}")))
    }

    fn wake(&self, partition: &PartitionKey) {
        if let Some(entry) = self.inner.attached.lock().get(partition) {
            entry.wake.notify_one();
        }
    }

    /// Trigger a round and wait until one started after this call has finished
    pub async fn sync_now(&self, partition: &PartitionKey, timeout: Duration) -> SyncResult<PartitionStatus> {
        let (mut status, wake) = self.watch_status(partition)?;
        let started = status.borrow().rounds_started;
        wake.notify_one();

        let finished = async {
            status
                .wait_for(|s| s.rounds_finished > started)
                .await
                .map(|_| ())
        };
        match tokio::time::timeout(timeout, finished).await {
            Ok(Ok(())) => Ok(self.status(partition)),
            Ok(Err(_)) => Err(SyncError::Shutdown),
            Err(_) => Err(SyncError::timeout(format!("no sync round on {partition} within {timeout:?}"))),
        }
    }

    /// Run rounds until the partition is idle with an empty pending log
    pub async fn settle(&self, partition: &PartitionKey, timeout: Duration) -> SyncResult<PartitionStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(SyncError::timeout(format!("{partition} did not settle within {timeout:?}")));
            }
            let status = self.sync_now(partition, remaining).await?;
            if status.is_settled() {
                return Ok(status);
            }
        }
    }

    pub async fn wait_for_state(
        &self,
        partition: &PartitionKey,
        state: ConnectionState,
        timeout: Duration,
    ) -> SyncResult<()> {
        let (mut status, _) = self.watch_status(partition)?;
        let reached = async { status.wait_for(|s| s.state == state).await.map(|_| ()) };
        match tokio::time::timeout(timeout, reached).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SyncError::Shutdown),
            Err(_) => Err(SyncError::timeout(format!("{partition} did not reach {state} within {timeout:?}"))),
        }
    }

    pub fn export_snapshot(&self, partition: &PartitionKey) -> PartitionSnapshot {
        self.inner.cache.export(partition)
    }

    /// Restore a persisted partition. Must happen before `attach`.
    pub fn import_snapshot(&self, snapshot: PartitionSnapshot) -> SyncResult<ImportOutcome> {
        let partition = snapshot.partition.clone();
        if self.is_attached(&partition) {
            return Err(SyncError::Conflict(format!(
                "cannot import into attached partition {partition}"
            )));
        }
        match self.inner.cache.import(snapshot) {
            Ok(()) => Ok(ImportOutcome::Restored),
            Err(e) if e.is_corruption() => {
                warn!("Snapshot of {} rejected, starting empty: {}", partition, e);
                self.inner.cache.reset(&partition);
                self.inner.metrics.record_rebuild();
                let reason = e.to_string();
                let _ = self.inner.events.send(SyncEvent::PartitionRebuilt {
                    partition,
                    reason: reason.clone(),
                    at: Utc::now(),
                });
                Ok(ImportOutcome::Rebuilt { reason })
            }
            Err(e) => Err(e),
        }
    }

    fn queued(&self, partition: &PartitionKey, document_id: &DocumentId, seq: u64) {
        self.inner.metrics.record_queued(partition);
        let _ = self.inner.events.send(SyncEvent::MutationQueued {
            partition: partition.clone(),
            document_id: document_id.clone(),
            seq,
            at: Utc::now(),
        });
        self.wake(partition);
    }

    pub(crate) fn upsert(&self, partition: &PartitionKey, id: Option<DocumentId>, payload: Payload) -> Document {
        let (document, seq) = self.inner.cache.upsert(partition, id, payload);
        debug!("Queued upsert of {} in {} as #{}", document.id, partition, seq);
        self.queued(partition, &document.id, seq);
        document
    }

    pub(crate) fn delete(&self, partition: &PartitionKey, id: &DocumentId) -> SyncResult<()> {
        match self.inner.cache.delete(partition, id)? {
            DeleteOutcome::Discarded => {
                debug!("Discarded never-synced document {} in {}", id, partition);
            }
            DeleteOutcome::Tombstoned { seq } => {
                debug!("Queued delete of {} in {} as #{}", id, partition, seq);
                self.queued(partition, id, seq);
            }
        }
        Ok(())
    }

    pub(crate) fn list(&self, partition: &PartitionKey) -> Vec<Document> {
        self.inner.cache.list(partition)
    }

    pub(crate) fn get(&self, partition: &PartitionKey, id: &DocumentId) -> Option<Document> {
        self.inner.cache.get(partition, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;

    fn partition() -> PartitionKey {
        PartitionKey::new("t", "notes")
    }

    fn engine() -> SyncEngine {
        SyncEngine::builder(Arc::new(MemoryRemoteStore::new()))
            .with_replica("r1")
            .with_config(SyncConfig::default().with_sync_interval(Duration::from_millis(20)))
            .build()
    }

    #[tokio::test]
    async fn attaching_twice_is_lease_held() {
        let engine = engine();
        engine.attach(&partition()).unwrap();

        let err = engine.attach(&partition()).unwrap_err();
        assert!(matches!(err, SyncError::LeaseHeld { .. }));
        engine.shutdown().await.unwrap();
        assert!(!engine.is_attached(&partition()));
    }

    #[tokio::test]
    async fn detach_releases_the_lease() {
        let engine = engine();
        engine.attach(&partition()).unwrap();
        assert_eq!(engine.leases().holder(&partition()), Some("r1".into()));

        engine.detach(&partition()).await.unwrap();
        assert!(engine.leases().holder(&partition()).is_none());
        assert!(matches!(
            engine.detach(&partition()).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn losing_the_lease_detaches_the_partition() {
        let leases = Arc::new(LeaseRegistry::new(Duration::from_millis(100)));
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemoteStore::new());
        let first = SyncEngine::builder(remote.clone())
            .with_replica("r1")
            .with_config(SyncConfig::default().with_sync_interval(Duration::from_millis(400)))
            .with_leases(leases.clone())
            .build();
        let second = SyncEngine::builder(remote)
            .with_replica("r2")
            .with_config(SyncConfig::default().with_sync_interval(Duration::from_millis(20)))
            .with_leases(leases.clone())
            .build();
        let mut events = first.event_stream();
        first.attach(&partition()).unwrap();

        // r1 sleeps through its interval while the lease expires
        tokio::time::sleep(Duration::from_millis(200)).await;
        second.attach(&partition()).unwrap();

        let lost = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = events.next().await {
                if matches!(event, SyncEvent::LeaseLost { .. }) {
                    return event;
                }
            }
            panic!("Event stream ended");
        })
        .await
        .expect("Timeout waiting for lease loss");
        assert_eq!(lost.partition(), &partition());

        tokio::time::timeout(Duration::from_secs(1), async {
            while first.is_attached(&partition()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("stale partition still attached");
        assert!(matches!(
            first.sync_now(&partition(), Duration::from_millis(50)).await,
            Err(SyncError::NotFound(_))
        ));
        assert_eq!(leases.holder(&partition()), Some("r2".into()));

        second.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn import_into_attached_partition_conflicts() {
        let engine = engine();
        engine.attach(&partition()).unwrap();

        let err = engine
            .import_snapshot(PartitionSnapshot::empty(partition()))
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn sync_now_requires_attachment() {
        let engine = engine();
        let err = engine
            .sync_now(&partition(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
