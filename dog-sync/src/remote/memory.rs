use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{ChangeBatch, RemoteChange, RemoteRecord, RemoteStore, WriteOutcome};
use crate::{
    conflict::{resolve, Resolution, VersionStamp},
    DocumentId, PartitionKey, Payload, RemoteError, RemoteResult,
};

#[derive(Debug, Default)]
struct RemotePartition {
    records: HashMap<DocumentId, RemoteRecord>,
    log: Vec<RemoteChange>,
    next_cursor: u64,
}

impl RemotePartition {
    fn write(&mut self, record: RemoteRecord) -> WriteOutcome {
        if let Some(current) = self.records.get(&record.id) {
            match resolve(&current.stamp, &record.stamp) {
                Resolution::Identical => return WriteOutcome::Accepted(current.clone()),
                Resolution::KeepCurrent => return WriteOutcome::Superseded(current.clone()),
                Resolution::TakeIncoming => {}
            }
        }
        self.next_cursor += 1;
        self.log.push(RemoteChange {
            cursor: self.next_cursor,
            record: record.clone(),
        });
        self.records.insert(record.id.clone(), record.clone());
        WriteOutcome::Accepted(record)
    }
}

#[derive(Default)]
struct Faults {
    offline: AtomicBool,
    latency_ms: AtomicU64,
    fail_next: AtomicU32,
    rejected: RwLock<HashMap<(PartitionKey, DocumentId), String>>,
}

/// In-process remote store for tests and development.
///
/// Cloning shares the same state, so several replicas can sync against one
/// instance. Fault injection covers outages, latency and write rejections.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    partitions: Arc<RwLock<HashMap<PartitionKey, RemotePartition>>>,
    faults: Arc<Faults>,
    calls: Arc<AtomicU64>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable`
    pub fn set_online(&self, online: bool) {
        self.faults.offline.store(!online, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with `Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.faults.fail_next.store(count, Ordering::SeqCst);
    }

    /// Reject every write to `id` with `reason`
    pub fn reject_writes(&self, partition: &PartitionKey, id: &DocumentId, reason: impl Into<String>) {
        self.faults
            .rejected
            .write()
            .insert((partition.clone(), id.clone()), reason.into());
    }

    pub fn clear_rejections(&self) {
        self.faults.rejected.write().clear();
    }

    /// Write on behalf of another writer, bypassing fault injection
    pub fn write_external(&self, partition: &PartitionKey, record: RemoteRecord) -> WriteOutcome {
        self.partitions
            .write()
            .entry(partition.clone())
            .or_default()
            .write(record)
    }

    pub fn record(&self, partition: &PartitionKey, id: &DocumentId) -> Option<RemoteRecord> {
        self.partitions
            .read()
            .get(partition)
            .and_then(|p| p.records.get(id).cloned())
    }

    /// Live (non-tombstoned) records, sorted by id
    pub fn live_records(&self, partition: &PartitionKey) -> Vec<RemoteRecord> {
        let partitions = self.partitions.read();
        let mut records: Vec<_> = partitions
            .get(partition)
            .map(|p| p.records.values().filter(|r| !r.is_tombstone()).cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn change_count(&self, partition: &PartitionKey) -> usize {
        self.partitions.read().get(partition).map_or(0, |p| p.log.len())
    }

    /// Number of calls received through the `RemoteStore` trait
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.faults.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::unavailable("remote store is offline"));
        }
        let failed = self
            .faults
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RemoteError::unavailable("injected failure"));
        }
        Ok(())
    }

    fn check_rejection(&self, partition: &PartitionKey, id: &DocumentId) -> RemoteResult<()> {
        match self.faults.rejected.read().get(&(partition.clone(), id.clone())) {
            Some(reason) => Err(RemoteError::rejected(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, partition: &PartitionKey, id: &DocumentId) -> RemoteResult<Option<RemoteRecord>> {
        self.enter().await?;
        Ok(self.record(partition, id))
    }

    async fn put(
        &self,
        partition: &PartitionKey,
        id: &DocumentId,
        payload: &Payload,
        stamp: &VersionStamp,
    ) -> RemoteResult<WriteOutcome> {
        self.enter().await?;
        self.check_rejection(partition, id)?;
        let outcome = self.write_external(
            partition,
            RemoteRecord {
                id: id.clone(),
                payload: Some(payload.clone()),
                stamp: stamp.clone(),
            },
        );
        debug!("put {} in {} -> {:?}", id, partition, matches!(outcome, WriteOutcome::Accepted(_)));
        Ok(outcome)
    }

    async fn delete(
        &self,
        partition: &PartitionKey,
        id: &DocumentId,
        stamp: &VersionStamp,
    ) -> RemoteResult<WriteOutcome> {
        self.enter().await?;
        self.check_rejection(partition, id)?;
        Ok(self.write_external(
            partition,
            RemoteRecord {
                id: id.clone(),
                payload: None,
                stamp: stamp.clone(),
            },
        ))
    }

    async fn list_changes_since(
        &self,
        partition: &PartitionKey,
        cursor: u64,
        limit: usize,
    ) -> RemoteResult<ChangeBatch> {
        self.enter().await?;
        let partitions = self.partitions.read();
        let Some(p) = partitions.get(partition) else {
            return Ok(ChangeBatch {
                changes: Vec::new(),
                next_cursor: cursor,
                has_more: false,
            });
        };

        let mut newer = p.log.iter().filter(|c| c.cursor > cursor);
        let changes: Vec<_> = newer.by_ref().take(limit).cloned().collect();
        let has_more = newer.next().is_some();
        let next_cursor = changes.last().map_or(cursor, |c| c.cursor);
        Ok(ChangeBatch {
            changes,
            next_cursor,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn partition() -> PartitionKey {
        PartitionKey::new("t", "notes")
    }

    fn payload(n: i64) -> Payload {
        Payload::from_value(json!({ "n": n })).unwrap()
    }

    #[tokio::test]
    async fn put_is_conditional_on_stamp_order() {
        let store = MemoryRemoteStore::new();
        let id = DocumentId::from("d1");

        let first = store.put(&partition(), &id, &payload(1), &VersionStamp::update(2, "b".into())).await.unwrap();
        assert!(matches!(first, WriteOutcome::Accepted(_)));

        let stale = store.put(&partition(), &id, &payload(2), &VersionStamp::update(2, "a".into())).await.unwrap();
        assert!(matches!(stale, WriteOutcome::Superseded(r) if r.stamp.writer.as_str() == "b"));

        // replay of the current write
        let replay = store.put(&partition(), &id, &payload(1), &VersionStamp::update(2, "b".into())).await.unwrap();
        assert!(matches!(replay, WriteOutcome::Accepted(_)));
        assert_eq!(store.change_count(&partition()), 1);
    }

    #[tokio::test]
    async fn concurrent_update_cannot_revive_tombstone() {
        let store = MemoryRemoteStore::new();
        let id = DocumentId::from("d1");
        store.delete(&partition(), &id, &VersionStamp::delete(2, "a".into())).await.unwrap();

        // written later in version terms, but without having seen the delete
        let late = store.put(&partition(), &id, &payload(1), &VersionStamp::update(9, "b".into())).await.unwrap();
        assert!(matches!(late, WriteOutcome::Superseded(r) if r.is_tombstone()));

        let recreated = VersionStamp::update(3, "b".into()).in_generation(1);
        let outcome = store.put(&partition(), &id, &payload(2), &recreated).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Accepted(_)));
        assert_eq!(store.live_records(&partition()).len(), 1);
    }

    fn arb_write() -> impl Strategy<Value = RemoteRecord> {
        (0usize..3, 1u64..5, prop_oneof![Just("a"), Just("b")], any::<bool>(), 0u64..2).prop_map(
            |(doc, version, writer, tombstone, generation)| {
                let stamp = if tombstone {
                    VersionStamp::delete(version, writer.into())
                } else {
                    VersionStamp::update(version, writer.into())
                };
                RemoteRecord {
                    id: DocumentId::from(format!("d{doc}")),
                    payload: (!tombstone).then(|| payload(version as i64)),
                    stamp: stamp.in_generation(generation),
                }
            },
        )
    }

    fn final_records(writes: &[RemoteRecord]) -> Vec<Option<RemoteRecord>> {
        let store = MemoryRemoteStore::new();
        for write in writes {
            store.write_external(&partition(), write.clone());
        }
        (0..3)
            .map(|n| store.record(&partition(), &DocumentId::from(format!("d{n}"))))
            .collect()
    }

    proptest! {
        #[test]
        fn final_state_ignores_write_order(writes in proptest::collection::vec(arb_write(), 1..10)) {
            let mut reversed = writes.clone();
            reversed.reverse();
            prop_assert_eq!(final_records(&writes), final_records(&reversed));
        }
    }

    #[tokio::test]
    async fn change_log_pages_by_cursor() {
        let store = MemoryRemoteStore::new();
        for i in 0..5 {
            let id = DocumentId::from(format!("d{i}"));
            store.put(&partition(), &id, &payload(i), &VersionStamp::update(1, "w".into())).await.unwrap();
        }

        let page = store.list_changes_since(&partition(), 0, 2).await.unwrap();
        assert_eq!(page.changes.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, 2);

        let rest = store.list_changes_since(&partition(), page.next_cursor, 10).await.unwrap();
        assert_eq!(rest.changes.len(), 3);
        assert!(!rest.has_more);

        let empty = store.list_changes_since(&partition(), 5, 10).await.unwrap();
        assert!(empty.changes.is_empty());
        assert_eq!(empty.next_cursor, 5);
    }

    #[tokio::test]
    async fn faults_are_injected() {
        let store = MemoryRemoteStore::new();
        let id = DocumentId::from("d1");

        store.set_online(false);
        let err = store.get(&partition(), &id).await.unwrap_err();
        assert!(err.is_retryable());
        store.set_online(true);

        store.fail_next(1);
        assert!(store.get(&partition(), &id).await.is_err());
        assert!(store.get(&partition(), &id).await.is_ok());

        store.reject_writes(&partition(), &id, "quota exceeded");
        let err = store.put(&partition(), &id, &payload(1), &VersionStamp::update(1, "w".into())).await.unwrap_err();
        assert_eq!(err, RemoteError::Rejected("quota exceeded".into()));
    }
}
