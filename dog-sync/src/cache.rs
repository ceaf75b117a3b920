//! Local document cache.
//!
//! One partition per (tenant, collection) holding the document map, the
//! ordered pending-mutation log, the last-synced cursor, the logical clock,
//! the tombstone watermarks of confirmed deletes and the documents pushed at
//! least once without an acknowledgement. Every operation runs under a
//! single write lock and never awaits, so a cancelled sync round cannot leave a
//! partition half-updated.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    conflict::{resolve, Resolution, VersionStamp},
    remote::{RemoteChange, RemoteRecord},
    ConfirmedState, Document, DocumentId, MutationOp,
    PartitionKey, Payload, PendingMutation, ReplicaId, SyncError, SyncResult, SyncState,
};

/// Serializable image of one partition, used by hosts to persist the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    pub partition: PartitionKey,
    /// Sorted by id
    pub documents: Vec<Document>,
    pub pending: Vec<PendingMutation>,
    /// Sorted by id
    pub tombstones: Vec<(DocumentId, VersionStamp)>,
    /// Unconfirmed documents that may already exist remotely, sorted
    #[serde(default)]
    pub sent: Vec<DocumentId>,
    pub cursor: u64,
    pub clock: u64,
    pub next_seq: u64,
    pub modified: u64,
}

impl PartitionSnapshot {
    pub fn empty(partition: PartitionKey) -> Self {
        Self {
            partition,
            documents: Vec::new(),
            pending: Vec::new(),
            tombstones: Vec::new(),
            sent: Vec::new(),
            cursor: 0,
            clock: 0,
            next_seq: 0,
            modified: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeleteOutcome {
    /// Never sent to the remote store: removed outright, nothing to push
    Discarded,
    Tombstoned { seq: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    Applied,
    Ignored,
    /// The delta met a pending local write of the same document
    Resolved { winner: VersionStamp, loser: VersionStamp },
}

#[derive(Debug, Clone, Default)]
struct Partition {
    documents: HashMap<DocumentId, Document>,
    pending: VecDeque<PendingMutation>,
    tombstones: HashMap<DocumentId, VersionStamp>,
    sent: HashSet<DocumentId>,
    cursor: u64,
    clock: u64,
    next_seq: u64,
    modified: u64,
    in_flight: Option<u64>,
}

fn confirmed_from(record: &RemoteRecord) -> Option<ConfirmedState> {
    match (&record.payload, record.is_tombstone()) {
        (Some(payload), false) => Some(ConfirmedState {
            payload: payload.clone(),
            stamp: record.stamp.clone(),
        }),
        _ => None,
    }
}

impl Partition {
    fn touch(&mut self) -> u64 {
        self.modified += 1;
        self.modified
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn observe(&mut self, version: u64) {
        self.clock = self.clock.max(version);
    }

    fn has_pending_for(&self, id: &DocumentId) -> bool {
        self.pending.iter().any(|m| &m.document_id == id)
    }

    fn drop_pending_for(&mut self, id: &DocumentId) {
        self.pending.retain(|m| &m.document_id != id);
    }

    fn push_mutation(&mut self, document_id: DocumentId, op: MutationOp, stamp: VersionStamp) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.pending.push_back(PendingMutation {
            seq,
            document_id,
            op,
            stamp,
            queued_at: Utc::now(),
        });
        seq
    }

    fn take_mutation(&mut self, seq: u64) -> Option<PendingMutation> {
        let idx = self.pending.iter().position(|m| m.seq == seq)?;
        self.pending.remove(idx)
    }

    fn raise_watermark(&mut self, id: &DocumentId, stamp: &VersionStamp) {
        let mark = self.tombstones.entry(id.clone()).or_insert_with(|| stamp.clone());
        if stamp > mark {
            *mark = stamp.clone();
        }
    }

    fn bury(&mut self, id: &DocumentId, stamp: &VersionStamp) {
        self.documents.remove(id);
        self.sent.remove(id);
        self.raise_watermark(id, stamp);
    }

    /// Generation of the next local write to `id`
    fn generation_for(&self, id: &DocumentId) -> u64 {
        let current = self
            .documents
            .get(id)
            .map_or(0, |d| d.stamp.successor_generation());
        let buried = self
            .tombstones
            .get(id)
            .map_or(0, VersionStamp::successor_generation);
        current.max(buried)
    }

    /// Make `record` the synced local state of its document
    fn install(&mut self, record: &RemoteRecord) {
        let Some(confirmed) = confirmed_from(record) else {
            self.bury(&record.id, &record.stamp);
            return;
        };
        let modified_seq = self.touch();
        self.sent.remove(&record.id);
        self.documents.insert(
            record.id.clone(),
            Document {
                id: record.id.clone(),
                payload: confirmed.payload.clone(),
                stamp: confirmed.stamp.clone(),
                sync_state: SyncState::Synced,
                modified_seq,
                confirmed: Some(confirmed),
            },
        );
    }

    fn upsert(&mut self, replica: &ReplicaId, id: DocumentId, payload: Payload) -> (Document, u64) {
        let generation = self.generation_for(&id);
        let stamp = VersionStamp::update(self.tick(), replica.clone()).in_generation(generation);
        let modified_seq = self.touch();
        let confirmed = self.documents.get(&id).and_then(|d| d.confirmed.clone());
        let document = Document {
            id: id.clone(),
            payload: payload.clone(),
            stamp: stamp.clone(),
            sync_state: SyncState::Pending,
            modified_seq,
            confirmed,
        };
        self.documents.insert(id.clone(), document.clone());
        let seq = self.push_mutation(id, MutationOp::Upsert(payload), stamp);
        (document, seq)
    }

    fn delete(&mut self, replica: &ReplicaId, id: &DocumentId) -> SyncResult<DeleteOutcome> {
        let (never_confirmed, generation) = match self.documents.get(id) {
            Some(doc) if !doc.is_deleted() => (doc.confirmed.is_none(), doc.stamp.generation),
            _ => return Err(SyncError::not_found(format!("document {id}"))),
        };
        // a push whose answer never arrived may still have landed remotely
        if never_confirmed && !self.sent.contains(id) {
            self.documents.remove(id);
            self.drop_pending_for(id);
            return Ok(DeleteOutcome::Discarded);
        }

        let in_flight = self.in_flight;
        let stamp = VersionStamp::delete(self.tick(), replica.clone()).in_generation(generation);
        let modified_seq = self.touch();
        if let Some(doc) = self.documents.get_mut(id) {
            doc.stamp = stamp.clone();
            doc.sync_state = SyncState::Pending;
            doc.modified_seq = modified_seq;
        }
        // queued upserts are superseded by the delete; an in-flight one stays for its answer
        self.pending
            .retain(|m| &m.document_id != id || Some(m.seq) == in_flight);
        let seq = self.push_mutation(id.clone(), MutationOp::Delete, stamp);
        Ok(DeleteOutcome::Tombstoned { seq })
    }

    fn apply_remote(&mut self, record: &RemoteRecord) -> ApplyOutcome {
        self.observe(record.stamp.version);
        let outranked = |current: &VersionStamp| resolve(current, &record.stamp) != Resolution::TakeIncoming;
        if self.tombstones.get(&record.id).is_some_and(outranked) {
            return ApplyOutcome::Ignored;
        }

        let Some(doc) = self.documents.get(&record.id) else {
            self.install(record);
            return ApplyOutcome::Applied;
        };
        if doc.confirmed.as_ref().is_some_and(|c| outranked(&c.stamp)) {
            return ApplyOutcome::Ignored;
        }

        let local = doc.stamp.clone();
        let pending = self.has_pending_for(&record.id);
        match resolve(&local, &record.stamp) {
            Resolution::Identical => ApplyOutcome::Ignored,
            Resolution::KeepCurrent if !pending => ApplyOutcome::Ignored,
            Resolution::KeepCurrent => {
                // the local write stands; remember what the remote holds meanwhile
                let confirmed = confirmed_from(record);
                if confirmed.is_none() {
                    self.raise_watermark(&record.id, &record.stamp);
                }
                if let Some(doc) = self.documents.get_mut(&record.id) {
                    doc.confirmed = confirmed;
                }
                ApplyOutcome::Resolved {
                    winner: local,
                    loser: record.stamp.clone(),
                }
            }
            Resolution::TakeIncoming if !pending => {
                self.install(record);
                ApplyOutcome::Applied
            }
            Resolution::TakeIncoming => {
                self.drop_pending_for(&record.id);
                self.install(record);
                ApplyOutcome::Resolved {
                    winner: record.stamp.clone(),
                    loser: local,
                }
            }
        }
    }

    fn confirm(&mut self, seq: u64, accepted: &RemoteRecord) -> Option<PendingMutation> {
        let mutation = self.take_mutation(seq)?;
        self.observe(accepted.stamp.version);
        let id = &mutation.document_id;
        let later = self.has_pending_for(id);

        match &mutation.op {
            MutationOp::Upsert(payload) => {
                self.sent.remove(id);
                if let Some(doc) = self.documents.get_mut(id) {
                    doc.confirmed = Some(ConfirmedState {
                        payload: payload.clone(),
                        stamp: mutation.stamp.clone(),
                    });
                    if !later && doc.stamp == mutation.stamp {
                        doc.sync_state = SyncState::Synced;
                    }
                }
            }
            MutationOp::Delete if later => {
                if let Some(doc) = self.documents.get_mut(id) {
                    doc.confirmed = None;
                }
                self.raise_watermark(id, &mutation.stamp);
            }
            MutationOp::Delete => self.bury(id, &mutation.stamp),
        }
        Some(mutation)
    }

    fn supersede(&mut self, seq: u64, current: &RemoteRecord) -> Option<(VersionStamp, VersionStamp)> {
        let mutation = self.take_mutation(seq)?;
        self.observe(current.stamp.version);
        if self.has_pending_for(&mutation.document_id) {
            let confirmed = confirmed_from(current);
            if confirmed.is_none() {
                self.raise_watermark(&current.id, &current.stamp);
            }
            if let Some(doc) = self.documents.get_mut(&mutation.document_id) {
                doc.confirmed = confirmed;
                doc.sync_state = SyncState::Conflict;
            }
        } else {
            self.install(current);
        }
        Some((current.stamp.clone(), mutation.stamp))
    }

    fn rollback(&mut self, seq: u64) -> Option<DocumentId> {
        let mutation = self.take_mutation(seq)?;
        let id = mutation.document_id;
        self.drop_pending_for(&id);
        self.sent.remove(&id);

        match self.documents.get(&id).and_then(|d| d.confirmed.clone()) {
            Some(confirmed) => {
                let modified_seq = self.touch();
                if let Some(doc) = self.documents.get_mut(&id) {
                    doc.payload = confirmed.payload;
                    doc.stamp = confirmed.stamp;
                    doc.sync_state = SyncState::Synced;
                    doc.modified_seq = modified_seq;
                }
            }
            None => {
                self.documents.remove(&id);
            }
        }
        Some(id)
    }

    fn advance_cursor(&mut self, cursor: u64) -> SyncResult<()> {
        if cursor < self.cursor {
            return Err(SyncError::corruption(format!(
                "cursor regressed from {} to {}",
                self.cursor, cursor
            )));
        }
        self.cursor = cursor;
        Ok(())
    }

    fn check_invariants(&self) -> SyncResult<()> {
        let mut last = 0;
        for m in &self.pending {
            if m.seq <= last {
                return Err(SyncError::corruption(format!(
                    "pending sequence {} does not follow {}",
                    m.seq, last
                )));
            }
            last = m.seq;
            if m.seq > self.next_seq {
                return Err(SyncError::corruption(format!(
                    "pending sequence {} ahead of allocator {}",
                    m.seq, self.next_seq
                )));
            }
            if !self.documents.contains_key(&m.document_id) {
                return Err(SyncError::corruption(format!(
                    "pending {} for missing document {}",
                    m.op.name(),
                    m.document_id
                )));
            }
        }
        for (id, doc) in &self.documents {
            if &doc.id != id {
                return Err(SyncError::corruption(format!("document {} stored under {}", doc.id, id)));
            }
            if doc.stamp.version > self.clock {
                return Err(SyncError::corruption(format!(
                    "document {} version {} ahead of clock {}",
                    id, doc.stamp.version, self.clock
                )));
            }
        }
        Ok(())
    }

    fn snapshot(&self, partition: &PartitionKey) -> PartitionSnapshot {
        let mut documents: Vec<_> = self.documents.values().cloned().collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        let mut tombstones: Vec<_> = self
            .tombstones
            .iter()
            .map(|(id, stamp)| (id.clone(), stamp.clone()))
            .collect();
        tombstones.sort_by(|a, b| a.0.cmp(&b.0));
        let mut sent: Vec<_> = self.sent.iter().cloned().collect();
        sent.sort();
        PartitionSnapshot {
            partition: partition.clone(),
            documents,
            pending: self.pending.iter().cloned().collect(),
            tombstones,
            sent,
            cursor: self.cursor,
            clock: self.clock,
            next_seq: self.next_seq,
            modified: self.modified,
        }
    }

    fn from_snapshot(snapshot: PartitionSnapshot) -> SyncResult<Self> {
        let expected = snapshot.documents.len();
        let partition = Self {
            documents: snapshot
                .documents
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
            pending: snapshot.pending.into(),
            tombstones: snapshot.tombstones.into_iter().collect(),
            sent: snapshot.sent.into_iter().collect(),
            cursor: snapshot.cursor,
            clock: snapshot.clock,
            next_seq: snapshot.next_seq,
            modified: snapshot.modified,
            in_flight: None,
        };
        if partition.documents.len() != expected {
            return Err(SyncError::corruption("duplicate document ids in snapshot"));
        }
        partition.check_invariants()?;
        Ok(partition)
    }
}

/// Process-scoped local cache owned by a [`SyncEngine`](crate::SyncEngine)
#[derive(Debug)]
pub(crate) struct LocalCache {
    replica: ReplicaId,
    partitions: RwLock<HashMap<PartitionKey, Partition>>,
}

impl LocalCache {
    pub(crate) fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    fn read<T>(&self, partition: &PartitionKey, f: impl FnOnce(&Partition) -> T) -> Option<T> {
        self.partitions.read().get(partition).map(f)
    }

    fn write<T>(&self, partition: &PartitionKey, f: impl FnOnce(&mut Partition) -> T) -> T {
        let mut partitions = self.partitions.write();
        f(partitions.entry(partition.clone()).or_default())
    }

    /// Live documents, most recently modified first, then by id
    pub(crate) fn list(&self, partition: &PartitionKey) -> Vec<Document> {
        let mut docs = self
            .read(partition, |p| {
                p.documents
                    .values()
                    .filter(|d| !d.is_deleted())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| {
            b.modified_seq
                .cmp(&a.modified_seq)
                .then_with(|| a.id.cmp(&b.id))
        });
        docs
    }

    pub(crate) fn get(&self, partition: &PartitionKey, id: &DocumentId) -> Option<Document> {
        self.read(partition, |p| p.documents.get(id).filter(|d| !d.is_deleted()).cloned())
            .flatten()
    }

    pub(crate) fn upsert(
        &self,
        partition: &PartitionKey,
        id: Option<DocumentId>,
        payload: Payload,
    ) -> (Document, u64) {
        let id = id.unwrap_or_default();
        self.write(partition, |p| p.upsert(&self.replica, id, payload))
    }

    pub(crate) fn delete(&self, partition: &PartitionKey, id: &DocumentId) -> SyncResult<DeleteOutcome> {
        self.write(partition, |p| p.delete(&self.replica, id))
    }

    pub(crate) fn pending_len(&self, partition: &PartitionKey) -> usize {
        self.read(partition, |p| p.pending.len()).unwrap_or(0)
    }

    pub(crate) fn pending_batch(&self, partition: &PartitionKey, limit: usize) -> Vec<PendingMutation> {
        self.read(partition, |p| p.pending.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn cursor(&self, partition: &PartitionKey) -> u64 {
        self.read(partition, |p| p.cursor).unwrap_or(0)
    }

    /// Mark `seq` as in flight; `None` if it left the log meanwhile
    pub(crate) fn begin_push(&self, partition: &PartitionKey, seq: u64) -> Option<PendingMutation> {
        self.write(partition, |p| {
            let mutation = p.pending.iter().find(|m| m.seq == seq).cloned()?;
            p.in_flight = Some(seq);
            p.sent.insert(mutation.document_id.clone());
            Some(mutation)
        })
    }

    pub(crate) fn end_push(&self, partition: &PartitionKey) {
        self.write(partition, |p| p.in_flight = None);
    }

    /// Apply one page of remote changes and move the cursor, under one lock
    pub(crate) fn apply_batch(
        &self,
        partition: &PartitionKey,
        changes: &[RemoteChange],
        next_cursor: u64,
    ) -> SyncResult<Vec<(RemoteRecord, ApplyOutcome)>> {
        self.write(partition, |p| {
            p.advance_cursor(next_cursor)?;
            Ok(changes
                .iter()
                .map(|c| (c.record.clone(), p.apply_remote(&c.record)))
                .collect())
        })
    }

    #[cfg(test)]
    fn apply_remote(&self, partition: &PartitionKey, record: &RemoteRecord) -> ApplyOutcome {
        self.write(partition, |p| p.apply_remote(record))
    }

    pub(crate) fn confirm(&self, partition: &PartitionKey, seq: u64, accepted: &RemoteRecord) -> Option<PendingMutation> {
        self.write(partition, |p| p.confirm(seq, accepted))
    }

    /// Settle a write the remote store outranked; returns (winner, loser)
    pub(crate) fn supersede(
        &self,
        partition: &PartitionKey,
        seq: u64,
        current: &RemoteRecord,
    ) -> Option<(VersionStamp, VersionStamp)> {
        self.write(partition, |p| p.supersede(seq, current))
    }

    pub(crate) fn rollback(&self, partition: &PartitionKey, seq: u64) -> Option<DocumentId> {
        self.write(partition, |p| p.rollback(seq))
    }

    pub(crate) fn check_invariants(&self, partition: &PartitionKey) -> SyncResult<()> {
        self.read(partition, Partition::check_invariants)
            .unwrap_or(Ok(()))
    }

    /// Discard all local state of `partition`
    pub(crate) fn reset(&self, partition: &PartitionKey) {
        self.partitions
            .write()
            .insert(partition.clone(), Partition::default());
    }

    pub(crate) fn export(&self, partition: &PartitionKey) -> PartitionSnapshot {
        self.read(partition, |p| p.snapshot(partition))
            .unwrap_or_else(|| PartitionSnapshot::empty(partition.clone()))
    }

    /// Replace a partition with `snapshot`; rejects snapshots that violate invariants
    pub(crate) fn import(&self, snapshot: PartitionSnapshot) -> SyncResult<()> {
        let key = snapshot.partition.clone();
        let partition = Partition::from_snapshot(snapshot)?;
        self.partitions.write().insert(key, partition);
        Ok(())
    }
}
