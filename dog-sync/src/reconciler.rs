//! Per-partition sync reconciler.
//!
//! Drives Disconnected → Connecting → Syncing → Idle for one
//! (tenant, collection), pulling remote deltas into the cache and pushing the
//! pending log in sequence order. Failed rounds back off exponentially and
//! degrade to `Error` once retries are exhausted.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cache::{ApplyOutcome, LocalCache},
    conflict::VersionStamp,
    lease::PartitionLease,
    observability::SyncMetrics,
    remote::{RemoteRecord, RemoteStore, WriteOutcome},
    ConnectionState, DocumentId, MutationOp, PartitionKey, PendingMutation, ReconcilerStatus,
    RemoteError, RemoteResult, SyncConfig, SyncError, SyncEvent, SyncResult,
};

/// Handle for a spawned reconciler task
#[derive(Debug)]
pub(crate) struct ReconcilerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<SyncResult<()>>,
}

impl ReconcilerHandle {
    pub(crate) fn new(shutdown_tx: oneshot::Sender<()>, join_handle: JoinHandle<SyncResult<()>>) -> Self {
        Self {
            shutdown_tx,
            join_handle,
        }
    }

    /// Stop the loop, cancelling any round in flight
    pub(crate) async fn shutdown(self) -> SyncResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| SyncError::Internal(format!("Reconciler join error: {}", e)))?
    }
}

/// What one round did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RoundReport {
    pub pushed: usize,
    pub pulled: usize,
    pub conflicts: usize,
    pub rolled_back: usize,
    pub rebuilt: bool,
}

pub(crate) struct Reconciler {
    partition: PartitionKey,
    cache: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    metrics: Arc<SyncMetrics>,
    status: watch::Sender<ReconcilerStatus>,
}

impl Reconciler {
    pub(crate) fn new(
        partition: PartitionKey,
        cache: Arc<LocalCache>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
        events: broadcast::Sender<SyncEvent>,
        metrics: Arc<SyncMetrics>,
    ) -> (Self, watch::Receiver<ReconcilerStatus>) {
        let (status, status_rx) = watch::channel(ReconcilerStatus::default());
        let reconciler = Self {
            partition,
            cache,
            remote,
            config,
            events,
            metrics,
            status,
        };
        (reconciler, status_rx)
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn emit(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, to: ConnectionState) {
        let mut from = to;
        self.status.send_modify(|s| {
            from = s.state;
            s.state = to;
        });
        if from == to {
            return;
        }
        debug!("Partition {} {} -> {}", self.partition, from, to);
        self.emit(SyncEvent::StateChanged {
            partition: self.partition.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Remote answered, or there is work while idle
    fn enter_syncing(&self, has_work: bool) {
        match self.state() {
            ConnectionState::Connecting => self.transition(ConnectionState::Syncing),
            ConnectionState::Idle if has_work => self.transition(ConnectionState::Syncing),
            _ => {}
        }
    }

    /// Main loop; owns the partition lease until it returns.
    ///
    /// Returns the renewal error if the lease was lost to another holder.
    #[instrument(skip_all, fields(tenant_id = %self.partition.tenant_id, collection = %self.partition.collection))]
    pub(crate) async fn run(
        self,
        mut shutdown_rx: oneshot::Receiver<()>,
        mut online: watch::Receiver<bool>,
        wake: Arc<Notify>,
        lease: PartitionLease,
    ) -> SyncResult<()> {
        info!("Reconciler started for {}", self.partition);
        let mut failures: u32 = 0;
        let mut exit = Ok(());

        loop {
            if let Err(e) = lease.renew() {
                self.lease_lost(&e);
                exit = Err(e);
                break;
            }

            if !*online.borrow_and_update() {
                self.transition(ConnectionState::Disconnected);
                failures = 0;
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            let result = tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                changed = online.changed() => {
                    debug!("Connectivity changed, cancelling round on {}", self.partition);
                    self.cache.end_push(&self.partition);
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                result = self.sync_once() => result,
            };

            let wait = match result {
                Ok(_) => {
                    failures = 0;
                    tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => break,
                        changed = online.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep(self.config.sync_interval) => {}
                    }
                    continue;
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        self.degrade(&e);
                        failures = 0;
                        self.config.error_cooldown
                    } else {
                        let backoff = self.config.backoff_for(failures);
                        warn!(
                            "Sync round on {} failed (attempt {}), retrying in {:?}: {}",
                            self.partition, failures, backoff, e
                        );
                        backoff
                    }
                }
            };

            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.cache.end_push(&self.partition);
        self.transition(ConnectionState::Disconnected);
        info!("Reconciler stopped for {}", self.partition);
        exit
    }

    fn lease_lost(&self, cause: &SyncError) {
        error!("Lost lease on {}, stopping reconciler: {}", self.partition, cause);
        self.emit(SyncEvent::LeaseLost {
            partition: self.partition.clone(),
            reason: cause.to_string(),
            at: Utc::now(),
        });
    }

    fn degrade(&self, cause: &SyncError) {
        error!(
            "Sync on {} degraded to offline after {} retries: {}",
            self.partition, self.config.max_retries, cause
        );
        self.transition(ConnectionState::Error);
        self.emit(SyncEvent::Degraded {
            partition: self.partition.clone(),
            error: cause.to_string(),
            at: Utc::now(),
        });
    }

    /// One bounded pull + push round
    #[instrument(skip_all, fields(tenant_id = %self.partition.tenant_id, collection = %self.partition.collection))]
    pub(crate) async fn sync_once(&self) -> SyncResult<RoundReport> {
        let mut round = 0;
        self.status.send_modify(|s| {
            s.rounds_started += 1;
            round = s.rounds_started;
        });
        if !self.state().is_online() {
            self.transition(ConnectionState::Connecting);
        }

        let result = match tokio::time::timeout(self.config.round_timeout, self.round()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::timeout(format!(
                "sync round on {} exceeded {:?}",
                self.partition, self.config.round_timeout
            ))),
        };
        self.cache.end_push(&self.partition);

        match &result {
            Ok(report) => {
                self.transition(ConnectionState::Idle);
                self.status.send_modify(|s| {
                    s.rounds_finished = round;
                    s.consecutive_failures = 0;
                    s.last_error = None;
                    s.last_synced_at = Some(Utc::now());
                });
                if report.pushed + report.pulled + report.rolled_back > 0 {
                    debug!(
                        pushed = report.pushed,
                        pulled = report.pulled,
                        conflicts = report.conflicts,
                        rolled_back = report.rolled_back,
                        "sync round finished"
                    );
                }
            }
            Err(e) => {
                self.status.send_modify(|s| {
                    s.rounds_finished = round;
                    s.consecutive_failures += 1;
                    s.last_error = Some(e.to_string());
                });
            }
        }
        self.metrics.record_round(&self.partition, result.is_ok());
        result
    }

    async fn round(&self) -> SyncResult<RoundReport> {
        let mut report = RoundReport::default();

        if let Err(e) = self.cache.check_invariants(&self.partition) {
            self.rebuild(&e);
            report.rebuilt = true;
        }

        match self.pull(&mut report).await {
            Err(e) if e.is_corruption() && !report.rebuilt => {
                self.rebuild(&e);
                report.rebuilt = true;
                self.pull(&mut report).await?;
            }
            other => other?,
        }

        self.push(&mut report).await?;
        Ok(report)
    }

    fn rebuild(&self, cause: &SyncError) {
        error!("Discarding local state of {} for full resync: {}", self.partition, cause);
        self.cache.reset(&self.partition);
        self.metrics.record_rebuild();
        self.emit(SyncEvent::PartitionRebuilt {
            partition: self.partition.clone(),
            reason: cause.to_string(),
            at: Utc::now(),
        });
    }

    async fn pull(&self, report: &mut RoundReport) -> SyncResult<()> {
        loop {
            let cursor = self.cache.cursor(&self.partition);
            let batch = self
                .remote
                .list_changes_since(&self.partition, cursor, self.config.batch_size)
                .await?;
            let outcomes = self
                .cache
                .apply_batch(&self.partition, &batch.changes, batch.next_cursor)?;
            self.enter_syncing(outcomes.iter().any(|(_, o)| *o != ApplyOutcome::Ignored));

            for (record, outcome) in outcomes {
                match outcome {
                    ApplyOutcome::Applied => {
                        report.pulled += 1;
                        self.metrics.record_remote_applied(1);
                        self.emit(SyncEvent::RemoteApplied {
                            partition: self.partition.clone(),
                            document_id: record.id,
                            version: record.stamp.version,
                            at: Utc::now(),
                        });
                    }
                    ApplyOutcome::Resolved { winner, loser } => {
                        report.pulled += 1;
                        report.conflicts += 1;
                        self.conflict_resolved(record.id, winner, loser);
                    }
                    ApplyOutcome::Ignored => {}
                }
            }

            if !batch.has_more {
                return Ok(());
            }
        }
    }

    async fn push(&self, report: &mut RoundReport) -> SyncResult<()> {
        loop {
            let batch = self.cache.pending_batch(&self.partition, self.config.batch_size);
            if batch.is_empty() {
                return Ok(());
            }
            self.enter_syncing(true);

            let mut progressed = false;
            for mutation in batch {
                progressed |= self.push_one(mutation.seq, report).await?;
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    async fn send(&self, mutation: &PendingMutation) -> RemoteResult<WriteOutcome> {
        match &mutation.op {
            MutationOp::Upsert(payload) => {
                self.remote
                    .put(&self.partition, &mutation.document_id, payload, &mutation.stamp)
                    .await
            }
            MutationOp::Delete => {
                self.remote
                    .delete(&self.partition, &mutation.document_id, &mutation.stamp)
                    .await
            }
        }
    }

    /// Push one mutation; true once it has left the pending log
    async fn push_one(&self, seq: u64, report: &mut RoundReport) -> SyncResult<bool> {
        let Some(mutation) = self.cache.begin_push(&self.partition, seq) else {
            return Ok(false);
        };
        let result = self.send(&mutation).await;
        self.cache.end_push(&self.partition);

        match result {
            Ok(WriteOutcome::Accepted(record)) => {
                report.pushed += 1;
                self.confirmed(&mutation, &record);
            }
            Ok(WriteOutcome::Superseded(current)) => {
                report.conflicts += 1;
                if let Some((winner, loser)) = self.cache.supersede(&self.partition, seq, &current) {
                    self.conflict_resolved(mutation.document_id, winner, loser);
                }
            }
            Err(RemoteError::Rejected(reason)) => {
                report.rolled_back += 1;
                self.rolled_back(&mutation, reason);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    fn confirmed(&self, mutation: &PendingMutation, accepted: &RemoteRecord) {
        if self.cache.confirm(&self.partition, mutation.seq, accepted).is_none() {
            return;
        }
        self.metrics.record_confirmed(&self.partition);
        debug!(
            "Confirmed {} of {} at version {}",
            mutation.op.name(),
            mutation.document_id,
            accepted.stamp.version
        );
        self.emit(SyncEvent::MutationConfirmed {
            partition: self.partition.clone(),
            document_id: mutation.document_id.clone(),
            seq: mutation.seq,
            version: accepted.stamp.version,
            at: Utc::now(),
        });
    }

    fn rolled_back(&self, mutation: &PendingMutation, reason: String) {
        let Some(document_id) = self.cache.rollback(&self.partition, mutation.seq) else {
            return;
        };
        warn!(
            "Remote rejected {} of {}, rolled back: {}",
            mutation.op.name(),
            document_id,
            reason
        );
        self.metrics.record_rollback(&self.partition);
        self.emit(SyncEvent::RolledBack {
            partition: self.partition.clone(),
            document_id,
            reason,
            at: Utc::now(),
        });
    }

    fn conflict_resolved(&self, document_id: DocumentId, winner: VersionStamp, loser: VersionStamp) {
        info!(
            document_id = %document_id,
            winner_version = winner.version,
            winner = %winner.writer,
            loser_version = loser.version,
            loser = %loser.writer,
            "conflict resolved"
        );
        self.metrics.record_conflict(&self.partition);
        self.emit(SyncEvent::ConflictResolved {
            partition: self.partition.clone(),
            document_id,
            winner,
            loser,
            at: Utc::now(),
        });
    }
}
