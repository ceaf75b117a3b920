use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_stream::StreamExt;

use dog_sync::{
    remote::MemoryRemoteStore, Connectivity, ConnectionState, EventStream, GatewayConfig,
    ImportOutcome, LeaseRegistry, MutationGateway, PartitionKey, Payload, RemoteRecord, Session,
    SyncConfig, SyncEngine, SyncError, SyncEvent, SyncState, VersionStamp,
};
use dog_tenancy::{
    backend::memory::MemoryTenancyBackend, AccessEvaluator, MembershipStore, Role, TenantMembership,
};

const WAIT: Duration = Duration::from_secs(3);

struct Tenancy {
    store: Arc<MembershipStore<MemoryTenancyBackend>>,
    evaluator: AccessEvaluator,
}

/// Tenant "t" with admin "A" and member "M"
fn tenancy() -> Tenancy {
    let backend = Arc::new(MemoryTenancyBackend::new());
    backend.seed_membership(TenantMembership::new("t".into(), "A".into(), Role::Admin));
    backend.seed_membership(TenantMembership::new("t".into(), "M".into(), Role::Member));
    let store = Arc::new(MembershipStore::new(backend));
    let evaluator = AccessEvaluator::new(store.clone());
    Tenancy { store, evaluator }
}

fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_sync_interval(Duration::from_millis(20))
        .with_round_timeout(Duration::from_millis(200))
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_max_retries(2)
        .with_error_cooldown(Duration::from_millis(50))
}

struct Replica {
    gateway: MutationGateway,
    connectivity: Connectivity,
}

impl Replica {
    fn engine(&self) -> &SyncEngine {
        self.gateway.engine()
    }
}

fn build_replica(
    remote: &MemoryRemoteStore,
    name: &str,
    online: bool,
    config: SyncConfig,
    evaluator: AccessEvaluator,
    leases: Option<Arc<LeaseRegistry>>,
) -> Replica {
    let connectivity = Connectivity::new(online);
    let mut builder = SyncEngine::builder(Arc::new(remote.clone()))
        .with_replica(name)
        .with_config(config)
        .with_connectivity(connectivity.clone());
    if let Some(leases) = leases {
        builder = builder.with_leases(leases);
    }
    let gateway = MutationGateway::with_config(
        builder.build(),
        evaluator,
        GatewayConfig::new().with_admin_collection("settings"),
    );
    Replica {
        gateway,
        connectivity,
    }
}

fn replica(remote: &MemoryRemoteStore, name: &str, online: bool) -> Replica {
    build_replica(remote, name, online, fast_config(), tenancy().evaluator, None)
}

fn notes() -> PartitionKey {
    PartitionKey::new("t", "notes")
}

fn member() -> Session {
    Session::verified("M")
}

fn payload(value: Value) -> Payload {
    Payload::from_value(value).unwrap()
}

async fn next_matching(stream: &mut EventStream, matches: impl Fn(&SyncEvent) -> bool) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        while let Some(event) = stream.next().await {
            if matches(&event) {
                return event;
            }
        }
        panic!("Event stream ended");
    })
    .await
    .expect("Timeout waiting for event")
}

/// A1. Local writes are visible immediately in any connectivity state
#[tokio::test]
async fn test_upsert_visible_in_any_connectivity_state() {
    let remote = MemoryRemoteStore::new();
    let r = replica(&remote, "r1", false);
    r.gateway.open(&member(), &notes()).await.unwrap();
    r.engine()
        .wait_for_state(&notes(), ConnectionState::Disconnected, WAIT)
        .await
        .unwrap();

    // Act: write while offline
    let doc = r
        .gateway
        .upsert(&member(), &notes(), Some("d1".into()), json!({ "title": "offline" }))
        .await
        .unwrap();

    // Assert: listed right away, pending
    let listed = r.gateway.list(&member(), &notes()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, doc.id);
    assert_eq!(listed[0].sync_state, SyncState::Pending);
    assert!(!r.engine().is_online(&notes()));

    // Same once online
    r.connectivity.set_online(true);
    r.engine().settle(&notes(), WAIT).await.unwrap();
    let second = r
        .gateway
        .upsert(&member(), &notes(), None, json!({ "title": "online" }))
        .await
        .unwrap();
    let ids: Vec<_> = r
        .gateway
        .list(&member(), &notes())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec![second.id, doc.id]);

    r.engine().shutdown().await.unwrap();
}

/// A2. Denied writes and reads are surfaced, never dropped
#[tokio::test]
async fn test_denied_access_is_surfaced() {
    let remote = MemoryRemoteStore::new();
    let r = replica(&remote, "r1", true);
    let settings = PartitionKey::new("t", "settings");

    let stranger = r
        .gateway
        .upsert(&Session::verified("X"), &notes(), None, json!({ "a": 1 }))
        .await;
    assert!(matches!(stranger, Err(SyncError::PermissionDenied(_))));

    // member lacks the admin role on an admin-restricted collection
    let write = r.gateway.upsert(&member(), &settings, None, json!({ "a": 1 })).await;
    assert!(matches!(write, Err(SyncError::PermissionDenied(_))));
    let read = r.gateway.list(&member(), &settings).await;
    assert!(matches!(read, Err(SyncError::PermissionDenied(_))));

    let admin = Session::verified("A");
    r.gateway.upsert(&admin, &settings, None, json!({ "a": 1 })).await.unwrap();
    assert_eq!(r.gateway.list(&admin, &settings).await.unwrap().len(), 1);

    // another tenant's partition is out of reach
    let foreign = r
        .gateway
        .list(&admin, &PartitionKey::new("other", "notes"))
        .await;
    assert!(matches!(foreign, Err(SyncError::PermissionDenied(_))));
}

/// A3. Revocation takes effect on the next write
#[tokio::test]
async fn test_revoked_member_loses_write_access() {
    let remote = MemoryRemoteStore::new();
    let tenancy = tenancy();
    let r = build_replica(&remote, "r1", true, fast_config(), tenancy.evaluator.clone(), None);

    r.gateway.upsert(&member(), &notes(), None, json!({ "n": 1 })).await.unwrap();

    let grant = tenancy
        .evaluator
        .require_admin(&"A".into(), &"t".into())
        .await
        .unwrap();
    tenancy.store.revoke(&grant, &"M".into()).await.unwrap();

    let err = r
        .gateway
        .upsert(&member(), &notes(), None, json!({ "n": 2 }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PermissionDenied(_)));
}

/// B1. Offline write reaches the remote store after reconnect
#[tokio::test]
async fn test_offline_upsert_round_trips_after_reconnect() {
    let remote = MemoryRemoteStore::new();
    let r = replica(&remote, "r1", false);
    r.gateway.open(&member(), &notes()).await.unwrap();

    let doc = r
        .gateway
        .upsert(&member(), &notes(), None, json!({ "title": "agenda", "items": 3 }))
        .await
        .unwrap();
    assert!(remote.record(&notes(), &doc.id).is_none());

    // Act: reconnect
    r.connectivity.set_online(true);
    let status = r.engine().settle(&notes(), WAIT).await.unwrap();

    // Assert: same payload remotely, synced locally
    assert!(status.is_online());
    let record = remote.record(&notes(), &doc.id).unwrap();
    assert_eq!(record.payload, Some(payload(json!({ "title": "agenda", "items": 3 }))));
    let local = r.gateway.get(&member(), &notes(), &doc.id).await.unwrap();
    assert_eq!(local.sync_state, SyncState::Synced);
    assert_eq!(r.engine().metrics().mutations_confirmed(), 1);

    r.engine().shutdown().await.unwrap();
}

async fn converge(first_online: usize) -> (Value, Value, Value) {
    let remote = MemoryRemoteStore::new();
    let replicas = [replica(&remote, "r-a", false), replica(&remote, "r-b", false)];

    for (n, r) in replicas.iter().enumerate() {
        r.gateway.open(&member(), &notes()).await.unwrap();
        r.gateway
            .upsert(&member(), &notes(), Some("d1".into()), json!({ "from": n }))
            .await
            .unwrap();
    }

    let order = [first_online, 1 - first_online];
    for n in order {
        replicas[n].connectivity.set_online(true);
        replicas[n].engine().settle(&notes(), WAIT).await.unwrap();
    }
    for n in order {
        replicas[n].engine().settle(&notes(), WAIT).await.unwrap();
    }

    let local = |n: usize| {
        replicas[n]
            .engine()
            .export_snapshot(&notes())
            .documents
            .into_iter()
            .find(|d| d.id.as_str() == "d1")
            .unwrap()
            .payload
            .into_value()
    };
    let remote_payload = remote
        .record(&notes(), &"d1".into())
        .unwrap()
        .payload
        .unwrap()
        .into_value();
    let result = (local(0), local(1), remote_payload);
    for r in &replicas {
        r.engine().shutdown().await.unwrap();
    }
    result
}

/// B2. Concurrent offline writes converge to one winner regardless of sync order
#[tokio::test]
async fn test_two_replicas_converge_deterministically() {
    let a_first = converge(0).await;
    let b_first = converge(1).await;

    // equal versions: the larger writer id wins
    let winner = json!({ "from": 1 });
    assert_eq!(a_first, (winner.clone(), winner.clone(), winner.clone()));
    assert_eq!(b_first, a_first);
}

/// B3. A local delete beats a concurrent remote update at the same version
#[tokio::test]
async fn test_tombstone_dominates_concurrent_update() {
    let remote = MemoryRemoteStore::new();
    let r = replica(&remote, "r1", true);
    let mut events = r.engine().event_stream();
    r.gateway.open(&member(), &notes()).await.unwrap();
    r.gateway
        .upsert(&member(), &notes(), Some("d1".into()), json!({ "v": 1 }))
        .await
        .unwrap();
    r.engine().settle(&notes(), WAIT).await.unwrap();

    // Arrange: delete offline while another writer updates at version 2
    r.connectivity.set_online(false);
    r.engine()
        .wait_for_state(&notes(), ConnectionState::Disconnected, WAIT)
        .await
        .unwrap();
    r.gateway.delete(&member(), &notes(), &"d1".into()).await.unwrap();
    remote.write_external(
        &notes(),
        RemoteRecord {
            id: "d1".into(),
            payload: Some(payload(json!({ "v": "theirs" }))),
            stamp: VersionStamp::update(2, "zz".into()),
        },
    );

    // Act
    r.connectivity.set_online(true);
    r.engine().settle(&notes(), WAIT).await.unwrap();

    // Assert: deleted on both sides
    assert!(remote.record(&notes(), &"d1".into()).unwrap().is_tombstone());
    assert!(r.gateway.list(&member(), &notes()).await.unwrap().is_empty());
    let event = next_matching(&mut events, |e| matches!(e, SyncEvent::ConflictResolved { .. })).await;
    let SyncEvent::ConflictResolved { winner, .. } = event else {
        unreachable!();
    };
    assert!(winner.tombstone);

    r.engine().shutdown().await.unwrap();
}

async fn is_live(r: &Replica, id: &str) -> bool {
    r.gateway.get(&member(), &notes(), &id.into()).await.is_ok()
}

/// Liveness of d1 on (remote, deleting replica, updating replica)
async fn delete_against_update(deleter_first: bool, deleter_writes: usize, updater_writes: usize) -> (bool, bool, bool) {
    let remote = MemoryRemoteStore::new();
    let deleter = replica(&remote, "r-a", true);
    let updater = replica(&remote, "r-b", true);
    for r in [&deleter, &updater] {
        r.gateway.open(&member(), &notes()).await.unwrap();
    }
    deleter
        .gateway
        .upsert(&member(), &notes(), Some("d1".into()), json!({ "v": 0 }))
        .await
        .unwrap();
    deleter.engine().settle(&notes(), WAIT).await.unwrap();
    updater.engine().settle(&notes(), WAIT).await.unwrap();

    // Arrange: both offline; extra writes move each logical clock ahead
    for r in [&deleter, &updater] {
        r.connectivity.set_online(false);
        r.engine()
            .wait_for_state(&notes(), ConnectionState::Disconnected, WAIT)
            .await
            .unwrap();
    }
    for n in 0..deleter_writes {
        deleter.gateway.upsert(&member(), &notes(), Some(format!("a{n}").into()), json!({ "n": n })).await.unwrap();
    }
    deleter.gateway.delete(&member(), &notes(), &"d1".into()).await.unwrap();
    for n in 0..updater_writes {
        updater.gateway.upsert(&member(), &notes(), Some(format!("b{n}").into()), json!({ "n": n })).await.unwrap();
    }
    updater
        .gateway
        .upsert(&member(), &notes(), Some("d1".into()), json!({ "v": "updated" }))
        .await
        .unwrap();

    // Act
    let order = if deleter_first { [&deleter, &updater] } else { [&updater, &deleter] };
    for r in order {
        r.connectivity.set_online(true);
        r.engine().settle(&notes(), WAIT).await.unwrap();
    }
    for r in order {
        r.engine().settle(&notes(), WAIT).await.unwrap();
    }

    let remote_live = !remote.record(&notes(), &"d1".into()).unwrap().is_tombstone();
    let outcome = (remote_live, is_live(&deleter, "d1").await, is_live(&updater, "d1").await);

    // a write made after seeing the delete brings the document back everywhere
    updater
        .gateway
        .upsert(&member(), &notes(), Some("d1".into()), json!({ "v": "recreated" }))
        .await
        .unwrap();
    updater.engine().settle(&notes(), WAIT).await.unwrap();
    deleter.engine().settle(&notes(), WAIT).await.unwrap();
    let recreated = deleter.gateway.get(&member(), &notes(), &"d1".into()).await.unwrap();
    assert_eq!(recreated.payload, payload(json!({ "v": "recreated" })));

    for r in [&deleter, &updater] {
        r.engine().shutdown().await.unwrap();
    }
    outcome
}

/// B4. Delete and concurrent update resolve to deleted whatever the sync order
#[tokio::test]
async fn test_delete_dominates_update_in_either_sync_order() {
    let deleted = (false, false, false);
    for deleter_first in [true, false] {
        // update at an earlier version than the delete
        assert_eq!(delete_against_update(deleter_first, 2, 0).await, deleted);
        // equal versions
        assert_eq!(delete_against_update(deleter_first, 0, 0).await, deleted);
        // update at a later version than the delete
        assert_eq!(delete_against_update(deleter_first, 0, 2).await, deleted);
    }
}

/// B5. A quiet partition reaches Idle within the sync interval
#[tokio::test]
async fn test_quiet_partition_reaches_idle() {
    let remote = MemoryRemoteStore::new();
    let interval = Duration::from_millis(500);
    let r = build_replica(
        &remote,
        "r1",
        true,
        fast_config().with_sync_interval(interval),
        tenancy().evaluator,
        None,
    );

    r.gateway.open(&member(), &notes()).await.unwrap();
    r.engine()
        .wait_for_state(&notes(), ConnectionState::Idle, interval)
        .await
        .unwrap();
    assert!(r.engine().status(&notes()).is_settled());

    r.engine().shutdown().await.unwrap();
}

/// C1. A rejected write is rolled back to the last confirmed state
#[tokio::test]
async fn test_rejected_write_rolls_back() {
    let remote = MemoryRemoteStore::new();
    let r = replica(&remote, "r1", true);
    let mut events = r.engine().event_stream();
    r.gateway.open(&member(), &notes()).await.unwrap();
    r.gateway
        .upsert(&member(), &notes(), Some("d1".into()), json!({ "v": 1 }))
        .await
        .unwrap();
    r.engine().settle(&notes(), WAIT).await.unwrap();

    // Arrange: remote refuses further writes to d1 and d2
    remote.reject_writes(&notes(), &"d1".into(), "read-only");
    remote.reject_writes(&notes(), &"d2".into(), "read-only");

    // Act
    r.gateway
        .upsert(&member(), &notes(), Some("d1".into()), json!({ "v": 2 }))
        .await
        .unwrap();
    r.gateway
        .upsert(&member(), &notes(), Some("d2".into()), json!({ "v": 1 }))
        .await
        .unwrap();
    r.engine().settle(&notes(), WAIT).await.unwrap();

    // Assert: d1 back to v1, d2 gone
    let d1 = r.gateway.get(&member(), &notes(), &"d1".into()).await.unwrap();
    assert_eq!(d1.payload, payload(json!({ "v": 1 })));
    assert_eq!(d1.sync_state, SyncState::Synced);
    let d2 = r.gateway.get(&member(), &notes(), &"d2".into()).await;
    assert!(matches!(d2, Err(SyncError::NotFound(_))));

    let event = next_matching(&mut events, |e| matches!(e, SyncEvent::RolledBack { .. })).await;
    assert_eq!(event.event_name(), "rolled_back");
    assert_eq!(r.engine().metrics().rollbacks(), 2);

    r.engine().shutdown().await.unwrap();
}

/// C2. Exhausted retries degrade to Error, then recover after the outage
#[tokio::test]
async fn test_outage_degrades_then_recovers() {
    let remote = MemoryRemoteStore::new();
    remote.set_online(false);
    let r = replica(&remote, "r1", true);
    let mut events = r.engine().event_stream();

    r.gateway.open(&member(), &notes()).await.unwrap();
    r.gateway.upsert(&member(), &notes(), None, json!({ "n": 1 })).await.unwrap();

    let degraded = next_matching(&mut events, |e| matches!(e, SyncEvent::Degraded { .. })).await;
    assert_eq!(degraded.partition(), &notes());
    r.engine()
        .wait_for_state(&notes(), ConnectionState::Error, WAIT)
        .await
        .unwrap();
    assert!(r.engine().status(&notes()).last_error.is_some());

    // Act: store comes back
    remote.set_online(true);
    let status = r.engine().settle(&notes(), WAIT).await.unwrap();

    assert_eq!(status.state, ConnectionState::Idle);
    assert!(status.last_error.is_none());
    assert_eq!(remote.live_records(&notes()).len(), 1);

    r.engine().shutdown().await.unwrap();
}

/// C3. Only one reconciler may drive a partition
#[tokio::test]
async fn test_second_attach_is_lease_held() {
    let remote = MemoryRemoteStore::new();
    let leases = Arc::new(LeaseRegistry::default());
    let first = build_replica(&remote, "r1", true, fast_config(), tenancy().evaluator, Some(leases.clone()));
    let second = build_replica(&remote, "r2", true, fast_config(), tenancy().evaluator, Some(leases.clone()));

    first.gateway.open(&member(), &notes()).await.unwrap();
    let err = second.gateway.open(&member(), &notes()).await.unwrap_err();
    assert!(matches!(err, SyncError::LeaseHeld { ref holder, .. } if holder == "r1"));

    // released on close
    first.gateway.close(&member(), &notes()).await.unwrap();
    second.gateway.open(&member(), &notes()).await.unwrap();
    assert_eq!(leases.holder(&notes()), Some("r2".into()));

    second.engine().shutdown().await.unwrap();
}

/// C4. Deleting a never-synced document generates no remote write
#[tokio::test]
async fn test_deleting_unsynced_document_skips_remote() {
    let remote = MemoryRemoteStore::new();
    let r = replica(&remote, "r1", false);
    r.gateway.open(&member(), &notes()).await.unwrap();

    let doc = r.gateway.upsert(&member(), &notes(), None, json!({ "n": 1 })).await.unwrap();
    r.gateway.delete(&member(), &notes(), &doc.id).await.unwrap();
    assert_eq!(r.engine().status(&notes()).pending, 0);

    r.connectivity.set_online(true);
    r.engine().settle(&notes(), WAIT).await.unwrap();
    assert_eq!(remote.change_count(&notes()), 0);
    assert!(remote.record(&notes(), &doc.id).is_none());

    r.engine().shutdown().await.unwrap();
}

/// C5. Pending writes survive a snapshot round trip into a new engine
#[tokio::test]
async fn test_snapshot_restores_pending_writes() {
    let remote = MemoryRemoteStore::new();
    let before = replica(&remote, "r1", false);
    let doc = before
        .gateway
        .upsert(&member(), &notes(), None, json!({ "n": 1 }))
        .await
        .unwrap();
    let snapshot = before.engine().export_snapshot(&notes());

    let after = replica(&remote, "r1", true);
    let outcome = after.engine().import_snapshot(snapshot).unwrap();
    assert_eq!(outcome, ImportOutcome::Restored);

    after.gateway.open(&member(), &notes()).await.unwrap();
    after.engine().settle(&notes(), WAIT).await.unwrap();
    assert!(remote.record(&notes(), &doc.id).is_some());

    after.engine().shutdown().await.unwrap();
}

/// C6. An inconsistent snapshot is discarded and the partition resyncs
#[tokio::test]
async fn test_corrupted_snapshot_is_rebuilt() {
    let remote = MemoryRemoteStore::new();
    let source = replica(&remote, "r1", true);
    source.gateway.open(&member(), &notes()).await.unwrap();
    for n in 0..2 {
        source.gateway.upsert(&member(), &notes(), None, json!({ "n": n })).await.unwrap();
    }
    source.engine().settle(&notes(), WAIT).await.unwrap();
    source.engine().shutdown().await.unwrap();

    // Arrange: document versions ahead of the logical clock
    let mut snapshot = source.engine().export_snapshot(&notes());
    snapshot.clock = 0;

    let target = replica(&remote, "r2", true);
    let mut events = target.engine().event_stream();
    let outcome = target.engine().import_snapshot(snapshot).unwrap();
    assert!(matches!(outcome, ImportOutcome::Rebuilt { .. }));
    next_matching(&mut events, |e| matches!(e, SyncEvent::PartitionRebuilt { .. })).await;

    // Act: full resync
    target.gateway.open(&member(), &notes()).await.unwrap();
    target.engine().settle(&notes(), WAIT).await.unwrap();

    assert_eq!(target.gateway.list(&member(), &notes()).await.unwrap().len(), 2);
    target.engine().shutdown().await.unwrap();
}

/// C7. Detaching cancels an in-flight round promptly
#[tokio::test]
async fn test_detach_cancels_in_flight_round() {
    let remote = MemoryRemoteStore::new();
    remote.set_latency(Duration::from_secs(5));
    let r = build_replica(
        &remote,
        "r1",
        true,
        fast_config().with_round_timeout(Duration::from_secs(10)),
        tenancy().evaluator,
        None,
    );
    r.gateway.open(&member(), &notes()).await.unwrap();
    r.gateway.upsert(&member(), &notes(), None, json!({ "n": 1 })).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_millis(500), r.gateway.close(&member(), &notes()))
        .await
        .expect("detach should not wait for the remote")
        .unwrap();

    let status = r.engine().status(&notes());
    assert!(!status.attached);
    assert_eq!(status.pending, 1);
    assert!(r.engine().leases().holder(&notes()).is_none());
}
