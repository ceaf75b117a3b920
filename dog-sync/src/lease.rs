use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{LeaseToken, PartitionKey, ReplicaId, SyncError, SyncResult};

#[derive(Debug, Clone)]
struct LeaseEntry {
    token: LeaseToken,
    holder: ReplicaId,
    expires_at: DateTime<Utc>,
}

/// Grants exclusive right to drive a partition's reconciler.
///
/// Share one registry between every engine that may attach the same
/// partition. Leases expire after the TTL unless renewed.
#[derive(Debug)]
pub struct LeaseRegistry {
    leases: Mutex<HashMap<PartitionKey, LeaseEntry>>,
    ttl: Duration,
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl LeaseRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::seconds(30))
    }

    /// Acquire the partition; fails with `LeaseHeld` while another live lease exists
    pub fn acquire(self: &Arc<Self>, partition: &PartitionKey, holder: &ReplicaId) -> SyncResult<PartitionLease> {
        let now = Utc::now();
        let mut leases = self.leases.lock();
        if let Some(existing) = leases.get(partition) {
            if existing.expires_at > now {
                return Err(SyncError::LeaseHeld {
                    partition: partition.to_string(),
                    holder: existing.holder.to_string(),
                });
            }
            debug!("Taking over expired lease on {} from {}", partition, existing.holder);
        }

        let entry = LeaseEntry {
            token: LeaseToken::new(),
            holder: holder.clone(),
            expires_at: self.expiry(now),
        };
        leases.insert(partition.clone(), entry.clone());
        info!("Replica {} leased partition {}", holder, partition);

        Ok(PartitionLease {
            registry: Arc::clone(self),
            partition: partition.clone(),
            token: entry.token,
            holder: entry.holder,
        })
    }

    /// Extend a live lease; fails if the lease was lost
    pub fn renew(&self, partition: &PartitionKey, token: &LeaseToken) -> SyncResult<DateTime<Utc>> {
        let now = Utc::now();
        let mut leases = self.leases.lock();
        match leases.get_mut(partition) {
            Some(entry) if &entry.token == token => {
                entry.expires_at = self.expiry(now);
                Ok(entry.expires_at)
            }
            Some(entry) => Err(SyncError::LeaseHeld {
                partition: partition.to_string(),
                holder: entry.holder.to_string(),
            }),
            None => Err(SyncError::not_found(format!("lease on {partition}"))),
        }
    }

    /// Release only if `token` still owns the lease
    pub fn release(&self, partition: &PartitionKey, token: &LeaseToken) -> bool {
        let mut leases = self.leases.lock();
        if leases.get(partition).is_some_and(|e| &e.token == token) {
            leases.remove(partition);
            debug!("Released lease on {}", partition);
            return true;
        }
        false
    }

    /// Current live holder of `partition`
    pub fn holder(&self, partition: &PartitionKey) -> Option<ReplicaId> {
        let now = Utc::now();
        self.leases
            .lock()
            .get(partition)
            .filter(|e| e.expires_at > now)
            .map(|e| e.holder.clone())
    }

    /// Drop expired leases; returns how many were reclaimed
    pub fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let mut leases = self.leases.lock();
        let before = leases.len();
        leases.retain(|_, e| e.expires_at > now);
        before - leases.len()
    }
}

/// Held lease; released when dropped
#[derive(Debug)]
pub struct PartitionLease {
    registry: Arc<LeaseRegistry>,
    partition: PartitionKey,
    token: LeaseToken,
    holder: ReplicaId,
}

impl PartitionLease {
    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn token(&self) -> &LeaseToken {
        &self.token
    }

    pub fn holder(&self) -> &ReplicaId {
        &self.holder
    }

    pub fn renew(&self) -> SyncResult<DateTime<Utc>> {
        self.registry.renew(&self.partition, &self.token)
    }
}

impl Drop for PartitionLease {
    fn drop(&mut self) {
        self.registry.release(&self.partition, &self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> PartitionKey {
        PartitionKey::new("t", "events")
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let registry = Arc::new(LeaseRegistry::default());
        let lease = registry.acquire(&partition(), &"r1".into()).unwrap();

        let err = registry.acquire(&partition(), &"r2".into()).unwrap_err();
        assert!(matches!(err, SyncError::LeaseHeld { ref holder, .. } if holder == "r1"));
        assert_eq!(registry.holder(&partition()), Some(ReplicaId::from("r1")));

        drop(lease);
        assert!(registry.acquire(&partition(), &"r2".into()).is_ok());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let registry = Arc::new(LeaseRegistry::new(Duration::ZERO));
        let stale = registry.acquire(&partition(), &"r1".into()).unwrap();
        let fresh = registry.acquire(&partition(), &"r2".into()).unwrap();

        assert!(stale.renew().is_err());
        assert_ne!(stale.token(), fresh.token());
        // the stale guard must not release the new owner's lease
        drop(stale);
        assert!(registry.release(&partition(), fresh.token()));
    }

    #[test]
    fn reaper_drops_expired_entries() {
        let registry = Arc::new(LeaseRegistry::new(Duration::ZERO));
        let lease = registry.acquire(&partition(), &"r1".into()).unwrap();
        assert_eq!(registry.reap_expired(), 1);
        assert!(lease.renew().is_err());
    }
}
