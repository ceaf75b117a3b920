//! Deterministic conflict resolution.
//!
//! Every write carries a [`VersionStamp`]. Stamps are totally ordered by
//! `(generation, tombstone, version, writer)`:
//!
//! 1. a write made after observing a delete of the document starts a new
//!    generation and beats everything from older generations;
//! 2. within a generation a delete beats every update, whatever its version;
//! 3. otherwise the higher logical version wins;
//! 4. at an equal version and kind, the lexicographically smaller writer loses.
//!
//! The order never consults wall-clock time, so every replica and the remote
//! store pick the same winner no matter in which order the writes reach them.
//! An update can only outrank a delete if its writer had seen that delete.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ReplicaId;

/// Logical version of a document write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionStamp {
    /// Per-partition logical clock value
    pub version: u64,
    pub writer: ReplicaId,
    pub tombstone: bool,
    /// Deletes of this document the writer had observed
    #[serde(default)]
    pub generation: u64,
}

impl VersionStamp {
    pub fn update(version: u64, writer: ReplicaId) -> Self {
        Self {
            version,
            writer,
            tombstone: false,
            generation: 0,
        }
    }

    pub fn delete(version: u64, writer: ReplicaId) -> Self {
        Self {
            version,
            writer,
            tombstone: true,
            generation: 0,
        }
    }

    pub fn in_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Generation of a write made by someone who has seen this stamp
    pub fn successor_generation(&self) -> u64 {
        if self.tombstone {
            self.generation + 1
        } else {
            self.generation
        }
    }

    /// Whether `self` wins over `other`
    pub fn supersedes(&self, other: &VersionStamp) -> bool {
        self > other
    }
}

impl Ord for VersionStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then(self.tombstone.cmp(&other.tombstone))
            .then(self.version.cmp(&other.version))
            .then_with(|| self.writer.cmp(&other.writer))
    }
}

impl PartialOrd for VersionStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of offering an incoming write against the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepCurrent,
    TakeIncoming,
    /// Same write seen twice
    Identical,
}

/// Decide between the write a holder already has and one arriving.
///
/// Both the local cache and the remote store settle conflicts through this.
pub fn resolve(current: &VersionStamp, incoming: &VersionStamp) -> Resolution {
    match incoming.cmp(current) {
        Ordering::Greater => Resolution::TakeIncoming,
        Ordering::Less => Resolution::KeepCurrent,
        Ordering::Equal => Resolution::Identical,
    }
}
