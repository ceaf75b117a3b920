use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PartitionKey;

/// Reconciler state of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Syncing,
    Idle,
    /// Retries exhausted; working offline until the cool-down elapses
    Error,
}

impl ConnectionState {
    /// Online only while syncing or idle
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Syncing | Self::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Syncing => "syncing",
            Self::Idle => "idle",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress published by a partition's reconciler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerStatus {
    pub state: ConnectionState,
    pub rounds_started: u64,
    pub rounds_finished: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub partition: PartitionKey,
    pub attached: bool,
    pub state: ConnectionState,
    pub pending: usize,
    pub cursor: u64,
    pub rounds_finished: u64,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl PartitionStatus {
    pub fn is_online(&self) -> bool {
        self.state.is_online()
    }

    /// Idle with nothing left to push
    pub fn is_settled(&self) -> bool {
        self.state == ConnectionState::Idle && self.pending == 0
    }
}
