//! Per-kind resource states and their action sets
//!
//! Action availability is a pure function of state. Nothing caches or
//! accumulates action sets separately; a resource's enabled actions are
//! always recomputed from its current state.

use serde::{Deserialize, Serialize};

// =============================================================================
// Compute
// =============================================================================

/// Compute lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeState {
    Active,
    Inactive,
    Suspended,
    Error,
    Waiting,
}

impl ComputeState {
    /// Action terms valid in this state
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            ComputeState::Active => &["stop", "restart", "suspend"],
            ComputeState::Inactive => &["start"],
            ComputeState::Suspended => &["start"],
            ComputeState::Error => &["restart"],
            ComputeState::Waiting => &[],
        }
    }

    pub fn allows(&self, term: &str) -> bool {
        self.actions().contains(&term)
    }
}

impl std::fmt::Display for ComputeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComputeState::Active => "active",
            ComputeState::Inactive => "inactive",
            ComputeState::Suspended => "suspended",
            ComputeState::Error => "error",
            ComputeState::Waiting => "waiting",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Network
// =============================================================================

/// Network lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Active,
    Inactive,
    Error,
}

impl NetworkState {
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            NetworkState::Active => &["down"],
            NetworkState::Inactive => &["up"],
            NetworkState::Error => &[],
        }
    }

    pub fn allows(&self, term: &str) -> bool {
        self.actions().contains(&term)
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkState::Active => "active",
            NetworkState::Inactive => "inactive",
            NetworkState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Storage lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageState {
    Online,
    Offline,
    Backup,
    Snapshot,
    Resize,
    Degraded,
    Error,
}

impl StorageState {
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            StorageState::Online => &["offline", "backup", "snapshot", "resize"],
            StorageState::Offline => &["online"],
            // Transitional states expose nothing until the platform settles
            StorageState::Backup | StorageState::Snapshot | StorageState::Resize => &[],
            StorageState::Degraded => &["offline"],
            StorageState::Error => &[],
        }
    }

    pub fn allows(&self, term: &str) -> bool {
        self.actions().contains(&term)
    }
}

impl std::fmt::Display for StorageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorageState::Online => "online",
            StorageState::Offline => "offline",
            StorageState::Backup => "backup",
            StorageState::Snapshot => "snapshot",
            StorageState::Resize => "resize",
            StorageState::Degraded => "degraded",
            StorageState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Tagged Resource State
// =============================================================================

/// State of a resource, tagged by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "state")]
pub enum ResourceState {
    Compute(ComputeState),
    Network(NetworkState),
    Storage(StorageState),
}

impl ResourceState {
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            ResourceState::Compute(s) => s.actions(),
            ResourceState::Network(s) => s.actions(),
            ResourceState::Storage(s) => s.actions(),
        }
    }

    pub fn allows(&self, term: &str) -> bool {
        self.actions().contains(&term)
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceState::Compute(s) => write!(f, "{}", s),
            ResourceState::Network(s) => write!(f, "{}", s),
            ResourceState::Storage(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_compute_action_set_is_exact() {
        assert_eq!(
            ComputeState::Active.actions(),
            &["stop", "restart", "suspend"]
        );
        assert!(!ComputeState::Active.allows("start"));
    }

    #[test]
    fn test_suspended_compute_exposes_start_only() {
        assert_eq!(ComputeState::Suspended.actions(), &["start"]);
        assert!(!ComputeState::Suspended.allows("stop"));
    }

    #[test]
    fn test_waiting_compute_has_no_actions() {
        assert!(ComputeState::Waiting.actions().is_empty());
    }

    #[test]
    fn test_transitional_storage_states_expose_nothing() {
        assert!(StorageState::Backup.actions().is_empty());
        assert!(StorageState::Resize.actions().is_empty());
    }

    #[test]
    fn test_tagged_state_delegates() {
        let state = ResourceState::Compute(ComputeState::Active);
        assert!(state.allows("suspend"));
        assert_eq!(state.to_string(), "active");
    }
}
