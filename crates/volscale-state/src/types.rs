//! Domain types for the volscale state store.
//!
//! A `VolumeRecord` is the durable source of truth for one tracked volume:
//! where it is mounted, how big the provider says it is, where it sits in
//! the resize lifecycle, and when it may next be resized. All types are
//! JSON-serialized for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Provider volume identity (e.g. `vol-0123456789abcdef0`).
pub type VolumeId = String;

// ── Lifecycle ─────────────────────────────────────────────────────

/// Where a volume sits in the resize/grow pipeline.
///
/// Transitions are strictly ordered and each one is persisted before the
/// next step begins:
/// `Stable → ResizeRequested → ResizePending → GrowthPending → Cooldown → Stable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// No operation in flight; eligible for a new decision.
    Stable,
    /// A resize was decided and persisted; the provider request may or may
    /// not have gone out yet. Reconciled against the provider on restart.
    ResizeRequested,
    /// The provider accepted the capacity change; polling until the block
    /// device reflects the new size.
    ResizePending,
    /// The block device is at the new size; partition/filesystem growth is
    /// outstanding (retried on its own, never re-requesting the resize).
    GrowthPending,
    /// Growth completed; waiting out the provider rate-limit window.
    Cooldown,
}

impl Lifecycle {
    /// True while a resize/growth operation is outstanding.
    pub fn in_flight(self) -> bool {
        matches!(
            self,
            Lifecycle::ResizeRequested | Lifecycle::ResizePending | Lifecycle::GrowthPending
        )
    }
}

// ── Volume record ─────────────────────────────────────────────────

/// Durable per-volume state. One entry per volume id, created on first
/// discovery and updated after every transition; never deleted
/// automatically (operator-managed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeRecord {
    pub id: VolumeId,
    /// Whole-device path (e.g. `/dev/nvme0n1`).
    pub device: String,
    /// Mounted partition path, absent on unpartitioned devices.
    pub partition: Option<String>,
    /// Partition number on `device`, when partitioned.
    pub partition_number: Option<u32>,
    pub mount_point: String,
    /// Detected filesystem type (e.g. `ext4`, `xfs`).
    pub fs_type: String,
    /// Capacity allocated by the provider, in bytes. Monotonically
    /// non-decreasing across every transition.
    pub provisioned_bytes: u64,
    /// Resize target while an operation is in flight.
    pub target_bytes: Option<u64>,
    pub last_used_bytes: u64,
    pub last_total_bytes: u64,
    pub lifecycle: Lifecycle,
    /// Unix seconds before which no new resize may be requested.
    pub cooldown_until: u64,
    pub last_event: Option<ScalingEvent>,
    /// Unix seconds of the last persisted change.
    pub updated_at: u64,
}

// ── Scaling events ────────────────────────────────────────────────

/// Final outcome of one scale attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Append-only audit/notification record for one scale attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingEvent {
    pub volume_id: VolumeId,
    /// Unix seconds when the attempt concluded.
    pub at: u64,
    pub previous_bytes: u64,
    pub requested_bytes: u64,
    pub outcome: EventOutcome,
    /// Error detail for `Failed`/`TimedOut` outcomes.
    pub error: Option<String>,
}

impl ScalingEvent {
    /// Build the composite key for the events table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.volume_id, self.at)
    }
}
