//! The scaling decision, as a pure function.
//!
//! `decide` does no I/O and touches no clock: everything it needs comes
//! in as arguments, which is what makes the policy exhaustively testable.
//! The pipeline owns acting on the decision; this module only ranks the
//! reasons a volume can be left alone.

use tracing::debug;

use volscale_core::Config;
use volscale_core::units::gib_to_bytes;
use volscale_discover::UsageSample;
use volscale_state::VolumeRecord;

/// What to do about one volume right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Usage is below threshold.
    NoAction,
    /// Volume is on the exclusion list.
    Exclude,
    /// Above threshold but inside the cooldown window.
    Cooldown,
    /// A resize or growth is already outstanding for this volume.
    AlreadyInFlight,
    /// The next increment would exceed the configured size cap.
    CapExceeded { target_bytes: u64 },
    /// Request this new provisioned size.
    Resize { target_bytes: u64 },
}

/// Rank the reasons not to scale; only a volume that clears them all gets
/// a `Resize`. `now` is unix seconds.
pub fn decide(record: &VolumeRecord, sample: UsageSample, config: &Config, now: u64) -> Decision {
    if config.is_excluded(&record.id) {
        return Decision::Exclude;
    }
    if record.lifecycle.in_flight() {
        return Decision::AlreadyInFlight;
    }

    let percent = sample.percent();
    if percent < config.general.threshold {
        return Decision::NoAction;
    }
    debug!(
        volume = %record.id,
        usage = format!("{percent:.1}%"),
        threshold = config.general.threshold,
        "usage over threshold"
    );

    if now < record.cooldown_until {
        return Decision::Cooldown;
    }

    let target_bytes = record.provisioned_bytes + gib_to_bytes(config.general.increase_gb);
    if let Some(cap_gb) = config.general.max_size_gb
        && target_bytes > gib_to_bytes(cap_gb)
    {
        return Decision::CapExceeded { target_bytes };
    }

    Decision::Resize { target_bytes }
}
