//! Per-volume scaling pipeline.
//!
//! Carries one volume through `Stable → ResizeRequested → ResizePending →
//! GrowthPending → Cooldown` and back. Every transition is persisted
//! before the action it authorizes, so a crash at any point leaves a
//! record that `process` knows how to resume:
//!
//! - `ResizeRequested` — the provider is asked what it knows before the
//!   request is (maybe) re-issued; a resize is never blindly repeated.
//! - `ResizePending` — polling resumes, no new request.
//! - `GrowthPending` — only growth is retried; the block resize is done.
//!
//! Cooldown starts when an attempt concludes, successful or not, so a
//! failing volume cannot hot-loop against the provider.

use std::sync::Arc;

use tracing::{debug, info, warn};

use volscale_cloud::{CloudVolumes, ModificationPhase, PollPolicy, ResizeOutcome};
use volscale_core::Config;
use volscale_core::units::bytes_to_gib_ceil;
use volscale_discover::UsageSample;
use volscale_grow::{GrowPlan, Grower};
use volscale_notify::{FailedVolume, ScaledVolume};
use volscale_state::{EventOutcome, Lifecycle, ScalingEvent, StateStore, VolumeRecord};

use crate::decision::{Decision, decide};
use crate::{EngineResult, unix_now};

/// What one volume has to report after a tick. Failures surface here only
/// when they produced a new event, so a stuck volume reports once, not
/// once per tick.
#[derive(Debug, Clone)]
pub enum VolumeReport {
    Scaled(ScaledVolume),
    Failed(FailedVolume),
}

pub struct Pipeline {
    store: StateStore,
    cloud: Arc<dyn CloudVolumes>,
    grower: Arc<Grower>,
    config: Config,
    policy: PollPolicy,
}

impl Pipeline {
    pub fn new(
        store: StateStore,
        cloud: Arc<dyn CloudVolumes>,
        grower: Arc<Grower>,
        config: Config,
    ) -> Self {
        let policy = PollPolicy::from_config(&config.cloud);
        Self {
            store,
            cloud,
            grower,
            config,
            policy,
        }
    }

    /// Drive one volume as far as it can go this tick. Returns a report
    /// row when the volume was scaled to completion or an attempt newly
    /// concluded in failure.
    pub async fn process(
        &self,
        mut record: VolumeRecord,
        sample: Option<UsageSample>,
    ) -> EngineResult<Option<VolumeReport>> {
        let now = unix_now();

        if record.lifecycle == Lifecycle::Cooldown && now >= record.cooldown_until {
            debug!(volume = %record.id, "cooldown expired");
            record.lifecycle = Lifecycle::Stable;
            self.persist(&mut record)?;
        }

        match record.lifecycle {
            Lifecycle::Stable | Lifecycle::Cooldown => {
                let Some(sample) = sample else {
                    // Not discovered this tick and nothing outstanding.
                    return Ok(None);
                };
                record.last_used_bytes = sample.used_bytes;
                record.last_total_bytes = sample.total_bytes;

                match decide(&record, sample, &self.config, now) {
                    Decision::Resize { target_bytes } => {
                        self.execute_resize(record, target_bytes).await
                    }
                    Decision::CapExceeded { target_bytes } => Ok(self
                        .record_cap_exceeded(record, target_bytes)?
                        .map(VolumeReport::Failed)),
                    decision => {
                        debug!(volume = %record.id, ?decision, "no scaling action");
                        self.persist(&mut record)?;
                        Ok(None)
                    }
                }
            }
            Lifecycle::ResizeRequested => self.reconcile_requested(record).await,
            Lifecycle::ResizePending => self.await_and_grow(record).await,
            Lifecycle::GrowthPending => self.finish_growth(record).await,
        }
    }

    /// Fresh resize: persist intent, then ask the provider before asking
    /// for anything.
    async fn execute_resize(
        &self,
        mut record: VolumeRecord,
        target_bytes: u64,
    ) -> EngineResult<Option<VolumeReport>> {
        record.lifecycle = Lifecycle::ResizeRequested;
        record.target_bytes = Some(target_bytes);
        self.persist(&mut record)?;

        let description = volscale_cloud::with_throttle_retry(&self.policy, "describe-volumes", || {
            self.cloud.describe_volume(&record.id)
        })
        .await?;

        if description.size_bytes >= target_bytes {
            // Already provisioned (a previous run got this far); only
            // growth can be outstanding.
            info!(volume = %record.id, "provider already at target size, skipping request");
            record.lifecycle = Lifecycle::GrowthPending;
            self.persist(&mut record)?;
            return self.finish_growth(record).await;
        }

        self.issue_and_await(record, target_bytes).await
    }

    /// Restart found a persisted `ResizeRequested`: the crash may have hit
    /// before or after the provider saw the request.
    async fn reconcile_requested(
        &self,
        mut record: VolumeRecord,
    ) -> EngineResult<Option<VolumeReport>> {
        let Some(target_bytes) = record.target_bytes else {
            warn!(volume = %record.id, "resize requested without a target, resetting");
            record.lifecycle = Lifecycle::Stable;
            self.persist(&mut record)?;
            return Ok(None);
        };

        let description = volscale_cloud::with_throttle_retry(&self.policy, "describe-volumes", || {
            self.cloud.describe_volume(&record.id)
        })
        .await?;
        if description.size_bytes >= target_bytes {
            record.lifecycle = Lifecycle::GrowthPending;
            self.persist(&mut record)?;
            return self.finish_growth(record).await;
        }

        let status = volscale_cloud::with_throttle_retry(
            &self.policy,
            "describe-volumes-modifications",
            || self.cloud.modification_status(&record.id),
        )
        .await?;

        // A modification working toward a different size belongs to an
        // earlier resize, not to this request.
        if let Some(reported) = status.target_bytes
            && reported != target_bytes
        {
            match status.phase {
                ModificationPhase::Completed => {
                    info!(
                        volume = %record.id,
                        stale_gib = bytes_to_gib_ceil(reported),
                        "last modification targeted a different size, issuing request"
                    );
                    return self.issue_and_await(record, target_bytes).await;
                }
                ModificationPhase::Modifying | ModificationPhase::Optimizing => {
                    let detail = format!(
                        "conflicting modification in flight toward {} GiB (wanted {} GiB)",
                        bytes_to_gib_ceil(reported),
                        bytes_to_gib_ceil(target_bytes)
                    );
                    return Ok(self
                        .conclude_failure(record, target_bytes, EventOutcome::Failed, detail)?
                        .map(VolumeReport::Failed));
                }
                _ => {}
            }
        }

        match status.phase {
            ModificationPhase::Modifying
            | ModificationPhase::Optimizing
            | ModificationPhase::Completed => {
                info!(volume = %record.id, "request already in flight, resuming poll");
                record.lifecycle = Lifecycle::ResizePending;
                self.persist(&mut record)?;
                self.await_and_grow(record).await
            }
            ModificationPhase::NoModification => {
                // The request never reached the provider.
                self.issue_and_await(record, target_bytes).await
            }
            ModificationPhase::Failed { reason } => Ok(self
                .conclude_failure(record, target_bytes, EventOutcome::Failed, reason)?
                .map(VolumeReport::Failed)),
        }
    }

    async fn issue_and_await(
        &self,
        mut record: VolumeRecord,
        target_bytes: u64,
    ) -> EngineResult<Option<VolumeReport>> {
        info!(
            volume = %record.id,
            from_gib = bytes_to_gib_ceil(record.provisioned_bytes),
            to_gib = bytes_to_gib_ceil(target_bytes),
            "requesting resize"
        );

        let request = volscale_cloud::with_throttle_retry(&self.policy, "modify-volume", || {
            self.cloud.modify_volume(&record.id, target_bytes)
        })
        .await;
        if let Err(e) = request {
            return Ok(self
                .conclude_failure(record, target_bytes, EventOutcome::Failed, e.to_string())?
                .map(VolumeReport::Failed));
        }

        record.lifecycle = Lifecycle::ResizePending;
        self.persist(&mut record)?;
        self.await_and_grow(record).await
    }

    /// Poll the modification to a terminal phase, then grow.
    async fn await_and_grow(
        &self,
        mut record: VolumeRecord,
    ) -> EngineResult<Option<VolumeReport>> {
        let target_bytes = record.target_bytes.unwrap_or(record.provisioned_bytes);

        match volscale_cloud::await_modification(&*self.cloud, &record.id, &self.policy).await {
            ResizeOutcome::Completed => {
                record.lifecycle = Lifecycle::GrowthPending;
                self.persist(&mut record)?;
                self.finish_growth(record).await
            }
            ResizeOutcome::Failed(reason) => Ok(self
                .conclude_failure(record, target_bytes, EventOutcome::Failed, reason)?
                .map(VolumeReport::Failed)),
            ResizeOutcome::TimedOut => {
                let detail = format!(
                    "modification still incomplete after {}s",
                    self.policy.timeout.as_secs()
                );
                Ok(self
                    .conclude_failure(record, target_bytes, EventOutcome::TimedOut, detail)?
                    .map(VolumeReport::Failed))
            }
        }
    }

    /// The provider side is done; extend partition and filesystem. On any
    /// growth failure the record stays `GrowthPending` so only this step
    /// is retried.
    async fn finish_growth(
        &self,
        mut record: VolumeRecord,
    ) -> EngineResult<Option<VolumeReport>> {
        let target_bytes = record.target_bytes.unwrap_or(record.provisioned_bytes);
        let expected_bytes = record.provisioned_bytes.max(target_bytes);

        let plan = GrowPlan {
            device: record.device.clone(),
            partition: record.partition.clone(),
            partition_number: record.partition_number,
            mount_point: record.mount_point.clone(),
            fs_type: record.fs_type.clone(),
            expected_bytes,
        };

        if let Err(e) = self.grower.grow(&plan).await {
            if e.needs_operator() {
                warn!(volume = %record.id, error = %e, "growth needs an operator");
                let reason = e.to_string();
                let appended = self.conclude(
                    &mut record,
                    target_bytes,
                    EventOutcome::Failed,
                    Some(reason.clone()),
                )?;
                return Ok(appended.then(|| {
                    VolumeReport::Failed(self.failure_report(&record, target_bytes, reason))
                }));
            }
            return Err(e.into());
        }

        let previous_bytes = record.provisioned_bytes;
        record.provisioned_bytes = expected_bytes;
        record.target_bytes = None;
        record.lifecycle = Lifecycle::Cooldown;
        record.cooldown_until = unix_now() + self.config.general.cooldown_secs;
        self.conclude(&mut record, target_bytes, EventOutcome::Succeeded, None)?;

        let previous_gib = bytes_to_gib_ceil(previous_bytes);
        let new_gib = bytes_to_gib_ceil(expected_bytes);
        info!(volume = %record.id, previous_gib, new_gib, "volume scaled");

        Ok(Some(VolumeReport::Scaled(ScaledVolume {
            volume_id: record.id.clone(),
            mount_point: record.mount_point.clone(),
            device: record.device.clone(),
            partition: record.partition.clone(),
            threshold_percent: self.config.general.threshold,
            expanded_gib: new_gib.saturating_sub(previous_gib),
            previous_gib,
            new_gib,
        })))
    }

    /// A resize attempt is over without growth: back to `Stable`, cooldown
    /// applied regardless of outcome. Returns a report row when the
    /// failure produced a new event.
    fn conclude_failure(
        &self,
        mut record: VolumeRecord,
        target_bytes: u64,
        outcome: EventOutcome,
        detail: String,
    ) -> EngineResult<Option<FailedVolume>> {
        warn!(volume = %record.id, ?outcome, %detail, "resize attempt failed");
        record.lifecycle = Lifecycle::Stable;
        record.target_bytes = None;
        record.cooldown_until = unix_now() + self.config.general.cooldown_secs;
        let appended =
            self.conclude(&mut record, target_bytes, outcome, Some(detail.clone()))?;
        Ok(appended.then(|| self.failure_report(&record, target_bytes, detail)))
    }

    /// The cap is a policy stop, not an error loop: the event is recorded
    /// once per threshold crossing, then suppressed while nothing changes.
    fn record_cap_exceeded(
        &self,
        mut record: VolumeRecord,
        target_bytes: u64,
    ) -> EngineResult<Option<FailedVolume>> {
        let detail = format!(
            "target {} GiB exceeds max-size cap",
            bytes_to_gib_ceil(target_bytes)
        );

        let already_recorded = record.last_event.as_ref().is_some_and(|event| {
            event.outcome == EventOutcome::Failed
                && event.requested_bytes == target_bytes
                && event.error.as_deref() == Some(detail.as_str())
        });
        if already_recorded {
            self.persist(&mut record)?;
            return Ok(None);
        }

        warn!(volume = %record.id, %detail, "refusing resize");
        let appended =
            self.conclude(&mut record, target_bytes, EventOutcome::Failed, Some(detail.clone()))?;
        Ok(appended.then(|| self.failure_report(&record, target_bytes, detail)))
    }

    fn failure_report(
        &self,
        record: &VolumeRecord,
        target_bytes: u64,
        reason: String,
    ) -> FailedVolume {
        FailedVolume {
            volume_id: record.id.clone(),
            mount_point: record.mount_point.clone(),
            requested_gib: bytes_to_gib_ceil(target_bytes),
            reason,
        }
    }

    /// Append the attempt's event and persist the record carrying it.
    /// Returns whether the event was actually appended or suppressed as a
    /// repeat.
    fn conclude(
        &self,
        record: &mut VolumeRecord,
        requested_bytes: u64,
        outcome: EventOutcome,
        error: Option<String>,
    ) -> EngineResult<bool> {
        let event = ScalingEvent {
            volume_id: record.id.clone(),
            at: unix_now(),
            previous_bytes: record.provisioned_bytes,
            requested_bytes,
            outcome,
            error,
        };

        // Repeated operator-needed failures produce one event, not one
        // per tick.
        let duplicate = record.last_event.as_ref().is_some_and(|last| {
            last.outcome == event.outcome
                && last.requested_bytes == event.requested_bytes
                && last.error == event.error
                && outcome != EventOutcome::Succeeded
        });

        record.last_event = Some(event.clone());
        self.persist(record)?;
        if duplicate {
            return Ok(false);
        }
        self.store.append_event(&event)?;
        Ok(true)
    }

    fn persist(&self, record: &mut VolumeRecord) -> EngineResult<()> {
        record.updated_at = unix_now();
        self.store.put_volume(record)?;
        Ok(())
    }
}
