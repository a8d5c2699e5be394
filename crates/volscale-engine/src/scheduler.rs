//! The tick loop: discover, decide, act, notify.
//!
//! Each tick merges what is mounted right now with what the store
//! remembers, fans the volumes out over a bounded task pool, and batches
//! everything scaled this tick into one notification. Persisted in-flight
//! records missing from discovery (device renamed, mount moved) are still
//! resumed — the store, not the mount table, is the source of truth for
//! outstanding work.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use volscale_core::Config;
use volscale_discover::{DiscoveredVolume, Discovery, UsageSampler};
use volscale_notify::{FailedVolume, Notifier, ScaledVolume};
use volscale_state::{Lifecycle, StateStore, VolumeRecord};

use crate::pipeline::{Pipeline, VolumeReport};
use crate::unix_now;

pub struct Scheduler {
    discovery: Arc<dyn Discovery>,
    sampler: Arc<dyn UsageSampler>,
    pipeline: Arc<Pipeline>,
    notifier: Arc<Notifier>,
    store: StateStore,
    config: Config,
    /// Host identity for notifications, resolved once at startup.
    instance_id: String,
}

impl Scheduler {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        sampler: Arc<dyn UsageSampler>,
        pipeline: Arc<Pipeline>,
        notifier: Arc<Notifier>,
        store: StateStore,
        config: Config,
        instance_id: String,
    ) -> Self {
        Self {
            discovery,
            sampler,
            pipeline,
            notifier,
            store,
            config,
            instance_id,
        }
    }

    /// Resume persisted in-flight operations before the first tick.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let mut reports = Vec::new();
        for record in self.store.list_volumes().context("loading state store")? {
            if !record.lifecycle.in_flight() {
                continue;
            }
            info!(
                volume = %record.id,
                lifecycle = ?record.lifecycle,
                "resuming in-flight operation from previous run"
            );
            let id = record.id.clone();
            match self.pipeline.process(record, None).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => warn!(volume = %id, error = %e, "resume failed, will retry"),
            }
        }
        self.report(reports).await;
        Ok(())
    }

    /// Loop ticks until the shutdown signal. The signal interrupts a
    /// running tick too — safe, because every volume transition is
    /// persisted before the action it authorizes, so an interrupted
    /// volume resumes from its checkpoint on the next start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            interval_secs = self.config.general.interval,
            concurrency = self.config.general.concurrency,
            "scheduler running"
        );

        loop {
            tokio::select! {
                result = self.run_once() => {
                    if let Err(e) = result {
                        warn!(error = %e, "tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received, abandoning tick");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// One full evaluation pass. Returns how many volumes were scaled.
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let reports = self.tick().await?;
        let scaled = reports
            .iter()
            .filter(|r| matches!(r, VolumeReport::Scaled(_)))
            .count();
        self.report(reports).await;
        Ok(scaled)
    }

    /// One notification per batch, successes and failures together.
    async fn report(&self, reports: Vec<VolumeReport>) {
        let mut scaled: Vec<ScaledVolume> = Vec::new();
        let mut failed: Vec<FailedVolume> = Vec::new();
        for report in reports {
            match report {
                VolumeReport::Scaled(volume) => scaled.push(volume),
                VolumeReport::Failed(volume) => failed.push(volume),
            }
        }
        if !scaled.is_empty() || !failed.is_empty() {
            self.notifier.notify(&self.instance_id, &scaled, &failed).await;
        }
    }

    async fn tick(&self) -> anyhow::Result<Vec<VolumeReport>> {
        let discovered = self.discovery.discover().await.context("volume discovery")?;
        if discovered.is_empty() {
            info!("no resizable volumes mounted");
        }

        let mut work = Vec::new();
        let mut seen = HashSet::new();
        for volume in discovered {
            let record = match self.store.get_volume(&volume.volume_id) {
                Ok(Some(existing)) => refresh_identity(existing, &volume),
                Ok(None) => {
                    info!(volume = %volume.volume_id, mount = %volume.mount_point, "tracking new volume");
                    new_record(&volume)
                }
                Err(e) => {
                    warn!(volume = %volume.volume_id, error = %e, "state read failed, skipping");
                    continue;
                }
            };

            let sample = match self.sampler.sample(Path::new(&record.mount_point)) {
                Ok(sample) => Some(sample),
                Err(e) => {
                    warn!(volume = %record.id, error = %e, "usage sample failed");
                    None
                }
            };
            seen.insert(record.id.clone());
            work.push((record, sample));
        }

        // In-flight work survives the volume dropping out of discovery.
        for record in self.store.list_volumes().context("loading state store")? {
            if record.lifecycle.in_flight() && !seen.contains(&record.id) {
                warn!(volume = %record.id, "in-flight volume not discovered this tick, resuming anyway");
                work.push((record, None));
            }
        }

        let limit = Arc::new(Semaphore::new(self.config.general.concurrency));
        let mut tasks = JoinSet::new();
        for (record, sample) in work {
            let pipeline = self.pipeline.clone();
            let limit = limit.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                let id = record.id.clone();
                (id, pipeline.process(record, sample).await)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(report)))) => reports.push(report),
                Ok((_, Ok(None))) => {}
                Ok((id, Err(e))) => warn!(volume = %id, error = %e, "volume processing failed"),
                Err(e) => warn!(error = %e, "volume task panicked"),
            }
        }
        Ok(reports)
    }
}

fn new_record(volume: &DiscoveredVolume) -> VolumeRecord {
    VolumeRecord {
        id: volume.volume_id.clone(),
        device: volume.device.clone(),
        partition: volume.partition.clone(),
        partition_number: volume.partition_number,
        mount_point: volume.mount_point.clone(),
        fs_type: volume.fs_type.clone(),
        provisioned_bytes: volume.device_size_bytes,
        target_bytes: None,
        last_used_bytes: 0,
        last_total_bytes: 0,
        lifecycle: Lifecycle::Stable,
        cooldown_until: 0,
        last_event: None,
        updated_at: unix_now(),
    }
}

/// Device paths and partition layout can change across reboots; the
/// provider id is the stable key. Provisioned size only ever ratchets up.
fn refresh_identity(mut record: VolumeRecord, volume: &DiscoveredVolume) -> VolumeRecord {
    record.device = volume.device.clone();
    record.partition = volume.partition.clone();
    record.partition_number = volume.partition_number;
    record.mount_point = volume.mount_point.clone();
    record.fs_type = volume.fs_type.clone();
    record.provisioned_bytes = record.provisioned_bytes.max(volume.device_size_bytes);
    record
}
