//! Engine lifecycle and public surface.
//!
//! `Created → Initialized → Running → Stopped`. Structural settings (bucket
//! count, find time, sweep interval, recycle budget) are frozen once the ring
//! is built in `initialize()`. `max_retry` and `ban_time` stay live.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::EngineConfig;
use crate::error::BannerError;
use crate::ingest::{FailureQueue, Report, run_consumer};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::BanRegistry;
use crate::ring::BucketRing;
use crate::tracker::{FailureTracker, Verdict};

/// Lifecycle state of an [`IpBanner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl State {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read-only view of an engine's settings and counters.
#[derive(Debug, Clone, Serialize)]
pub struct BannerStats {
    pub state: State,
    pub bucket_count: usize,
    pub buckets_in_ring: usize,
    pub find_time_secs: u64,
    pub ban_time_secs: u64,
    pub max_retry: u32,
    pub cleanup_interval_secs: u64,
    pub max_bucket_recycle_count: u32,
    pub currently_banned: usize,
    pub tracked_entries: usize,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

/// Adaptive IP banner, cloneable across request handlers.
///
/// Callers report authentication failures with [`report_failure`] and check
/// [`is_banned`] before serving a request. Failures are aggregated over a
/// sliding window of `find_time`, split into `bucket_count` buckets; more
/// than `max_retry` failures inside the window ban the address for
/// `ban_time`.
///
/// [`report_failure`]: IpBanner::report_failure
/// [`is_banned`]: IpBanner::is_banned
#[derive(Clone)]
pub struct IpBanner {
    inner: Arc<Inner>,
}

struct Inner {
    control: Mutex<Control>,
    max_retry: Arc<AtomicU32>,
    registry: Arc<BanRegistry>,
    metrics: Arc<Metrics>,
    queue: FailureQueue,
    tracker: OnceLock<Arc<FailureTracker>>,
}

struct Control {
    config: EngineConfig,
    state: State,
    /// Handed to the consumer task on `start()`.
    receiver: Option<UnboundedReceiver<Report>>,
    tasks: Option<Tasks>,
}

struct Tasks {
    /// Cancels the timers when dropped, so an engine dropped without
    /// `stop()` does not leave them ticking.
    timers_guard: DropGuard,
    timers: Vec<JoinHandle<()>>,
    consumer: JoinHandle<()>,
}

impl IpBanner {
    /// Creates an engine in the `Created` state.
    pub fn new(config: EngineConfig) -> Result<Self, BannerError> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(BanRegistry::new(config.ban_time, Arc::clone(&metrics)));
        let (queue, receiver) = FailureQueue::new(Arc::clone(&metrics));

        Ok(Self {
            inner: Arc::new(Inner {
                max_retry: Arc::new(AtomicU32::new(config.max_retry)),
                control: Mutex::new(Control {
                    config,
                    state: State::Created,
                    receiver: Some(receiver),
                    tasks: None,
                }),
                registry,
                metrics,
                queue,
                tracker: OnceLock::new(),
            }),
        })
    }

    /// Creates and starts an engine. Must be called within a Tokio runtime.
    pub fn start_with(config: EngineConfig) -> Result<Self, BannerError> {
        let banner = Self::new(config)?;
        banner.start()?;
        Ok(banner)
    }

    // --- Request path ---

    /// Reports a failed authentication for `address`. Never blocks.
    pub fn report_failure(&self, address: &str) {
        self.inner.queue.report_failure(address);
    }

    /// Returns whether `address` is currently banned.
    pub fn is_banned(&self, address: &str) -> bool {
        self.inner.registry.is_banned(address)
    }

    /// Bans `address` immediately, bypassing the threshold.
    pub fn ban(&self, address: &str) {
        self.inner.registry.ban(address);
    }

    /// Records and evaluates a failure on the calling thread instead of the
    /// consumer task.
    pub fn record_failure_sync(&self, address: &str) -> Result<Verdict, BannerError> {
        let tracker = self.tracker()?;
        self.inner.metrics.record_failure();
        Ok(tracker.record_and_evaluate(address, self.max_retry()))
    }

    // --- Maintenance ---

    /// Advances the window by one bucket, as the rotation timer does.
    pub fn rotate_buckets(&self) -> Result<(), BannerError> {
        let tracker = self.tracker()?;
        rotate_buckets(tracker, &self.inner.metrics);
        Ok(())
    }

    /// Removes expired bans, as the sweep timer does. Returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        sweep_expired(&self.inner.registry, &self.inner.metrics)
    }

    fn tracker(&self) -> Result<&Arc<FailureTracker>, BannerError> {
        self.inner.tracker.get().ok_or(BannerError::NotInitialized)
    }

    // --- Configuration ---

    pub fn max_retry(&self) -> u32 {
        self.inner.max_retry.load(Ordering::Relaxed)
    }

    /// Changes the threshold; applies to the next evaluated failure.
    pub fn set_max_retry(&self, max_retry: u32) {
        self.inner.max_retry.store(max_retry, Ordering::Relaxed);
    }

    pub fn ban_time(&self) -> Duration {
        self.inner.registry.ban_time()
    }

    /// Changes the ban duration, including for addresses already banned.
    pub fn set_ban_time(&self, ban_time: Duration) {
        self.inner.registry.set_ban_time(ban_time);
    }

    pub fn set_bucket_count(&self, bucket_count: usize) -> Result<(), BannerError> {
        self.update_config("bucket_count", |config| config.bucket_count = bucket_count)
    }

    pub fn set_find_time(&self, find_time: Duration) -> Result<(), BannerError> {
        self.update_config("find_time", |config| config.find_time = find_time)
    }

    pub fn set_cleanup_interval(&self, cleanup_interval: Duration) -> Result<(), BannerError> {
        self.update_config("cleanup_interval", |config| {
            config.cleanup_interval = cleanup_interval;
        })
    }

    pub fn set_max_bucket_recycle_count(&self, count: u32) -> Result<(), BannerError> {
        self.update_config("max_bucket_recycle_count", |config| {
            config.max_bucket_recycle_count = count;
        })
    }

    pub fn set_prefill_ring(&self, prefill: bool) -> Result<(), BannerError> {
        self.update_config("prefill_ring", |config| config.prefill_ring = prefill)
    }

    fn update_config(
        &self,
        setting: &'static str,
        apply: impl FnOnce(&mut EngineConfig),
    ) -> Result<(), BannerError> {
        let mut control = self.inner.control.lock();
        if control.state != State::Created {
            return Err(BannerError::AlreadyInitialized { setting });
        }
        let mut candidate = control.config.clone();
        apply(&mut candidate);
        candidate.validate()?;
        control.config = candidate;
        Ok(())
    }

    /// Current configuration, with the live tunables applied.
    pub fn config(&self) -> EngineConfig {
        let mut config = self.inner.control.lock().config.clone();
        config.max_retry = self.max_retry();
        config.ban_time = self.ban_time();
        config
    }

    // --- Lifecycle ---

    pub fn state(&self) -> State {
        self.inner.control.lock().state
    }

    /// Freezes the configuration and builds the bucket ring.
    ///
    /// No-op if already initialized or running.
    pub fn initialize(&self) -> Result<(), BannerError> {
        let mut control = self.inner.control.lock();
        self.initialize_locked(&mut control)
    }

    fn initialize_locked(&self, control: &mut Control) -> Result<(), BannerError> {
        match control.state {
            State::Created => {}
            State::Initialized | State::Running => return Ok(()),
            State::Stopped => {
                return Err(BannerError::InvalidState {
                    expected: State::Created,
                    actual: State::Stopped,
                });
            }
        }
        control.config.validate()?;

        let config = &control.config;
        let ring = BucketRing::new(
            config.bucket_count,
            config.max_bucket_recycle_count,
            config.prefill_ring,
        );
        let tracker = Arc::new(FailureTracker::new(ring, Arc::clone(&self.inner.registry)));
        // Only the Created → Initialized transition sets it, under the lock.
        let _ = self.inner.tracker.set(tracker);
        control.state = State::Initialized;
        Ok(())
    }

    /// Starts the rotation timer, the sweep timer and the failure consumer.
    ///
    /// Initializes first if needed. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<(), BannerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BannerError::NoRuntime)?;

        let mut control = self.inner.control.lock();
        self.initialize_locked(&mut control)?;
        if control.state != State::Initialized {
            return Err(BannerError::InvalidState {
                expected: State::Initialized,
                actual: control.state,
            });
        }
        let tracker = Arc::clone(self.tracker()?);
        let receiver = control.receiver.take().ok_or(BannerError::NotInitialized)?;

        let cancel = CancellationToken::new();
        let metrics = &self.inner.metrics;

        let rotation = {
            let tracker = Arc::clone(&tracker);
            let metrics = Arc::clone(metrics);
            runtime.spawn(run_periodic(
                control.config.rotation_period(),
                MissedTickBehavior::Burst,
                cancel.clone(),
                move || rotate_buckets(&tracker, &metrics),
            ))
        };

        let sweep = {
            let registry = Arc::clone(&self.inner.registry);
            let metrics = Arc::clone(metrics);
            runtime.spawn(run_periodic(
                control.config.cleanup_interval,
                MissedTickBehavior::Delay,
                cancel.clone(),
                move || {
                    sweep_expired(&registry, &metrics);
                },
            ))
        };

        let consumer = {
            let max_retry = Arc::clone(&self.inner.max_retry);
            runtime.spawn(run_consumer(
                receiver,
                Arc::clone(metrics),
                move |address| {
                    tracker.record_and_evaluate(address, max_retry.load(Ordering::Relaxed));
                },
            ))
        };

        control.tasks = Some(Tasks {
            timers_guard: cancel.drop_guard(),
            timers: vec![rotation, sweep],
            consumer,
        });
        control.state = State::Running;

        tracing::info!(
            bucket_count = control.config.bucket_count,
            find_time_secs = control.config.find_time.as_secs(),
            ban_time_secs = self.ban_time().as_secs(),
            max_retry = self.max_retry(),
            "IpBanner started"
        );
        Ok(())
    }

    /// Stops the timers, then drains every failure reported so far.
    ///
    /// Idempotent. Reports arriving afterwards are dropped.
    pub async fn stop(&self) {
        let tasks = {
            let mut control = self.inner.control.lock();
            if control.state == State::Stopped {
                return;
            }
            control.state = State::Stopped;

            // Never started: nothing will evaluate what was queued.
            if let Some(mut receiver) = control.receiver.take() {
                receiver.close();
                while receiver.try_recv().is_ok() {
                    self.inner.metrics.record_dropped();
                }
            }
            control.tasks.take()
        };

        if let Some(Tasks {
            timers_guard,
            timers,
            consumer,
        }) = tasks
        {
            drop(timers_guard);
            for timer in timers {
                if let Err(err) = timer.await {
                    tracing::warn!(%err, "Background timer ended abnormally");
                }
            }

            if self.inner.queue.send_stop()
                && let Err(err) = consumer.await
            {
                tracing::warn!(%err, "Failure consumer ended abnormally");
            }
        }

        tracing::info!("IpBanner stopped");
    }

    // --- Observability ---

    pub fn stats(&self) -> BannerStats {
        let (state, config) = {
            let control = self.inner.control.lock();
            (control.state, control.config.clone())
        };
        let ring = self.inner.tracker.get().map(|tracker| tracker.ring());

        BannerStats {
            state,
            bucket_count: config.bucket_count,
            buckets_in_ring: ring.map_or(0, BucketRing::len),
            find_time_secs: config.find_time.as_secs(),
            ban_time_secs: self.ban_time().as_secs(),
            max_retry: self.max_retry(),
            cleanup_interval_secs: config.cleanup_interval.as_secs(),
            max_bucket_recycle_count: config.max_bucket_recycle_count,
            currently_banned: self.inner.registry.len(),
            tracked_entries: ring.map_or(0, BucketRing::tracked_entries),
            counters: self.inner.metrics.snapshot(),
        }
    }

    /// Prometheus text exposition of this engine's metrics.
    pub fn render_metrics(&self) -> String {
        let tracked = self
            .inner
            .tracker
            .get()
            .map_or(0, |tracker| tracker.ring().tracked_entries());
        self.inner.metrics.render(self.inner.registry.len(), tracked)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }
}

/// Runs `task` every `period` until `cancel` fires. The first run happens
/// one period after start.
async fn run_periodic<F>(
    period: Duration,
    missed: MissedTickBehavior,
    cancel: CancellationToken,
    mut task: F,
) where
    F: FnMut(),
{
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(missed);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => task(),
        }
    }
}

fn rotate_buckets(tracker: &FailureTracker, metrics: &Metrics) {
    let started = Instant::now();
    guarded(metrics, "rotation", || {
        tracker.rotate();
    });
    metrics.record_rotation(started.elapsed());
}

fn sweep_expired(registry: &BanRegistry, metrics: &Metrics) -> usize {
    let started = Instant::now();
    let mut reenabled = 0;
    guarded(metrics, "sweep", || reenabled = registry.sweep());
    let elapsed = started.elapsed();
    metrics.record_sweep(elapsed);
    tracing::debug!(
        reenabled,
        duration_us = elapsed.as_micros() as u64,
        "Swept expired bans"
    );
    reenabled
}

/// Runs `f`, logging instead of unwinding if it panics.
fn guarded(metrics: &Metrics, task: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        metrics.record_task_panic();
        tracing::error!(task, "Panic in background task");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retry: u32) -> EngineConfig {
        EngineConfig {
            max_retry,
            ban_time: Duration::from_secs(4),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let result = IpBanner::new(EngineConfig {
            bucket_count: 0,
            ..EngineConfig::default()
        });
        assert!(matches!(result, Err(BannerError::InvalidConfig(_))));
    }

    #[test]
    fn structural_settings_frozen_after_initialize() {
        let banner = IpBanner::new(config(10)).unwrap();
        banner.set_bucket_count(12).unwrap();
        banner.set_find_time(Duration::from_secs(60)).unwrap();
        banner.initialize().unwrap();
        assert_eq!(banner.state(), State::Initialized);

        let err = banner.set_bucket_count(3).unwrap_err();
        assert!(matches!(
            err,
            BannerError::AlreadyInitialized {
                setting: "bucket_count"
            }
        ));
        assert!(banner.set_find_time(Duration::from_secs(5)).is_err());
        assert!(banner.set_cleanup_interval(Duration::from_secs(1)).is_err());
        assert_eq!(banner.config().bucket_count, 12);
    }

    #[test]
    fn invalid_setter_value_rejected_before_initialize() {
        let banner = IpBanner::new(config(10)).unwrap();
        assert!(matches!(
            banner.set_bucket_count(0),
            Err(BannerError::InvalidConfig(_))
        ));
        assert_eq!(banner.config().bucket_count, 6);
    }

    #[test]
    fn live_tunables_apply_in_any_state() {
        let banner = IpBanner::new(config(10)).unwrap();
        banner.initialize().unwrap();
        banner.set_max_retry(1);
        banner.set_ban_time(Duration::from_secs(30));
        assert_eq!(banner.max_retry(), 1);
        assert_eq!(banner.config().ban_time, Duration::from_secs(30));

        banner.record_failure_sync("10.0.0.1").unwrap();
        assert!(!banner.is_banned("10.0.0.1"));
        banner.record_failure_sync("10.0.0.1").unwrap();
        assert!(banner.is_banned("10.0.0.1"));
    }

    #[test]
    fn sync_record_requires_initialize() {
        let banner = IpBanner::new(config(10)).unwrap();
        assert!(matches!(
            banner.record_failure_sync("10.0.0.1"),
            Err(BannerError::NotInitialized)
        ));
        assert!(banner.rotate_buckets().is_err());
    }

    #[test]
    fn start_outside_runtime_fails_fast() {
        let banner = IpBanner::new(config(10)).unwrap();
        assert!(matches!(banner.start(), Err(BannerError::NoRuntime)));
        assert_eq!(banner.state(), State::Created);
    }

    #[test]
    fn explicit_ban_then_expiry_shrinks_registry() {
        let banner = IpBanner::new(config(10)).unwrap();
        banner.set_ban_time(Duration::from_millis(20));
        banner.ban("10.0.0.1");
        assert!(banner.is_banned("10.0.0.1"));
        assert_eq!(banner.stats().currently_banned, 1);

        std::thread::sleep(Duration::from_millis(40));
        assert!(!banner.is_banned("10.0.0.1"));
        assert_eq!(banner.stats().currently_banned, 0);
    }

    #[tokio::test]
    async fn reports_are_drained_on_stop() {
        let banner = IpBanner::start_with(config(11)).unwrap();
        assert_eq!(banner.state(), State::Running);

        for _ in 0..12 {
            banner.report_failure("9.0.0.1");
        }
        banner.stop().await;

        assert_eq!(banner.state(), State::Stopped);
        assert!(banner.is_banned("9.0.0.1"));
        let stats = banner.stats();
        assert_eq!(stats.counters.failures_reported, 12);
        assert_eq!(stats.counters.queue_depth, 0);
        assert_eq!(stats.counters.bans_issued, 1);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let banner = IpBanner::start_with(config(10)).unwrap();
        assert!(matches!(
            banner.start(),
            Err(BannerError::InvalidState {
                expected: State::Initialized,
                actual: State::Running,
            })
        ));
        banner.stop().await;
        assert!(banner.start().is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_drops_late_reports() {
        let banner = IpBanner::start_with(config(10)).unwrap();
        banner.stop().await;
        banner.stop().await;
        banner.report_failure("10.0.0.1");
        assert_eq!(banner.stats().counters.failures_dropped, 1);
    }

    #[tokio::test]
    async fn stop_without_start_drops_queued_reports() {
        let banner = IpBanner::new(config(10)).unwrap();
        banner.report_failure("10.0.0.1");
        banner.stop().await;
        let counters = banner.stats().counters;
        assert_eq!(counters.failures_dropped, 1);
        assert_eq!(counters.queue_depth, 0);
    }

    #[tokio::test]
    async fn timers_rotate_and_sweep() {
        let banner = IpBanner::new(EngineConfig {
            bucket_count: 3,
            find_time: Duration::from_millis(30),
            cleanup_interval: Duration::from_millis(10),
            ban_time: Duration::ZERO,
            ..EngineConfig::default()
        })
        .unwrap();
        banner.start().unwrap();
        banner.ban("10.0.0.1");

        tokio::time::sleep(Duration::from_millis(120)).await;
        banner.stop().await;

        let stats = banner.stats();
        assert!(stats.counters.rotations >= 2, "{stats:?}");
        assert!(stats.counters.sweeps >= 2, "{stats:?}");
        assert_eq!(stats.buckets_in_ring, 3);
        assert_eq!(stats.currently_banned, 0);

        // No more ticks once stopped.
        let rotations = stats.counters.rotations;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(banner.stats().counters.rotations, rotations);
    }

    #[tokio::test]
    async fn engines_do_not_share_counters() {
        let first = IpBanner::start_with(config(10)).unwrap();
        let second = IpBanner::start_with(config(10)).unwrap();
        first.ban("10.0.0.1");
        assert_eq!(first.stats().counters.bans_issued, 1);
        assert_eq!(second.stats().counters.bans_issued, 0);
        assert!(!second.is_banned("10.0.0.1"));
        first.stop().await;
        second.stop().await;
    }

    #[test]
    fn stats_serialize_flat() {
        let banner = IpBanner::new(config(10)).unwrap();
        let json = serde_json::to_value(banner.stats()).unwrap();
        assert_eq!(json["state"], "created");
        assert_eq!(json["max_retry"], 10);
        assert_eq!(json["bans_issued"], 0);
        assert_eq!(json["buckets_in_ring"], 0);
    }
}
