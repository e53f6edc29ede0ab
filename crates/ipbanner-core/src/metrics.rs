//! Lightweight Prometheus-compatible metrics using atomic counters.
//!
//! Counters are owned by one engine, so independent engines (tests, multiple
//! guarded listeners) never share statistics.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Engine-wide counters.
#[derive(Default)]
pub struct Metrics {
    bans_issued: AtomicU64,
    unbans: AtomicU64,
    failures_reported: AtomicU64,
    failures_dropped: AtomicU64,
    rotations: AtomicU64,
    rotation_duration_us: AtomicU64,
    sweeps: AtomicU64,
    sweep_duration_us: AtomicU64,
    task_panics: AtomicU64,
    /// Reports enqueued but not yet evaluated. Signed so a dequeue racing
    /// ahead of its enqueue bookkeeping can never wrap.
    queue_depth: AtomicI64,
}

/// Read-only copy of the counters at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub bans_issued: u64,
    pub unbans: u64,
    pub failures_reported: u64,
    pub failures_dropped: u64,
    pub rotations: u64,
    pub rotation_duration_us: u64,
    pub sweeps: u64,
    pub sweep_duration_us: u64,
    pub task_panics: u64,
    pub queue_depth: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ban(&self) {
        self.bans_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unbans(&self, count: u64) {
        self.unbans.fetch_add(count, Ordering::Relaxed);
    }

    /// A failure evaluated inline, without going through the queue.
    pub fn record_failure(&self) {
        self.failures_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.record_failure();
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dequeued(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// A report arrived after the consumer stopped.
    pub fn record_dropped(&self) {
        self.failures_dropped.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self, elapsed: Duration) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
        self.rotation_duration_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, elapsed: Duration) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.sweep_duration_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_task_panic(&self) {
        self.task_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed).max(0) as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bans_issued: self.bans_issued.load(Ordering::Relaxed),
            unbans: self.unbans.load(Ordering::Relaxed),
            failures_reported: self.failures_reported.load(Ordering::Relaxed),
            failures_dropped: self.failures_dropped.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            rotation_duration_us: self.rotation_duration_us.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            sweep_duration_us: self.sweep_duration_us.load(Ordering::Relaxed),
            task_panics: self.task_panics.load(Ordering::Relaxed),
            queue_depth: self.queue_depth(),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self, currently_banned: usize, tracked_entries: usize) -> String {
        let snap = self.snapshot();
        let mut out = String::with_capacity(1024);

        // Gauges (live values)
        gauge(
            &mut out,
            "ipbanner_banned_addresses",
            "Addresses currently banned",
            currently_banned,
        );
        gauge(
            &mut out,
            "ipbanner_tracked_entries",
            "Per-bucket address counters currently held",
            tracked_entries,
        );
        gauge(
            &mut out,
            "ipbanner_queue_depth",
            "Failure reports waiting for evaluation",
            snap.queue_depth,
        );

        counter(
            &mut out,
            "ipbanner_bans_total",
            "Bans issued, including refreshed bans",
            snap.bans_issued,
        );
        counter(
            &mut out,
            "ipbanner_unbans_total",
            "Expired bans removed",
            snap.unbans,
        );
        counter(
            &mut out,
            "ipbanner_failures_total",
            "Failed authentications reported",
            snap.failures_reported,
        );
        counter(
            &mut out,
            "ipbanner_failures_dropped_total",
            "Failure reports dropped after shutdown",
            snap.failures_dropped,
        );
        counter(
            &mut out,
            "ipbanner_rotations_total",
            "Bucket rotations executed",
            snap.rotations,
        );
        counter(
            &mut out,
            "ipbanner_rotation_duration_seconds_sum",
            "Total time spent rotating buckets",
            format_args!("{:.6}", snap.rotation_duration_us as f64 / 1_000_000.0),
        );
        counter(
            &mut out,
            "ipbanner_sweeps_total",
            "Expired-ban sweeps executed",
            snap.sweeps,
        );
        counter(
            &mut out,
            "ipbanner_sweep_duration_seconds_sum",
            "Total time spent sweeping expired bans",
            format_args!("{:.6}", snap.sweep_duration_us as f64 / 1_000_000.0),
        );
        counter(
            &mut out,
            "ipbanner_task_panics_total",
            "Panics caught at background task boundaries",
            snap.task_panics,
        );

        out
    }
}

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    metric(out, "gauge", name, help, value);
}

fn counter(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    metric(out, "counter", name, help, value);
}

fn metric(out: &mut String, kind: &str, name: &str, help: &str, value: impl std::fmt::Display) {
    // Writing to a String cannot fail.
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}
