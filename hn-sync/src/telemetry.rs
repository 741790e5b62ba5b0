//! Counters shared by the sync tasks, reported by the metrics endpoint.
use serde::Serialize;
use std::{
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct Telemetry {
    updates: AtomicU64,
    items_updated: AtomicU64,
    users_updated: AtomicU64,
    affected_stories: AtomicU64,
    embedded_stories: AtomicU64,
    embed_runs: AtomicU64,
    last_update: AtomicI64,
    last_embed: AtomicI64,
    started_at: AtomicI64,
}

/// Point-in-time copy of the counters, ready to serialize.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TelemetrySnapshot {
    pub updates: u64,
    pub items_updated: u64,
    pub users_updated: u64,
    pub affected_stories: u64,
    pub embedded_stories: u64,
    pub embed_runs: u64,
    pub last_update: i64,
    pub last_embed: i64,
    pub started_at: i64,
}

impl Telemetry {
    pub fn new() -> Self {
        let telemetry = Self::default();
        telemetry.started_at.store(unix_now(), Ordering::Relaxed);
        telemetry
    }

    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.last_update.store(unix_now(), Ordering::Relaxed);
    }

    pub fn add_items_updated(&self, count: usize) {
        self.items_updated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_users_updated(&self, count: usize) {
        self.users_updated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_affected_stories(&self, count: usize) {
        self.affected_stories.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_embed_run(&self, stories: usize) {
        self.embedded_stories.fetch_add(stories as u64, Ordering::Relaxed);
        self.embed_runs.fetch_add(1, Ordering::Relaxed);
        self.last_embed.store(unix_now(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            updates: self.updates.load(Ordering::Relaxed),
            items_updated: self.items_updated.load(Ordering::Relaxed),
            users_updated: self.users_updated.load(Ordering::Relaxed),
            affected_stories: self.affected_stories.load(Ordering::Relaxed),
            embedded_stories: self.embedded_stories.load(Ordering::Relaxed),
            embed_runs: self.embed_runs.load(Ordering::Relaxed),
            last_update: self.last_update.load(Ordering::Relaxed),
            last_embed: self.last_embed.load(Ordering::Relaxed),
            started_at: self.started_at.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Telemetry;

    #[test]
    fn counters_accumulate() {
        let telemetry = Telemetry::new();
        telemetry.record_update();
        telemetry.record_update();
        telemetry.add_items_updated(3);
        telemetry.record_embed_run(5);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.updates, 2);
        assert_eq!(snapshot.items_updated, 3);
        assert_eq!(snapshot.embedded_stories, 5);
        assert_eq!(snapshot.embed_runs, 1);
        assert!(snapshot.last_update > 0);
    }
}
