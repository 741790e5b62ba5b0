//! The sync service: bounded backfill plus the live updates tailer.
//!
//! Both activities share the update buffer and the disconnect flag. Events
//! arriving during backfill are buffered in arrival order and drained, in
//! that order, once the backfill has committed its last batch.
use crate::telemetry::Telemetry;
use anyhow::Result;
use futures::TryStreamExt;
use hn_api::{ApiClient, Updates};
use hn_store::{ItemStore, MissingIds};
use log::{error, info, warn};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;

/// Ids fetched per point-read fan-out.
pub const BATCH_SIZE: usize = 64;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRIES: usize = 5;

/// Lifecycle of one tailer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TailerState {
    Idle = 0,
    Connected = 1,
    Streaming = 2,
    Disconnected = 3,
    Stopped = 4,
}

impl TailerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TailerState::Connected,
            2 => TailerState::Streaming,
            3 => TailerState::Disconnected,
            4 => TailerState::Stopped,
            _ => TailerState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TailerState::Idle => "idle",
            TailerState::Connected => "connected",
            TailerState::Streaming => "streaming",
            TailerState::Disconnected => "disconnected",
            TailerState::Stopped => "stopped",
        }
    }
}

pub struct SyncService {
    api: Arc<ApiClient>,
    store: Arc<ItemStore>,
    missing: Arc<MissingIds>,
    telemetry: Arc<Telemetry>,
    offset: u64,
    buffer: Mutex<Vec<Updates>>,
    affected: Mutex<HashSet<u64>>,
    initial_fetch_completed: AtomicBool,
    disconnect: AtomicBool,
    tailer_state: AtomicU8,
}

impl SyncService {
    pub fn new(
        api: Arc<ApiClient>,
        store: Arc<ItemStore>,
        missing: Arc<MissingIds>,
        telemetry: Arc<Telemetry>,
        offset: u64,
    ) -> Self {
        Self {
            api,
            store,
            missing,
            telemetry,
            offset,
            buffer: Mutex::new(Vec::new()),
            affected: Mutex::new(HashSet::new()),
            initial_fetch_completed: AtomicBool::new(false),
            disconnect: AtomicBool::new(false),
            tailer_state: AtomicU8::new(TailerState::Idle as u8),
        }
    }

    pub fn initial_fetch_completed(&self) -> bool {
        self.initial_fetch_completed.load(Ordering::SeqCst)
    }

    fn disconnected(&self) -> bool {
        self.disconnect.load(Ordering::SeqCst)
    }

    /// Unblock every sync loop; they exit at their next check.
    pub fn shutdown(&self) {
        info!("Shutting down sync service...");
        self.disconnect.store(true, Ordering::SeqCst);
    }

    pub fn tailer_state(&self) -> TailerState {
        TailerState::from_u8(self.tailer_state.load(Ordering::SeqCst))
    }

    fn set_tailer_state(&self, state: TailerState) {
        self.tailer_state.store(state as u8, Ordering::SeqCst);
    }

    /// Number of buffered live events awaiting the end of backfill.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().map(|buffer| buffer.len()).unwrap_or(0)
    }

    /// Take the accumulated affected-story set, smallest id first.
    pub fn drain_affected(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = match self.affected.lock() {
            Ok(mut affected) => affected.drain().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    /// Walk `[start, upstream_max]` in fixed batches, committing each batch
    /// before advancing. The window deliberately overlaps previously
    /// committed state so edits near the head get repaired.
    pub async fn backfill(&self) -> Result<()> {
        let upstream_max = self.api.max_item().await?;
        let local_max = self.store.max_item_id()?;
        let (start, end) = backfill_window(local_max, upstream_max, self.offset);

        info!("Fetching items from id {start} to {end}");
        let mut cursor = start;
        while cursor <= end && !self.disconnected() {
            let batch_end = (cursor + BATCH_SIZE as u64 - 1).min(end);
            let ids: Vec<u64> = (cursor..=batch_end)
                .filter(|id| !self.missing.contains(*id))
                .collect();

            self.fetch_items_with_retry(&ids).await;
            cursor = batch_end + 1;
        }

        info!(
            "Finished initial fetch, now inserting updates (buffered {})",
            self.buffered()
        );
        self.initial_fetch_completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Retry a batch a bounded number of times; a batch that keeps failing
    /// is skipped and repaired by the overlap of the next run.
    async fn fetch_items_with_retry(&self, ids: &[u64]) {
        for attempt in 1..=MAX_RETRIES {
            match self.fetch_and_store_items(ids).await {
                Ok(()) => return,
                Err(err) if attempt < MAX_RETRIES => {
                    warn!("Batch fetch failed (attempt {attempt}): {err}, retrying in 5s");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => {
                    error!("Giving up on batch after {MAX_RETRIES} attempts: {err}");
                }
            }
        }
    }

    async fn fetch_and_store_items(&self, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let fetched: Vec<(u64, Option<hn_api::Item>)> =
            self.api.items(ids).try_collect().await?;

        let mut items = Vec::with_capacity(fetched.len());
        let mut gaps = Vec::new();
        for (id, item) in fetched {
            match item {
                Some(item) => items.push(item),
                None => gaps.push(id),
            }
        }

        self.store.upsert_items(&items)?;
        self.telemetry.add_items_updated(items.len());
        self.missing.record(gaps)?;
        Ok(())
    }

    async fn fetch_and_store_users(&self, handles: &[String]) -> Result<()> {
        if handles.is_empty() {
            return Ok(());
        }

        let fetched: Vec<(String, Option<hn_api::User>)> =
            self.api.users(handles).try_collect().await?;

        let users: Vec<hn_api::User> =
            fetched.into_iter().filter_map(|(_, user)| user).collect();
        self.telemetry.add_users_updated(users.len());
        self.store.upsert_users(&users)?;
        Ok(())
    }

    /// Tail the live updates channel forever, reconnecting on any drop.
    /// Events are appended to the buffer in arrival order; once backfill has
    /// completed, every arrival drains the whole buffer through
    /// [`process_updates`](Self::process_updates).
    pub async fn watch_updates(&self) -> Result<()> {
        while !self.disconnected() {
            self.set_tailer_state(TailerState::Connected);
            let (tx, mut rx) = mpsc::channel::<Updates>(100);
            let api = self.api.clone();
            let stream = tokio::spawn(async move { api.updates_stream(tx).await });

            self.set_tailer_state(TailerState::Streaming);
            while let Some(updates) = rx.recv().await {
                if self.disconnected() {
                    break;
                }
                if updates.is_empty() {
                    continue;
                }

                self.telemetry.record_update();
                if let Ok(mut buffer) = self.buffer.lock() {
                    buffer.push(updates);
                }

                if !self.initial_fetch_completed() {
                    info!("Buffer now at {}.", self.buffered());
                    continue;
                }

                let batch = match self.buffer.lock() {
                    Ok(buffer) => buffer.clone(),
                    Err(_) => continue,
                };
                match self.process_updates(&batch).await {
                    Ok(()) => {
                        // Only the tailer appends, so dropping the processed
                        // prefix cannot lose events.
                        if let Ok(mut buffer) = self.buffer.lock() {
                            let n = batch.len().min(buffer.len());
                            buffer.drain(..n);
                        }
                    }
                    Err(err) => {
                        error!("Failed to process updates, keeping buffer: {err}");
                    }
                }
            }

            drop(rx);
            match stream.await {
                Ok(Ok(())) => info!("Updates stream ended"),
                Ok(Err(err)) => error!("Updates stream severed: {err}"),
                Err(err) => error!("Updates stream task failed: {err}"),
            }

            if self.disconnected() {
                break;
            }
            self.set_tailer_state(TailerState::Disconnected);
            warn!("Reconnecting to updates channel in 5 seconds...");
            tokio::time::sleep(RETRY_DELAY).await;
        }

        self.set_tailer_state(TailerState::Stopped);
        info!("Tailer stopped");
        Ok(())
    }

    /// Fetch and upsert everything the buffered events touched, then fold
    /// each touched item's root story into the affected set.
    async fn process_updates(&self, batch: &[Updates]) -> Result<()> {
        let mut items = Vec::new();
        let mut profiles = Vec::new();
        for updates in batch {
            items.extend_from_slice(&updates.items);
            profiles.extend_from_slice(&updates.profiles);
        }

        for chunk in items.chunks(BATCH_SIZE) {
            self.fetch_and_store_items(chunk).await?;
        }
        for chunk in profiles.chunks(BATCH_SIZE) {
            self.fetch_and_store_users(chunk).await?;
        }
        info!("Updated {} items and {} profiles.", items.len(), profiles.len());

        let mut touched = HashSet::new();
        for &item_id in &items {
            if let Some(story_id) = self.store.root_story_id(item_id)? {
                touched.insert(story_id);
            }
        }
        self.telemetry.add_affected_stories(touched.len());
        if let Ok(mut affected) = self.affected.lock() {
            affected.extend(touched);
        }
        Ok(())
    }
}

/// The backfill window: overlap the local head by `offset` ids, clamped to
/// the first item.
fn backfill_window(local_max: u64, upstream_max: u64, offset: u64) -> (u64, u64) {
    (local_max.saturating_sub(offset).max(1), upstream_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_overlaps_local_head() {
        assert_eq!(backfill_window(100, 120, 10), (90, 120));
    }

    #[test]
    fn window_clamps_to_first_item() {
        assert_eq!(backfill_window(5, 120, 10), (1, 120));
        assert_eq!(backfill_window(0, 120, 10_000), (1, 120));
    }

    #[test]
    fn tailer_state_round_trips() {
        for state in [
            TailerState::Idle,
            TailerState::Connected,
            TailerState::Streaming,
            TailerState::Disconnected,
            TailerState::Stopped,
        ] {
            assert_eq!(TailerState::from_u8(state as u8), state);
        }
    }
}
