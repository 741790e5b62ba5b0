//! Mirrors the upstream firehose into the local catalog: a bounded backfill
//! on startup, then a live tail of the updates channel.
mod service;
mod telemetry;

pub use service::{SyncService, TailerState, BATCH_SIZE};
pub use telemetry::{Telemetry, TelemetrySnapshot};
