//! A client for the Hacker News firebase API: batched point reads and the
//! live updates event stream.
mod client;
mod types;

pub use crate::client::ApiClient;
pub use types::{Item, ResultExt, Updates, UpdatesEventData, User};
