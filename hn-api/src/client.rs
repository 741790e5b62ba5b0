//! Hacker News API Client.
//!
//! The firebase realtime database only speaks http/1 with server side
//! events, so point reads fan out over a pooled connection and the live
//! `updates` channel is consumed as an event-source stream.
use crate::types::{Item, ResultExt, Updates, UpdatesEventData, User};
use anyhow::{Context, Result};
use futures::{stream::FuturesOrdered, TryFutureExt, TryStream, TryStreamExt};
use log::info;
use reqwest::{header, IntoUrl};
use serde::Deserialize;
use std::{
    future::Future,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc::Sender;

pub struct Resolver {
    ip: Vec<SocketAddr>,
}

impl Resolver {
    fn new(host: &str) -> Result<Self> {
        Ok(Self {
            ip: host.to_socket_addrs()?.collect(),
        })
    }
}

impl reqwest::dns::Resolve for Resolver {
    fn resolve(&self, _name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let iter: Box<dyn Iterator<Item = SocketAddr> + Send> =
            Box::new(self.ip.clone().into_iter());
        Box::pin(async { Ok(iter) })
    }
}

/// Hacker News Api client.
pub struct ApiClient {
    client: reqwest::Client,
}

impl ApiClient {
    const API_END_POINT: &'static str = "https://hacker-news.firebaseio.com/v0";

    /// Timeout for a single point read.
    const READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new API client.
    pub fn new() -> Result<Self> {
        let resolver = Arc::new(Resolver::new("hacker-news.firebaseio.com:443")?);

        Ok(Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .gzip(true)
                .dns_resolver(resolver)
                .tcp_keepalive(Duration::from_secs(60))
                .pool_max_idle_per_host(10)
                .use_rustls_tls()
                .no_proxy()
                .build()
                .context("Failed to create api client")?,
        })
    }

    /// Largest item id known upstream.
    pub async fn max_item(&self) -> Result<u64> {
        self.client
            .get(format!("{}/maxitem.json", Self::API_END_POINT))
            .timeout(Self::READ_TIMEOUT)
            .send()
            .and_then(|resp| resp.json::<u64>())
            .await
            .context("Failed to fetch max item id")
    }

    /// Get a single item via item id. An absent item yields [`None`].
    pub fn item(&self, id: u64) -> impl Future<Output = Result<Option<Item>>> + use<'_> {
        self.client
            .get(format!("{}/item/{id}.json", Self::API_END_POINT))
            .timeout(Self::READ_TIMEOUT)
            .send()
            .and_then(|result| result.json::<Option<Item>>())
            .map_err(anyhow::Error::new)
    }

    /// Get multiple items by item id, preserving the input order. Dead and
    /// deleted items are kept; upstream gaps yield a [`None`] payload so the
    /// caller can record them.
    pub fn items(
        &self,
        ids: &[u64],
    ) -> impl TryStream<Ok = (u64, Option<Item>), Error = anyhow::Error> {
        // The firebase api only provides the option to get each item one by
        // one.
        ids.iter()
            .map(|&id| {
                self.client
                    .get(format!("{}/item/{id}.json", Self::API_END_POINT))
                    .timeout(Self::READ_TIMEOUT)
                    .send()
                    .and_then(|resp| resp.json::<Option<Item>>())
                    .map_ok(move |item| (id, item))
            })
            .collect::<FuturesOrdered<_>>()
            .map_err(anyhow::Error::new)
            .into_stream()
    }

    /// Get user by user handle. An absent user yields [`None`].
    pub fn user(&self, handle: &str) -> impl Future<Output = Result<Option<User>>> + use<'_> {
        self.client
            .get(format!("{}/user/{handle}.json", Self::API_END_POINT))
            .timeout(Self::READ_TIMEOUT)
            .send()
            .and_then(|resp| resp.json::<Option<User>>())
            .map_err(anyhow::Error::new)
    }

    /// Get multiple users by handle, preserving the input order.
    pub fn users(
        &self,
        handles: &[String],
    ) -> impl TryStream<Ok = (String, Option<User>), Error = anyhow::Error> {
        handles
            .iter()
            .map(|handle| {
                let handle = handle.clone();
                self.client
                    .get(format!("{}/user/{handle}.json", Self::API_END_POINT))
                    .timeout(Self::READ_TIMEOUT)
                    .send()
                    .and_then(|resp| resp.json::<Option<User>>())
                    .map_ok(move |user| (handle, user))
            })
            .collect::<FuturesOrdered<_>>()
            .map_err(anyhow::Error::new)
            .into_stream()
    }

    /// Subscribe to a server side event and return a stream that yields the
    /// generic event data type.
    fn event_source<EventData>(
        &self,
        url: impl IntoUrl,
    ) -> impl Future<
        Output = reqwest::Result<impl TryStream<Ok = Option<EventData>, Error = anyhow::Error>>,
    >
    where
        EventData: for<'a> Deserialize<'a>,
    {
        self.client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .map_ok(|response| {
                response
                    .bytes_stream()
                    .map_ok(|bytes| parse_event(&bytes))
                    .map_err(anyhow::Error::new)
            })
    }

    /// Stream live updates until the connection drops. Each event carries the
    /// item ids and user handles changed since the previous one.
    pub async fn updates_stream(&self, sender: Sender<Updates>) -> Result<()> {
        let mut stream = self
            .event_source::<UpdatesEventData>(format!("{}/updates.json", Self::API_END_POINT))
            .await?;

        while let Some(event) = stream.try_next().await? {
            if let Some(UpdatesEventData { data, .. }) = event {
                sender.send(data).await?;
            }
        }
        info!("updates stream has exited.");
        Ok(())
    }
}

/// Parse an event from the event-source.
fn parse_event<EventData>(bytes: &[u8]) -> Option<EventData>
where
    EventData: for<'a> Deserialize<'a>,
{
    let mut lines = bytes.split(|b| *b == b'\n');
    lines
        .next()?
        .starts_with(b"event: put")
        .then(|| lines.next())?
        .filter(|data| data.starts_with(b"data: "))
        .and_then(|data| {
            serde_json::from_slice::<EventData>(&data[6..])
                .with_context(|| {
                    format!(
                        "Failed to deserialize event payload: {}",
                        String::from_utf8_lossy(&data[6..])
                    )
                })
                .log_error()
                .ok()
        })
}

#[cfg(test)]
mod tests {
    use super::parse_event;
    use crate::types::UpdatesEventData;

    #[test]
    fn parses_put_event() {
        let bytes = b"event: put\ndata: {\"path\":\"/v0/updates\",\"data\":{\"items\":[500],\"profiles\":[\"alice\"]}}\n\n";

        let event: Option<UpdatesEventData> = parse_event(bytes);

        let event = event.expect("event data");
        assert_eq!(event.data.items, vec![500]);
        assert_eq!(event.data.profiles, vec!["alice"]);
    }

    #[test]
    fn ignores_keep_alive() {
        let bytes = b"event: keep-alive\ndata: null\n\n";

        let event: Option<UpdatesEventData> = parse_event(bytes);

        assert!(event.is_none());
    }
}
