//! Environment configuration for the service.
use anyhow::{Context, Result};
use log::warn;
use std::{env, path::PathBuf};

/// Default overlap for the backfill window and the embedding catchup
/// rewind.
pub const DEFAULT_OFFSET: u64 = 10_000;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Space-separated behavior flags from `OPTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOpts {
    /// Disable the live tailer and backfill.
    pub nosync: bool,
    /// Disable catchup embedding on startup.
    pub noembed: bool,
    /// Log every search query.
    pub debug: bool,
    /// Overlap window for backfill and catchup.
    pub offset: u64,
}

impl Default for ServerOpts {
    fn default() -> Self {
        Self {
            nosync: false,
            noembed: false,
            debug: false,
            offset: DEFAULT_OFFSET,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The primary catalog database.
    pub db_path: PathBuf,
    /// The embedding database, `<stem>_embeddings.db` next to the catalog.
    pub embeddings_path: PathBuf,
    /// Embedder cache file, next to the catalog.
    pub cache_path: PathBuf,
    /// Missing-id ledger, next to the catalog.
    pub missing_path: PathBuf,
    pub opts: ServerOpts,
    /// Shared secret for the metrics endpoint.
    pub passwd: Option<String>,
    pub api_key: String,
    pub api_base_url: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let db_path = PathBuf::from(
            env::var("DB_PATH").context("Set DB_PATH to the path of the primary database")?,
        );
        let api_key = env::var("OPENAI_API_KEY")
            .context("Set OPENAI_API_KEY for the embedding model endpoint")?;
        let api_base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let opts = parse_opts(env::var("OPTS").ok().as_deref());
        let passwd = env::var("PASSWD").ok().filter(|passwd| !passwd.is_empty());
        let port = env::var("PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Ok(Self {
            embeddings_path: embeddings_path(&db_path),
            cache_path: sibling(&db_path, "embedder_cache.jsonl"),
            missing_path: sibling(&db_path, "missing_ids.txt"),
            db_path,
            opts,
            passwd,
            api_key,
            api_base_url,
            port,
        })
    }
}

fn parse_opts(opts: Option<&str>) -> ServerOpts {
    let mut parsed = ServerOpts::default();
    let Some(opts) = opts else {
        return parsed;
    };

    for flag in opts.split_whitespace() {
        match flag {
            "nosync" => parsed.nosync = true,
            "noembed" => parsed.noembed = true,
            "debug" => parsed.debug = true,
            _ if flag.starts_with("offset=") => match flag["offset=".len()..].parse() {
                Ok(offset) => parsed.offset = offset,
                Err(_) => warn!("Ignoring bad offset flag {flag:?}"),
            },
            other => warn!("Ignoring unknown OPTS flag {other:?}"),
        }
    }
    parsed
}

/// `<stem>_embeddings.db` in the catalog's directory.
fn embeddings_path(db_path: &PathBuf) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hn".to_owned());
    sibling(db_path, &format!("{stem}_embeddings.db"))
}

fn sibling(db_path: &PathBuf, name: &str) -> PathBuf {
    match db_path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from(name),
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}
