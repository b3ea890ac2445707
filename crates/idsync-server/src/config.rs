use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use idsync_graph::DEFAULT_BOT_PATTERN;

/// File name of the cache snapshot under `LOCAL_FILE_PATH`.
pub const CACHE_FILE_NAME: &str = "cache.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server settings. Every flag can also be set through its environment
/// variable. Graph backend settings are read from `DGRAPH_URL`, `DGRAPH_USER`,
/// `DGRAPH_PASS` and `DGRAPH_TIMEOUT`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "idsync-server",
    version,
    about = "First-party cookie sync endpoint"
)]
pub struct ServerConfig {
    /// Domain attribute of the `muid` cookie
    #[arg(long, env = "COOKIE_DOMAIN", default_value = "a.osintami.com")]
    pub cookie_domain: String,

    /// Directory holding the cache snapshot
    #[arg(long, env = "LOCAL_FILE_PATH", default_value = "./external/")]
    pub local_file_path: PathBuf,

    /// Mount point of the sync route, e.g. `/v1`
    #[arg(long, env = "PATH_PREFIX", default_value = "")]
    pub path_prefix: String,

    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: SocketAddr,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = 1_000_000)]
    pub cache_max_entries: u64,

    /// Fold sync states into the identity graph in the background
    #[arg(long, env = "CONSOLIDATE")]
    pub consolidate: bool,

    #[arg(long, env = "CONSOLIDATE_QUEUE", default_value_t = 1024)]
    pub consolidate_queue: usize,

    /// User agents matching this pattern never reach the graph
    #[arg(long, env = "BOT_PATTERN", default_value = DEFAULT_BOT_PATTERN)]
    pub bot_pattern: String,
}

impl ServerConfig {
    pub fn cache_path(&self) -> PathBuf {
        self.local_file_path.join(CACHE_FILE_NAME)
    }
}
