//! Server configuration.
//!
//! Every option can be given as a flag or through the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::storage::persistent::PersistentConfig;

/// Command-line configuration for `contactlink-server`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "contactlink-server",
    version,
    about = "Identity reconciliation service over HTTP"
)]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Database directory.
    #[arg(long, env = "CONTACTLINK_DATA_DIR", default_value = "./contacts.db")]
    pub data_dir: PathBuf,

    /// Attempts at opening the database before giving up.
    #[arg(long, env = "CONTACTLINK_INIT_RETRIES", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub init_retries: u32,

    /// Delay between database open attempts, in milliseconds.
    #[arg(long, env = "CONTACTLINK_INIT_RETRY_DELAY_MS", default_value_t = 5000)]
    pub init_retry_delay_ms: u64,

    /// Skip fsync after each WAL write.
    #[arg(long)]
    pub no_sync: bool,

    /// WAL size in bytes that triggers compaction.
    #[arg(long, env = "CONTACTLINK_MAX_WAL_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_wal_bytes: u64,
}

impl ServerConfig {
    /// Socket address to bind, from `host` and `port`.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Delay between open attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }

    /// Storage settings derived from the flags.
    #[must_use]
    pub fn persistent_config(&self) -> PersistentConfig {
        PersistentConfig {
            max_wal_size: self.max_wal_bytes,
            sync_on_write: !self.no_sync,
        }
    }
}
