//! Emulator configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::{Backoff, RetryPolicy};

/// Default account name for development storage.
pub const DEFAULT_ACCOUNT: &str = "devstoreaccount1";

/// Default blob service port.
pub const DEFAULT_BLOB_PORT: u16 = 10000;

/// Default queue service port.
pub const DEFAULT_QUEUE_PORT: u16 = 10001;

/// Default API version, also stamped into access signatures.
pub const DEFAULT_API_VERSION: &str = "2021-10-04";

/// Default storage root when no location is given.
pub const DEFAULT_LOCATION: &str = "__azurite_fs__";

/// Content type reported for blobs that never had one set.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "azurite-fs")]
#[command(about = "Filesystem-backed Azure Blob and Queue Storage emulator")]
#[command(version)]
pub struct Args {
    /// Location for workspace data.
    #[arg(long, short = 'l', default_value = DEFAULT_LOCATION)]
    pub location: PathBuf,

    /// Storage account name.
    #[arg(long, default_value = DEFAULT_ACCOUNT)]
    pub account: String,

    /// Host used when building blob and queue URIs.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port used when building blob URIs.
    #[arg(long, default_value_t = DEFAULT_BLOB_PORT)]
    pub blob_port: u16,

    /// Port used when building queue URIs.
    #[arg(long, default_value_t = DEFAULT_QUEUE_PORT)]
    pub queue_port: u16,

    /// Attempts made to acquire a contended file before giving up.
    #[arg(long, default_value_t = 10)]
    pub lock_retries: u32,

    /// Wait between lock attempts, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub lock_retry_interval_ms: u64,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations exposed by the command-line tool.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload a local file as a blob.
    Put {
        container: String,
        blob: String,
        file: PathBuf,
        /// Content type to record for the blob.
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download a blob to stdout or a file.
    Get {
        container: String,
        blob: String,
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Print blob properties and metadata as JSON.
    Stat { container: String, blob: String },
    /// Merge `key=value` pairs into a blob's metadata.
    SetMeta {
        container: String,
        blob: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Copy a blob, given by URI, onto a destination blob.
    Copy {
        source: String,
        container: String,
        blob: String,
    },
    /// List blobs in a container.
    Ls {
        container: String,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete a blob.
    Rm { container: String, blob: String },
    /// Add a message to a queue, creating the queue if needed.
    Enqueue { queue: String, body: String },
    /// Take the oldest message from a queue.
    Dequeue {
        queue: String,
        /// Delete the message after printing it.
        #[arg(long)]
        delete: bool,
    },
    /// Print a blob URI with an access signature attached.
    Sas {
        container: String,
        blob: String,
        /// Permission letters, any of "racwdl".
        #[arg(long, default_value = "r")]
        perms: String,
        /// Validity window in hours.
        #[arg(long, default_value_t = 1)]
        hours: i64,
    },
}

/// Tunables for retry loops, streaming and signature generation.
#[derive(Debug, Clone)]
pub struct EmulatorSettings {
    /// Retry policy for blob content and metadata locks.
    pub lock_retry: RetryPolicy,
    /// Retry policy for each file copy step of a blob copy.
    pub copy_retry: RetryPolicy,
    /// Retry policy for creating queue message files.
    pub enqueue_retry: RetryPolicy,
    /// Chunk size used when streaming blob content.
    pub chunk_size: usize,
    /// Content type substituted when a blob has none recorded.
    pub default_content_type: String,
    /// Version stamped into access signatures.
    pub sas_version: String,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            lock_retry: RetryPolicy::new(10, Backoff::Fixed(Duration::from_millis(100))),
            copy_retry: RetryPolicy::new(5, Backoff::Fixed(Duration::from_millis(50))),
            enqueue_retry: RetryPolicy::new(
                10,
                Backoff::Jitter {
                    min: Duration::from_millis(10),
                    max: Duration::from_millis(100),
                },
            ),
            chunk_size: 64 * 1024,
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            sas_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

/// Emulator configuration derived from command-line arguments.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding the `blobs` and `queues` trees.
    pub location: PathBuf,
    /// Storage account name.
    pub account: String,
    /// Host used in generated URIs.
    pub host: String,
    /// Port for blob URIs.
    pub blob_port: u16,
    /// Port for queue URIs.
    pub queue_port: u16,
    /// Retry, streaming and signature tunables.
    pub settings: EmulatorSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: PathBuf::from(DEFAULT_LOCATION),
            account: DEFAULT_ACCOUNT.to_string(),
            host: "127.0.0.1".to_string(),
            blob_port: DEFAULT_BLOB_PORT,
            queue_port: DEFAULT_QUEUE_PORT,
            settings: EmulatorSettings::default(),
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let mut settings = EmulatorSettings::default();
        settings.lock_retry = RetryPolicy::new(
            args.lock_retries.max(1),
            Backoff::Fixed(Duration::from_millis(args.lock_retry_interval_ms)),
        );
        Self {
            location: args.location,
            account: args.account,
            host: args.host,
            blob_port: args.blob_port,
            queue_port: args.queue_port,
            settings,
        }
    }
}

impl Config {
    /// Creates a configuration rooted at `location` with default settings.
    pub fn with_location(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    /// Directory holding one sub-directory per blob container.
    pub fn blob_root(&self) -> PathBuf {
        self.location.join("blobs")
    }

    /// Directory holding one sub-directory per queue.
    pub fn queue_root(&self) -> PathBuf {
        self.location.join("queues")
    }

    /// Path-style blob service endpoint, e.g. `http://127.0.0.1:10000/devstoreaccount1`.
    pub fn blob_endpoint(&self) -> String {
        format!("http://{}:{}/{}", self.host, self.blob_port, self.account)
    }

    /// Path-style queue service endpoint.
    pub fn queue_endpoint(&self) -> String {
        format!("http://{}:{}/{}", self.host, self.queue_port, self.account)
    }
}
