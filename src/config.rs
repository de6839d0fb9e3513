//! Configuration for remote services, remote proxies and the worker pool.
//!
//! # Usage
//!
//! ```
//! use ironfan::config::ServiceConfig;
//!
//! let config = ServiceConfig {
//!     memoize: false,
//!     ..Default::default()
//! };
//! assert_eq!(config.max_frame_bytes, 20 * 1024 * 1024);
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings of one remote service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Remember results of map, zip and sketch requests and answer repeats from
    /// memory. Can be flipped at runtime with a control message.
    pub memoize: bool,
    /// Largest frame accepted or sent by a network transport.
    pub max_frame_bytes: usize,
    /// Size of the global worker pool. `None` means one thread per CPU.
    pub worker_threads: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            memoize: true,
            max_frame_bytes: 20 * 1024 * 1024,
            worker_threads: None,
        }
    }
}

impl ServiceConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}

/// Settings of a remote proxy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Deadline for a whole operation. On expiry the stream fails with a
    /// transport error and the operation is unsubscribed.
    pub timeout: Option<Duration>,
}

impl RemoteConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Size the global rayon pool used by leaves. Returns the thread count.
///
/// Only the first call can take effect; later calls (and calls after the pool
/// was started implicitly) leave the pool as it is.
pub fn init_worker_pool(threads: Option<usize>) -> usize {
    let threads = threads.unwrap_or_else(num_cpus::get).max(1);
    // ok() to ignore "already built"
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
    rayon::current_num_threads()
}
