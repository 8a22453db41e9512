use std::{sync::Arc, time::Duration};

/// Pool size used when routing cannot see any peer's pool, and the default
/// for [`Config`]. Routing stays resolvable even when every referenced peer
/// is down, so node-down failures can be synthesized instead of erroring.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Name prefix delegates are registered under by default.
pub const DEFAULT_NAME_PREFIX: &str = "delegate_";

/// Configuration for a node's delegate worker pool.
///
/// Use the builder pattern to customize, or use [`Default`] for sensible
/// defaults. Pool size and name prefix should be uniform across the cluster:
/// routing hashes into `[0, pool_size)` and addresses the same name on every
/// peer node.
///
/// # Examples
///
/// ```rust
/// use tessen::Config;
///
/// let config = Config::default()
///     .with_pool_size(4)
///     .with_hibernate_after(std::time::Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Number of delegate workers registered per node.
    /// Default: 16
    pool_size: usize,

    /// Prefix workers are registered under; worker `i` is named
    /// `{prefix}{i}`.
    /// Default: "delegate_"
    name_prefix: Arc<str>,

    /// How long a worker sits idle before releasing spare capacity.
    /// A resource hint, not a semantic knob.
    /// Default: 10s
    hibernate_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool_size: DEFAULT_POOL_SIZE,
            name_prefix: Arc::from(DEFAULT_NAME_PREFIX),
            hibernate_after: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Set the number of delegate workers per node. Clamped to at least 1.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Returns the number of delegate workers per node.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Set the registration name prefix for delegate workers.
    pub fn with_name_prefix(mut self, prefix: &str) -> Self {
        self.name_prefix = Arc::from(prefix);
        self
    }

    /// Returns the registration name prefix.
    pub fn name_prefix(&self) -> Arc<str> {
        self.name_prefix.clone()
    }

    /// Set how long a worker stays idle before hibernating.
    pub fn with_hibernate_after(mut self, after: Duration) -> Self {
        self.hibernate_after = after;
        self
    }

    /// Returns the idle interval after which a worker hibernates.
    pub fn hibernate_after(&self) -> Duration {
        self.hibernate_after
    }
}
