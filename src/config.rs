//! Configuration loading and validation.

use std::mem::size_of;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result, ValidationError};
use crate::network::{CapturedPacket, MIN_BUFFER_SIZE};

/// Estimated in-memory size of one parsed DNS response.
const ESTIMATED_DNS_INFO_SIZE: u64 = 256;

/// Estimated in-memory size of one validated batch.
const ESTIMATED_BATCH_SIZE: u64 = 4 * 1024 * 1024;

/// Main configuration for the DNS detector.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Network interface to capture on.
    pub interface: String,

    /// Requested kernel capture buffer size in bytes.
    #[serde(default = "default_capture_buffer_size")]
    pub capture_buffer_size: u32,

    #[serde(default)]
    pub queues: QueueSettings,

    #[serde(default)]
    pub batching: BatchSettings,

    #[serde(default)]
    pub lists: ListsConfig,

    #[serde(default)]
    pub publisher: PublisherSettings,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Capacities of the three pipeline queues.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    /// Captured packets waiting for the filter.
    #[serde(default = "default_packets_capacity")]
    pub packets: usize,

    /// Parsed DNS responses waiting for the validator.
    #[serde(default = "default_dns_info_capacity")]
    pub dns_info: usize,

    /// Validated batches waiting for the publisher.
    #[serde(default = "default_validated_capacity")]
    pub validated: usize,

    /// Derive all three capacities from a memory budget instead.
    pub memory_budget_mb: Option<u64>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            packets: default_packets_capacity(),
            dns_info: default_dns_info_capacity(),
            validated: default_validated_capacity(),
            memory_budget_mb: None,
        }
    }
}

/// Resolved queue capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapacities {
    pub packets: usize,
    pub dns_info: usize,
    pub validated: usize,
}

impl QueueSettings {
    /// Resolve the capacities, splitting `memory_budget_mb` when set.
    ///
    /// The budget is split 80% packets, 15% DNS responses, 5% batches.
    /// Every capacity is at least 1.
    pub fn capacities(&self) -> QueueCapacities {
        let Some(budget_mb) = self.memory_budget_mb else {
            return QueueCapacities {
                packets: self.packets,
                dns_info: self.dns_info,
                validated: self.validated,
            };
        };

        let budget = budget_mb.saturating_mul(1024 * 1024);
        let packet_size = u64::try_from(size_of::<CapturedPacket>()).unwrap_or(u64::MAX);
        let share = |percent: u64, item_size: u64| {
            let count = budget / 100 * percent / item_size;
            usize::try_from(count).unwrap_or(usize::MAX).max(1)
        };

        QueueCapacities {
            packets: share(80, packet_size),
            dns_info: share(15, ESTIMATED_DNS_INFO_SIZE),
            validated: share(5, ESTIMATED_BATCH_SIZE),
        }
    }
}

/// Flush policy of the domain validator and poll interval of every stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSettings {
    /// Flush once this many distinct domains are accumulated.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Flush once more than this many domain names were processed.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,

    /// How long a stage waits on an empty queue before checking for cancellation.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl BatchSettings {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_cycles: default_max_cycles(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Format of a domain list file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    /// One domain per line, `*.` wildcards allowed.
    #[default]
    Domains,
    /// `/etc/hosts` style: an address followed by host names.
    Hosts,
}

/// A domain list file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListSource {
    pub path: PathBuf,

    #[serde(default)]
    pub format: ListFormat,
}

/// Block and allow list sources, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListsConfig {
    #[serde(default)]
    pub blocklist: Vec<ListSource>,

    #[serde(default)]
    pub allowlist: Vec<ListSource>,
}

/// Destination of published results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkConfig {
    /// Emit every document as a log event.
    #[default]
    Log,
    /// Append one document per line to a file.
    File(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherSettings {
    #[serde(default)]
    pub sink: SinkConfig,

    /// Delivery attempts per batch before it is dropped.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl PublisherSettings {
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

const fn default_capture_buffer_size() -> u32 {
    100 * 1024 * 1024
}

const fn default_packets_capacity() -> usize {
    10_000
}

const fn default_dns_info_capacity() -> usize {
    100_000
}

const fn default_validated_capacity() -> usize {
    64
}

const fn default_max_batch_size() -> usize {
    100_000
}

const fn default_max_cycles() -> usize {
    100_000
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_retry_attempts() -> u32 {
    5
}

const fn default_retry_delay_ms() -> u64 {
    2000
}

const fn default_metrics_listen() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 9090)
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::from)?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.interface.trim().is_empty() {
            return Err(ValidationError::EmptyInterface);
        }

        if self.capture_buffer_size < MIN_BUFFER_SIZE {
            return Err(ValidationError::CaptureBufferTooSmall {
                min: MIN_BUFFER_SIZE,
            });
        }

        match self.queues.memory_budget_mb {
            Some(0) => return Err(ValidationError::ZeroMemoryBudget),
            Some(_) => {}
            None => {
                for (name, capacity) in [
                    ("packets", self.queues.packets),
                    ("dns_info", self.queues.dns_info),
                    ("validated", self.queues.validated),
                ] {
                    if capacity == 0 {
                        return Err(ValidationError::ZeroQueueCapacity { name });
                    }
                }
            }
        }

        if self.batching.max_batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize);
        }

        if self.batching.max_cycles == 0 {
            return Err(ValidationError::ZeroCycleCount);
        }

        if self.batching.poll_interval_ms == 0 {
            return Err(ValidationError::ZeroPollInterval);
        }

        if self.publisher.retry_attempts == 0 {
            return Err(ValidationError::ZeroRetryAttempts);
        }

        for (list, sources) in [
            ("blocklist", &self.lists.blocklist),
            ("allowlist", &self.lists.allowlist),
        ] {
            if sources.iter().any(|s| s.path.as_os_str().is_empty()) {
                return Err(ValidationError::EmptyListPath { list });
            }
        }

        Ok(())
    }
}
