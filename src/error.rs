//! Error types for the DNS detector pipeline.

use std::io;

use thiserror::Error;

use crate::lists::ListLoadError;

/// Main error type for detector operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("list lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("failed to load domain lists: {0}")]
    Lists(#[from] ListLoadError),

    #[error("{stage} stage panicked")]
    StagePanicked { stage: &'static str },

    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("interface cannot be empty")]
    EmptyInterface,

    #[error("capture_buffer_size must be at least {min} bytes")]
    CaptureBufferTooSmall { min: u32 },

    #[error("queues.{name} must be greater than 0")]
    ZeroQueueCapacity { name: &'static str },

    #[error("queues.memory_budget_mb must be greater than 0")]
    ZeroMemoryBudget,

    #[error("batching.max_batch_size must be greater than 0")]
    ZeroBatchSize,

    #[error("batching.max_cycles must be greater than 0")]
    ZeroCycleCount,

    #[error("batching.poll_interval_ms must be greater than 0")]
    ZeroPollInterval,

    #[error("publisher.retry_attempts must be greater than 0")]
    ZeroRetryAttempts,

    #[error("list source in {list} has an empty path")]
    EmptyListPath { list: &'static str },
}

/// Packet capture errors.
///
/// Every variant raised while opening a [`PacketSniffer`](crate::network::PacketSniffer)
/// is fatal for that sniffer; there is no runtime retry.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("could not open device {device:?}: {reason}")]
    Open { device: String, reason: String },

    #[error("could not set capture buffer size to any value of at least {floor} bytes")]
    BufferSize { floor: u32 },

    #[error("could not activate capture handle: {0}")]
    Activate(String),

    #[error("could not compile or install filter {expression:?}: {reason}")]
    Filter { expression: String, reason: String },

    #[error("cannot {step} on an activated capture handle")]
    AlreadyActivated { step: &'static str },

    #[error("cannot {step} before the capture handle is activated")]
    NotActivated { step: &'static str },

    #[error("capture option rejected: {0}")]
    Rejected(String),

    #[error("failed to read packet: {0}")]
    Read(String),

    #[error("failed to read capture statistics: {0}")]
    Stats(String),
}

/// Errors reported by a block-list / allow-list lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{list} lookup unavailable: {reason}")]
    Unavailable { list: &'static str, reason: String },
}

/// Errors reported by a message publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to deliver message: {0}")]
    Delivery(String),

    #[error("I/O error while publishing: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
