//! Error taxonomy. Every error here is scoped to a single command or a single
//! transition; none of them stops a running sender.

use thiserror::Error;

pub use transition_curves::{CurveError, GeometryError};

/// A rejected write or a malformed command field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Channel {0} is outside 1..=512")]
    ChannelOutOfRange(i64),

    #[error("Value {value} for channel {channel} is outside 0..=255")]
    ValueOutOfRange { channel: i64, value: i64 },

    #[error("Bucket fill end {fill} lies before its channel {channel}")]
    InvalidFill { channel: i64, fill: i64 },

    #[error("Arc transition is missing `{0}`")]
    MissingField(&'static str),

    #[error("Arc pan and tilt both use channel {0}")]
    OverlappingArcChannels(u16),

    #[error("`{field}` must be a non-negative number, got {value}")]
    NegativeTiming { field: &'static str, value: i64 },

    #[error("Duration of {duration_ms} ms exceeds the {max_ms} ms limit")]
    DurationTooLong { duration_ms: u64, max_ms: u64 },

    #[error("Payload carries neither channel, buckets nor a frame")]
    EmptyPayload,

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Transmit failed: {0}")]
    Transmit(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Frame store database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored frame is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    Invalid(String),
}

/// Everything that can go wrong while handling one inbound command.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    UnknownTransition(#[from] CurveError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sender {0} has stopped")]
    Stopped(String),

    #[error("No sender with id {0}")]
    UnknownSender(String),
}
