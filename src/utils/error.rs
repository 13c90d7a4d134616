//! The `error` module defines the error types used across the bus.
//!
//! The taxonomy follows the layers a message passes through:
//! codec errors (`EncodeError`, `DecodeError`), broker errors (`BrokerError`),
//! and the operation-level errors built on top of them (`TopologyError`,
//! `PublishError`, `SubscribeError`). `StartupError` wraps whatever stops a
//! game process from starting. `StoreError` belongs to the game-log
//! persistence used by the server.

use thiserror::Error;

/// A value could not be turned into a payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not encode value as JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("could not encode value as bincode: {0}")]
    Binary(#[source] bincode::Error),
}

/// A payload did not conform to the expected type.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not decode JSON payload: {0}")]
    Json(#[source] serde_json::Error),

    #[error("could not decode bincode payload: {0}")]
    Binary(#[source] bincode::Error),
}

/// Failure reported by the broker or by the client library talking to it.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("channel is closed")]
    ChannelClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("resource locked: {0}")]
    ResourceLocked(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}

/// A queue could not be declared or bound.
///
/// Unrecoverable for the subscription that asked for it.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("could not open channel: {0}")]
    Channel(#[source] BrokerError),

    #[error("could not declare exchange '{exchange}': {source}")]
    DeclareExchange {
        exchange: String,
        #[source]
        source: BrokerError,
    },

    #[error("could not declare queue '{queue}': {source}")]
    DeclareQueue {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("could not bind queue '{queue}' to '{exchange}' with key '{key}': {source}")]
    Bind {
        queue: String,
        exchange: String,
        key: String,
        #[source]
        source: BrokerError,
    },
}

/// A value could not be published. Returned to the caller, never retried.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("could not publish to '{exchange}' with key '{routing_key}': {source}")]
    Transmit {
        exchange: String,
        routing_key: String,
        #[source]
        source: BrokerError,
    },
}

/// A subscription could not be started.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("prefetch for queue '{queue}' must be at least 1")]
    ZeroPrefetch { queue: String },

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("could not set prefetch on queue '{queue}': {source}")]
    Qos {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("could not start consuming queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },
}

/// A game process (server or client) could not start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not open publish channel: {0}")]
    Channel(#[from] BrokerError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
}

/// The game-log store rejected an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("could not serialize game log: {0}")]
    Serialize(#[from] serde_json::Error),
}
