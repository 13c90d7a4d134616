//! The `broker` module is the seam between the bus and an AMQP-style broker.
//!
//! [`BrokerConnection`] and [`BrokerChannel`] mirror the handful of AMQP 0-9-1
//! methods the bus needs. Two backends implement them:
//!
//! - [`amqp`]: a RabbitMQ client built on `lapin`, used by the binaries.
//! - [`engine`]: an in-process broker with the same exchange/queue/binding
//!   semantics (topic matching, prefetch, requeue, dead-lettering), used by
//!   tests and offline runs.

pub mod amqp;
pub mod engine;
pub mod message;
pub mod topic;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::topology::QueueAttributes;
use crate::utils::error::BrokerError;

pub use amqp::{AmqpChannel, AmqpConnection};
pub use engine::{MemoryBroker, MemoryChannel, MemoryConnection};
pub use message::{Delivery, Envelope};
pub use topic::{ExchangeKind, topic_matches};

/// Deliveries for one consumer, in broker order. Ends when the channel closes.
pub type Deliveries = BoxStream<'static, Result<Delivery, BrokerError>>;

/// What the broker reports back after a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// A live broker connection, shared process-wide.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;
}

/// One broker channel.
///
/// Each subscription owns its channel exclusively; publishers open their own.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn queue_declare(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<DeclaredQueue, BrokerError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError>;

    /// Caps unacknowledged deliveries outstanding on this channel. `0` lifts the cap.
    async fn basic_qos(&self, prefetch: u16) -> Result<(), BrokerError>;

    async fn basic_consume(&self, queue: &str, consumer_tag: &str)
    -> Result<Deliveries, BrokerError>;

    /// Transmits without waiting for a publisher confirmation.
    async fn basic_publish(&self, envelope: Envelope) -> Result<(), BrokerError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Closing an already closed channel is a no-op.
    async fn close(&self) -> Result<(), BrokerError>;
}
