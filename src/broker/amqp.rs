//! RabbitMQ backend over `lapin`.
//!
//! Queue attributes become `QueueDeclareOptions` plus an
//! `x-dead-letter-exchange` argument. Prefetch is applied channel-wide
//! (`global = true`). Publishing awaits the transmit only; the returned
//! `PublisherConfirm` is dropped since no confirmation protocol is enabled.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

use super::message::{Delivery, Envelope};
use super::topic::ExchangeKind;
use super::{BrokerChannel, BrokerConnection, DeclaredQueue, Deliveries};
use crate::topology::QueueAttributes;
use crate::utils::error::BrokerError;

pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

/// A connection to an AMQP 0-9-1 broker.
pub struct AmqpConnection {
    inner: Connection,
}

impl AmqpConnection {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let inner = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self { inner })
    }

    pub async fn open_channel(&self) -> Result<AmqpChannel, BrokerError> {
        let inner = self.inner.create_channel().await?;
        Ok(AmqpChannel { inner })
    }

    /// Closes the connection; every consumer stream on it ends.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.inner.status().connected() {
            self.inner.close(200, "closing").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        Ok(Arc::new(self.open_channel().await?))
    }
}

/// A `lapin` channel.
pub struct AmqpChannel {
    inner: Channel,
}

fn queue_arguments(attributes: &QueueAttributes) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(exchange) = &attributes.dead_letter_exchange {
        arguments.insert(
            ShortString::from(DEAD_LETTER_EXCHANGE_ARG),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }
    arguments
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_owned(),
            routing_key: delivery.routing_key.as_str().to_owned(),
            redelivered: delivery.redelivered,
            content_type: delivery
                .properties
                .content_type()
                .as_ref()
                .map(|t| t.as_str().to_owned()),
            payload: delivery.data,
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable,
            ..ExchangeDeclareOptions::default()
        };
        self.inner
            .exchange_declare(name, kind.into(), options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn queue_declare(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<DeclaredQueue, BrokerError> {
        let options = QueueDeclareOptions {
            durable: attributes.durable,
            auto_delete: attributes.auto_delete,
            exclusive: attributes.exclusive,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .inner
            .queue_declare(name, options, queue_arguments(attributes))
            .await?;
        Ok(DeclaredQueue {
            name: queue.name().as_str().to_owned(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn basic_qos(&self, prefetch: u16) -> Result<(), BrokerError> {
        self.inner
            .basic_qos(prefetch, BasicQosOptions { global: true })
            .await?;
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Deliveries, BrokerError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer
            .map(|item| item.map(Delivery::from).map_err(BrokerError::from))
            .boxed())
    }

    async fn basic_publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let properties =
            BasicProperties::default().with_content_type(ShortString::from(envelope.content_type));
        let _confirm = self
            .inner
            .basic_publish(
                &envelope.exchange,
                &envelope.routing_key,
                BasicPublishOptions::default(),
                &envelope.payload,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.inner.status().connected() {
            self.inner.close(200, "closing").await?;
        } else {
            debug!(channel = self.inner.id(), "channel already closed");
        }
        Ok(())
    }
}
