use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::Disposition;
use crate::broker::{BrokerChannel, BrokerConnection, Deliveries, Delivery};
use crate::codec::Codec;
use crate::topology::{QueuePolicy, Topology};
use crate::utils::error::SubscribeError;

/// Unacknowledged deliveries a subscription may hold when nothing else is configured.
pub const DEFAULT_PREFETCH: u16 = 10;

/// Where a subscription reads from and how its queue is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub exchange: String,
    pub queue: String,
    pub binding_key: String,
    pub policy: QueuePolicy,
    pub prefetch: u16,
}

impl SubscriptionOptions {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        binding_key: impl Into<String>,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            binding_key: binding_key.into(),
            policy,
            prefetch: DEFAULT_PREFETCH,
        }
    }

    /// Must be at least 1; [`subscribe`] rejects 0.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }
}

/// A running subscription.
///
/// Dropping the handle detaches the consumption task; it keeps running until
/// its channel or connection closes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    queue: String,
    consumer_tag: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the consumption task to end, which happens when the delivery stream closes.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

/// Provisions the queue described by `options`, applies its prefetch limit and
/// spawns the task that feeds deliveries through `codec` into `handler`.
///
/// The handler runs on the blocking thread pool, one delivery at a time per
/// subscription. Whatever it returns is applied to the delivery:
/// `Ack` acks, `RequeueLater` nacks with requeue, `DiscardPermanently` nacks
/// without requeue so the broker dead-letters the message. Payloads that do
/// not decode, and handlers that panic, are discarded the same way.
///
/// A prefetch of 0 is rejected: brokers read it as "no limit".
///
/// Every failure here happens before the task starts; the caller should
/// treat it as fatal for this subscription.
pub async fn subscribe<T, C, F>(
    connection: &dyn BrokerConnection,
    topology: &Topology,
    options: SubscriptionOptions,
    codec: C,
    handler: F,
) -> Result<SubscriptionHandle, SubscribeError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    F: Fn(T) -> Disposition + Send + Sync + 'static,
{
    // 0 would lift the broker's limit altogether
    if options.prefetch == 0 {
        return Err(SubscribeError::ZeroPrefetch {
            queue: options.queue,
        });
    }

    let (channel, declared) = topology
        .declare_and_bind(
            connection,
            &options.exchange,
            &options.queue,
            &options.binding_key,
            options.policy,
        )
        .await?;
    let queue = declared.name;

    if let Err(source) = channel.basic_qos(options.prefetch).await {
        close_quietly(channel.as_ref(), &queue).await;
        return Err(SubscribeError::Qos { queue, source });
    }

    let consumer_tag = format!("{queue}-{}", Uuid::new_v4());
    let deliveries = match channel.basic_consume(&queue, &consumer_tag).await {
        Ok(deliveries) => deliveries,
        Err(source) => {
            close_quietly(channel.as_ref(), &queue).await;
            return Err(SubscribeError::Consume { queue, source });
        }
    };

    info!(
        queue = %queue,
        exchange = %options.exchange,
        binding_key = %options.binding_key,
        policy = ?options.policy,
        prefetch = options.prefetch,
        content_type = codec.content_type(),
        "subscription started"
    );

    let runner = Runner {
        channel,
        codec,
        handler: Arc::new(handler),
        queue: queue.clone(),
        _payload: PhantomData,
    };
    let task = tokio::spawn(runner.run(deliveries));

    Ok(SubscriptionHandle {
        queue,
        consumer_tag,
        task,
    })
}

async fn close_quietly(channel: &dyn BrokerChannel, queue: &str) {
    if let Err(e) = channel.close().await {
        warn!(queue, error = %e, "could not close channel");
    }
}

/// Consumption loop of one subscription. Owns the subscription's channel.
struct Runner<T, C, F> {
    channel: Arc<dyn BrokerChannel>,
    codec: C,
    handler: Arc<F>,
    queue: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T, C, F> Runner<T, C, F>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    F: Fn(T) -> Disposition + Send + Sync + 'static,
{
    async fn run(self, mut deliveries: Deliveries) {
        while let Some(next) = deliveries.next().await {
            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "delivery stream failed");
                    break;
                }
            };

            let tag = delivery.delivery_tag;
            let disposition = self.handle(delivery).await;
            self.settle(tag, disposition).await;
        }

        debug!(queue = %self.queue, "delivery stream closed, subscription finished");
        close_quietly(self.channel.as_ref(), &self.queue).await;
    }

    async fn handle(&self, delivery: Delivery) -> Disposition {
        let value: T = match self.codec.decode(&delivery.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    content_type = delivery.content_type.as_deref().unwrap_or("-"),
                    error = %e,
                    "undecodable payload, discarding"
                );
                return Disposition::DiscardPermanently;
            }
        };

        debug!(
            queue = %self.queue,
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            "running handler"
        );

        let handler = Arc::clone(&self.handler);
        match tokio::task::spawn_blocking(move || handler(value)).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "handler failed, discarding"
                );
                Disposition::DiscardPermanently
            }
        }
    }

    async fn settle(&self, tag: u64, disposition: Disposition) {
        let result = match disposition {
            Disposition::Ack => self.channel.basic_ack(tag).await,
            Disposition::RequeueLater => self.channel.basic_nack(tag, true).await,
            Disposition::DiscardPermanently => self.channel.basic_nack(tag, false).await,
        };

        match result {
            Ok(()) => debug!(queue = %self.queue, delivery_tag = tag, ?disposition, "delivery settled"),
            // the broker redelivers after channel loss
            Err(e) => error!(
                queue = %self.queue,
                delivery_tag = tag,
                ?disposition,
                error = %e,
                "could not settle delivery"
            ),
        }
    }
}
