use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::debug;

use crate::broker::{BrokerChannel, BrokerConnection, Envelope};
use crate::codec::Codec;
use crate::utils::error::{BrokerError, PublishError};

/// Encodes `value` with `codec` and publishes it to `exchange` under `routing_key`.
///
/// Fire-and-forget: returns once the broker client accepted the message.
/// Nothing is retried here; the caller decides what a failure means.
pub async fn publish<T, C>(
    channel: &dyn BrokerChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
    codec: &C,
) -> Result<(), PublishError>
where
    T: Serialize,
    C: Codec,
{
    let payload = codec.encode(value)?;
    let size = payload.bytes.len();
    channel
        .basic_publish(Envelope::new(exchange, routing_key, payload))
        .await
        .map_err(|source| PublishError::Transmit {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            source,
        })?;

    debug!(
        exchange,
        routing_key,
        content_type = codec.content_type(),
        bytes = size,
        "message published"
    );
    Ok(())
}

/// A publishing handle that owns one channel.
///
/// Clones share the channel. Use [`Publisher::publish_blocking`] from
/// synchronous handlers, which run outside the async executor.
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn BrokerChannel>,
    runtime: Handle,
}

impl Publisher {
    /// Opens a dedicated channel on `connection`.
    ///
    /// Must be called from within a Tokio runtime; that runtime drives
    /// blocking publishes later on.
    pub async fn open(connection: &dyn BrokerConnection) -> Result<Self, BrokerError> {
        let channel = connection.create_channel().await?;
        Ok(Self::new(channel, Handle::current()))
    }

    pub fn new(channel: Arc<dyn BrokerChannel>, runtime: Handle) -> Self {
        Self { channel, runtime }
    }

    pub fn channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.channel
    }

    pub async fn publish<T, C>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &C,
    ) -> Result<(), PublishError>
    where
        T: Serialize,
        C: Codec,
    {
        publish(self.channel.as_ref(), exchange, routing_key, value, codec).await
    }

    /// Publishes from synchronous code.
    ///
    /// Panics if called from inside an async task, like any `Handle::block_on`.
    pub fn publish_blocking<T, C>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &C,
    ) -> Result<(), PublishError>
    where
        T: Serialize,
        C: Codec,
    {
        self.runtime
            .block_on(self.publish(exchange, routing_key, value, codec))
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close().await
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("channel", &"dyn BrokerChannel")
            .finish()
    }
}
