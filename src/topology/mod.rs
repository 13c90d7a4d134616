//! Queue policies and the provisioner that declares and binds queues.
//!
//! Every queue provisioned with a [`QueuePolicy`] is declared with a
//! dead-letter exchange. The exchange name is fixed per [`Topology`] and comes
//! from configuration. The only queue without one is the dead-letter queue
//! itself, so that rejecting a dead letter cannot route it back in a cycle.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::{BrokerChannel, BrokerConnection, DeclaredQueue, ExchangeKind};
use crate::config::ExchangeSettings;
use crate::utils::error::TopologyError;

pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// Durability policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Per-consumer queue: non-durable, auto-deleted, exclusive to its connection.
    Transient,
    /// Shared queue that survives broker restarts and consumer churn.
    Durable,
}

/// Broker-level attributes a queue is declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    /// `None` only for the dead-letter queue.
    pub dead_letter_exchange: Option<String>,
}

impl QueuePolicy {
    pub fn attributes(self, dead_letter_exchange: &str) -> QueueAttributes {
        let transient = self == QueuePolicy::Transient;
        QueueAttributes {
            durable: !transient,
            auto_delete: transient,
            exclusive: transient,
            dead_letter_exchange: Some(dead_letter_exchange.to_string()),
        }
    }
}

impl QueueAttributes {
    /// Durable, shared and without a dead-letter exchange of its own.
    pub fn dead_letter_sink() -> Self {
        Self {
            durable: true,
            auto_delete: false,
            exclusive: false,
            dead_letter_exchange: None,
        }
    }
}

/// Declares queues and bindings, always wiring the dead-letter exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    dead_letter_exchange: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_EXCHANGE)
    }
}

impl Topology {
    pub fn new(dead_letter_exchange: impl Into<String>) -> Self {
        Self {
            dead_letter_exchange: dead_letter_exchange.into(),
        }
    }

    pub fn dead_letter_exchange(&self) -> &str {
        &self.dead_letter_exchange
    }

    pub fn attributes(&self, policy: QueuePolicy) -> QueueAttributes {
        policy.attributes(&self.dead_letter_exchange)
    }

    /// Opens a channel, then declares `queue` with `policy` and binds it to
    /// `exchange` under `binding_key`.
    ///
    /// Idempotent for identical arguments. On failure the new channel is
    /// closed before the error is returned.
    pub async fn declare_and_bind(
        &self,
        connection: &dyn BrokerConnection,
        exchange: &str,
        queue: &str,
        binding_key: &str,
        policy: QueuePolicy,
    ) -> Result<(Arc<dyn BrokerChannel>, DeclaredQueue), TopologyError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(TopologyError::Channel)?;

        match self
            .declare_and_bind_on(channel.as_ref(), exchange, queue, binding_key, policy)
            .await
        {
            Ok(declared) => Ok((channel, declared)),
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    warn!(queue, error = %close_err, "could not close channel after topology failure");
                }
                Err(e)
            }
        }
    }

    /// Same as [`Topology::declare_and_bind`] on a channel the caller already owns.
    pub async fn declare_and_bind_on(
        &self,
        channel: &dyn BrokerChannel,
        exchange: &str,
        queue: &str,
        binding_key: &str,
        policy: QueuePolicy,
    ) -> Result<DeclaredQueue, TopologyError> {
        let attributes = self.attributes(policy);
        let declared = channel
            .queue_declare(queue, &attributes)
            .await
            .map_err(|source| TopologyError::DeclareQueue {
                queue: queue.to_string(),
                source,
            })?;

        channel
            .queue_bind(&declared.name, exchange, binding_key)
            .await
            .map_err(|source| TopologyError::Bind {
                queue: declared.name.clone(),
                exchange: exchange.to_string(),
                key: binding_key.to_string(),
                source,
            })?;

        debug!(
            queue = %declared.name,
            exchange,
            binding_key,
            ?policy,
            dead_letter_exchange = %self.dead_letter_exchange,
            "queue declared and bound"
        );
        Ok(declared)
    }

    /// Declares the game's exchanges and the durable queue collecting
    /// dead-lettered messages.
    ///
    /// Only called at startup; publishing assumes exchanges already exist.
    pub async fn declare_exchanges(
        &self,
        channel: &dyn BrokerChannel,
        exchanges: &ExchangeSettings,
        dead_letter_queue: &str,
    ) -> Result<(), TopologyError> {
        let declarations = [
            (exchanges.topic.as_str(), ExchangeKind::Topic),
            (exchanges.direct.as_str(), ExchangeKind::Direct),
            (self.dead_letter_exchange.as_str(), ExchangeKind::Fanout),
        ];
        for (name, kind) in declarations {
            channel
                .exchange_declare(name, kind, true)
                .await
                .map_err(|source| TopologyError::DeclareExchange {
                    exchange: name.to_string(),
                    source,
                })?;
        }

        channel
            .queue_declare(dead_letter_queue, &QueueAttributes::dead_letter_sink())
            .await
            .map_err(|source| TopologyError::DeclareQueue {
                queue: dead_letter_queue.to_string(),
                source,
            })?;
        channel
            .queue_bind(dead_letter_queue, &self.dead_letter_exchange, "#")
            .await
            .map_err(|source| TopologyError::Bind {
                queue: dead_letter_queue.to_string(),
                exchange: self.dead_letter_exchange.clone(),
                key: "#".to_string(),
                source,
            })?;

        info!(
            topic = %exchanges.topic,
            direct = %exchanges.direct,
            dead_letter_exchange = %self.dead_letter_exchange,
            dead_letter_queue,
            "exchanges declared"
        );
        Ok(())
    }
}
