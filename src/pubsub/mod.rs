//! Typed publish/subscribe on top of the broker seam.
//!
//! Publishing encodes a value with a [`Codec`](crate::codec::Codec) and hands
//! it to the broker without waiting for confirmation. Subscribing provisions
//! a queue, caps unacknowledged deliveries with a prefetch limit and spawns
//! one consumption task per subscription. That task decodes each delivery,
//! runs the caller's synchronous handler, and applies the [`Disposition`] the
//! handler returns.

pub mod publisher;
pub mod subscriber;

pub use publisher::{Publisher, publish};
pub use subscriber::{DEFAULT_PREFETCH, SubscriptionHandle, SubscriptionOptions, subscribe};

/// What a handler decided about one delivery.
///
/// Exactly one disposition is applied to every delivery, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; the broker forgets the message.
    Ack,
    /// Not for us, or not yet; the broker redelivers it, marked redelivered.
    RequeueLater,
    /// Never processable; the broker routes it to the dead-letter exchange.
    DiscardPermanently,
}
