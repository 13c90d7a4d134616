//! # Peril Bus
//!
//! `peril_bus` is the message-bus layer between the processes of a turn-based
//! multiplayer game and an AMQP-style broker. It serializes typed values into
//! payloads and back, provisions queues with a small set of durability
//! policies (always with dead-letter routing), and runs one consumption loop
//! per subscription that turns handler outcomes into ack, requeue or discard.
//!
//! ## Core Modules
//!
//! - `codec`: text (`serde_json`) and binary (`bincode`) codecs with content-type tags.
//! - `broker`: the broker seam, a `lapin` backend and an in-process engine.
//! - `topology`: queue policies and the declare-and-bind provisioner.
//! - `pubsub`: publishing, subscriptions and the `Disposition` handlers return.
//! - `routing`: payload types and routing-key helpers shared by the game processes.
//! - `persistence`: `sled` storage for game logs received by the server.
//! - `server`: game-server wiring used by the `peril` binary.
//! - `client`: game-client wiring; game rules plug in through `GameRules`.
//! - `config`: loading settings from files and the environment.
//! - `utils`: error types and logging.

pub mod broker;
pub mod client;
pub mod codec;
pub mod config;
pub mod persistence;
pub mod pubsub;
pub mod routing;
pub mod server;
pub mod topology;
pub mod utils;

pub use pubsub::{Disposition, Publisher, SubscriptionHandle, SubscriptionOptions, publish, subscribe};
pub use topology::{QueuePolicy, Topology};
