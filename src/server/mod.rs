//! Game-server wiring on top of the bus.
//!
//! The server declares the exchanges, consumes the durable game-log queue
//! into a [`GameLogStore`], and broadcasts pause/resume signals. The
//! interactive loop itself lives in the binary; everything it calls is here.

use tracing::{debug, info, warn};

use crate::broker::BrokerConnection;
use crate::codec::{BincodeCodec, JsonCodec};
use crate::config::Settings;
use crate::persistence::{GameLogStore, LogSink};
use crate::pubsub::{Disposition, Publisher, SubscriptionHandle, SubscriptionOptions, subscribe};
use crate::routing::{self, GameLog, PlayingState};
use crate::topology::{QueuePolicy, Topology};
use crate::utils::error::{PublishError, StartupError};

/// A line typed at the server console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Pause,
    Resume,
    Help,
    Quit,
    Unknown(String),
}

impl ServerCommand {
    /// Parses the first word of `line`. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.split_whitespace().next()?;
        Some(match word {
            "pause" => ServerCommand::Pause,
            "resume" => ServerCommand::Resume,
            "help" => ServerCommand::Help,
            "quit" => ServerCommand::Quit,
            other => ServerCommand::Unknown(other.to_string()),
        })
    }
}

pub const SERVER_HELP: &str = "Possible commands:\n\
    * pause\n\
    * resume\n\
    * help\n\
    * quit";

/// Persists every game log; asks for redelivery when the store fails.
pub fn log_handler<S: LogSink>(store: S) -> impl Fn(GameLog) -> Disposition + Send + Sync + 'static {
    move |log: GameLog| match store.append(&log) {
        Ok(()) => {
            debug!(username = %log.username, message = %log.message, "game log stored");
            Disposition::Ack
        }
        Err(e) => {
            warn!(username = %log.username, error = %e, "could not store game log");
            Disposition::RequeueLater
        }
    }
}

/// A started server: its publisher and the game-log subscription.
#[derive(Debug)]
pub struct Server {
    settings: Settings,
    publisher: Publisher,
    logs: SubscriptionHandle,
}

impl Server {
    /// Declares the exchanges and the dead-letter queue, subscribes the
    /// durable game-log queue and opens the publish channel.
    pub async fn start(
        connection: &dyn BrokerConnection,
        settings: Settings,
        store: GameLogStore,
    ) -> Result<Self, StartupError> {
        let topology = Topology::new(settings.broker.dead_letter_exchange.clone());
        let publisher = Publisher::open(connection).await?;

        topology
            .declare_exchanges(
                publisher.channel().as_ref(),
                &settings.exchanges,
                &settings.broker.dead_letter_queue,
            )
            .await?;

        let slug = &settings.routing.game_log_slug;
        let options = SubscriptionOptions::new(
            settings.exchanges.topic.clone(),
            slug.clone(),
            routing::wildcard(slug),
            QueuePolicy::Durable,
        )
        .with_prefetch(settings.broker.prefetch);
        let logs = subscribe(connection, &topology, options, BincodeCodec, log_handler(store)).await?;

        info!(queue = logs.queue(), "server started");
        Ok(Self {
            settings,
            publisher,
            logs,
        })
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn logs(&self) -> &SubscriptionHandle {
        &self.logs
    }

    /// Broadcasts the pause state on the direct exchange.
    pub async fn publish_playing_state(&self, is_paused: bool) -> Result<(), PublishError> {
        self.publisher
            .publish(
                &self.settings.exchanges.direct,
                &self.settings.routing.pause_key,
                &PlayingState { is_paused },
                &JsonCodec,
            )
            .await
    }

    /// Runs one console command. Returns `false` once the server should stop.
    pub async fn execute(&self, command: &ServerCommand) -> Result<bool, PublishError> {
        match command {
            ServerCommand::Pause => {
                info!("publishing pause message");
                self.publish_playing_state(true).await?;
            }
            ServerCommand::Resume => {
                info!("publishing resume message");
                self.publish_playing_state(false).await?;
            }
            ServerCommand::Help => println!("{SERVER_HELP}"),
            ServerCommand::Quit => {
                info!("goodbye");
                return Ok(false);
            }
            ServerCommand::Unknown(word) => println!("I don't understand the command '{word}'"),
        }
        Ok(true)
    }
}
