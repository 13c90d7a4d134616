//! Game-client wiring on top of the bus.
//!
//! A client holds three subscriptions: its own transient queue of army
//! moves, its own transient queue of pause broadcasts, and the durable `war`
//! queue shared by every client. The game rules are supplied by the caller
//! through [`GameRules`]; this module turns their outcomes into dispositions
//! and the follow-up messages the outcomes call for.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::broker::BrokerConnection;
use crate::codec::{BincodeCodec, JsonCodec};
use crate::config::Settings;
use crate::pubsub::{Disposition, Publisher, SubscriptionHandle, SubscriptionOptions, subscribe};
use crate::routing::{self, ArmyMove, GameLog, Player, PlayingState, RecognitionOfWar};
use crate::topology::{QueuePolicy, Topology};
use crate::utils::error::{PublishError, StartupError};

/// What an incoming army move means for the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Nothing to do.
    Safe,
    /// The move lands on our units: recognize a war.
    MakeWar,
    /// Our own move, echoed back.
    SamePlayer,
}

/// How a recognized war ended for the local player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarOutcome {
    /// Someone else is the defender.
    NotInvolved,
    /// We are the defender but have nothing to fight with.
    NoUnits,
    OpponentWon { winner: String, loser: String },
    YouWon { winner: String, loser: String },
    Draw { attacker: String, defender: String },
}

impl WarOutcome {
    /// The game-log line for a war that was fought.
    pub fn log_message(&self) -> Option<String> {
        match self {
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
            WarOutcome::OpponentWon { winner, loser } | WarOutcome::YouWon { winner, loser } => {
                Some(format!("{winner} won a war against {loser}"))
            }
            WarOutcome::Draw { attacker, defender } => Some(format!(
                "A war between {attacker} and {defender} resulted in a draw"
            )),
        }
    }
}

/// The game state of one player, as seen by the bus.
///
/// Called from the blocking pool, one delivery at a time per subscription,
/// but concurrently across subscriptions.
pub trait GameRules: Send + Sync + 'static {
    fn handle_pause(&self, state: PlayingState);

    fn handle_move(&self, army_move: &ArmyMove) -> MoveOutcome;

    fn handle_war(&self, war: &RecognitionOfWar) -> WarOutcome;

    /// The local player as it stands now. Sent as the defender of a war.
    fn snapshot(&self) -> Player;
}

/// Rules for a player without units: follows the game and never fights.
#[derive(Debug)]
pub struct Spectator {
    username: String,
    paused: AtomicBool,
}

impl Spectator {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            paused: AtomicBool::new(false),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl GameRules for Spectator {
    fn handle_pause(&self, state: PlayingState) {
        self.paused.store(state.is_paused, Ordering::SeqCst);
        info!(username = %self.username, paused = state.is_paused, "playing state changed");
    }

    fn handle_move(&self, army_move: &ArmyMove) -> MoveOutcome {
        if army_move.player.username == self.username {
            MoveOutcome::SamePlayer
        } else {
            MoveOutcome::Safe
        }
    }

    fn handle_war(&self, war: &RecognitionOfWar) -> WarOutcome {
        if war.defender.username == self.username {
            WarOutcome::NoUnits
        } else {
            WarOutcome::NotInvolved
        }
    }

    fn snapshot(&self) -> Player {
        Player::new(&self.username)
    }
}

/// Where handlers send the messages an outcome calls for.
#[derive(Debug, Clone)]
struct Outbox {
    publisher: Publisher,
    exchange: String,
    war_prefix: String,
    game_log_slug: String,
    username: String,
}

impl Outbox {
    fn new(publisher: Publisher, settings: &Settings, username: &str) -> Self {
        Self {
            publisher,
            exchange: settings.exchanges.topic.clone(),
            war_prefix: settings.routing.war_recognitions_prefix.clone(),
            game_log_slug: settings.routing.game_log_slug.clone(),
            username: username.to_string(),
        }
    }

    fn recognize_war(&self, attacker: Player, defender: Player) -> Result<(), PublishError> {
        let key = routing::qualified(&self.war_prefix, &self.username);
        let war = RecognitionOfWar { attacker, defender };
        self.publisher
            .publish_blocking(&self.exchange, &key, &war, &JsonCodec)
    }

    fn log_war(&self, attacker: &str, message: String) -> Result<(), PublishError> {
        let key = routing::qualified(&self.game_log_slug, attacker);
        let log = GameLog::now(self.username.as_str(), message);
        self.publisher
            .publish_blocking(&self.exchange, &key, &log, &BincodeCodec)
    }
}

/// Hands pause broadcasts to the rules.
pub fn pause_handler<R: GameRules>(
    rules: Arc<R>,
) -> impl Fn(PlayingState) -> Disposition + Send + Sync + 'static {
    move |state: PlayingState| {
        rules.handle_pause(state);
        Disposition::Ack
    }
}

fn move_handler<R: GameRules>(
    rules: Arc<R>,
    outbox: Outbox,
) -> impl Fn(ArmyMove) -> Disposition + Send + Sync + 'static {
    move |army_move: ArmyMove| match rules.handle_move(&army_move) {
        MoveOutcome::Safe => Disposition::Ack,
        MoveOutcome::MakeWar => {
            let attacker = army_move.player.username.clone();
            match outbox.recognize_war(army_move.player, rules.snapshot()) {
                Ok(()) => Disposition::Ack,
                Err(e) => {
                    warn!(attacker = %attacker, error = %e, "could not publish war recognition");
                    Disposition::RequeueLater
                }
            }
        }
        MoveOutcome::SamePlayer => Disposition::DiscardPermanently,
    }
}

fn war_handler<R: GameRules>(
    rules: Arc<R>,
    outbox: Outbox,
) -> impl Fn(RecognitionOfWar) -> Disposition + Send + Sync + 'static {
    move |war: RecognitionOfWar| {
        let outcome = rules.handle_war(&war);
        match outcome {
            WarOutcome::NotInvolved => return Disposition::RequeueLater,
            WarOutcome::NoUnits => return Disposition::DiscardPermanently,
            _ => {}
        }
        let Some(message) = outcome.log_message() else {
            return Disposition::DiscardPermanently;
        };

        match outbox.log_war(&war.attacker.username, message) {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                warn!(attacker = %war.attacker.username, error = %e, "could not publish war log");
                Disposition::RequeueLater
            }
        }
    }
}

/// A line typed at the client console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Move { to_location: String },
    Status,
    Spam(usize),
    Help,
    Quit,
    /// A known command used the wrong way; carries the usage line.
    Invalid(String),
    Unknown(String),
}

impl ClientCommand {
    /// Parses a console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = words.next()?;
        Some(match command {
            "move" => match words.next() {
                Some(location) => ClientCommand::Move {
                    to_location: location.to_string(),
                },
                None => ClientCommand::Invalid("usage: move <location>".to_string()),
            },
            "spam" => match words.next().map(str::parse::<usize>) {
                Some(Ok(count)) => ClientCommand::Spam(count),
                Some(Err(_)) => ClientCommand::Invalid("spam needs a number".to_string()),
                None => ClientCommand::Invalid("usage: spam <n>".to_string()),
            },
            "status" => ClientCommand::Status,
            "help" => ClientCommand::Help,
            "quit" => ClientCommand::Quit,
            other => ClientCommand::Unknown(other.to_string()),
        })
    }
}

pub const CLIENT_HELP: &str = "Possible commands:\n\
    * move <location>\n\
    * status\n\
    * spam <n>\n\
    * help\n\
    * quit";

/// A started client: its publisher and its three subscriptions.
pub struct Client {
    username: String,
    settings: Settings,
    publisher: Publisher,
    rules: Arc<dyn GameRules>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl Client {
    /// Subscribes the move, pause and war queues for `username`.
    ///
    /// The exchanges must already exist; the server declares them.
    pub async fn start<R: GameRules>(
        connection: &dyn BrokerConnection,
        settings: Settings,
        username: impl Into<String>,
        rules: Arc<R>,
    ) -> Result<Self, StartupError> {
        let username = username.into();
        let topology = Topology::new(settings.broker.dead_letter_exchange.clone());
        let publisher = Publisher::open(connection).await?;
        let outbox = Outbox::new(publisher.clone(), &settings, &username);
        let keys = &settings.routing;
        let prefetch = settings.broker.prefetch;

        let moves = subscribe(
            connection,
            &topology,
            SubscriptionOptions::new(
                settings.exchanges.topic.clone(),
                routing::qualified(&keys.army_moves_prefix, &username),
                routing::wildcard(&keys.army_moves_prefix),
                QueuePolicy::Transient,
            )
            .with_prefetch(prefetch),
            JsonCodec,
            move_handler(Arc::clone(&rules), outbox.clone()),
        )
        .await?;

        let pause = subscribe(
            connection,
            &topology,
            SubscriptionOptions::new(
                settings.exchanges.direct.clone(),
                routing::qualified(&keys.pause_key, &username),
                keys.pause_key.clone(),
                QueuePolicy::Transient,
            )
            .with_prefetch(prefetch),
            JsonCodec,
            pause_handler(Arc::clone(&rules)),
        )
        .await?;

        let war = subscribe(
            connection,
            &topology,
            SubscriptionOptions::new(
                settings.exchanges.topic.clone(),
                keys.war_recognitions_prefix.clone(),
                routing::wildcard(&keys.war_recognitions_prefix),
                QueuePolicy::Durable,
            )
            .with_prefetch(prefetch),
            JsonCodec,
            war_handler(Arc::clone(&rules), outbox),
        )
        .await?;

        info!(username = %username, "client started");
        Ok(Self {
            username,
            settings,
            publisher,
            rules,
            subscriptions: vec![moves, pause, war],
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Move, pause and war subscriptions, in that order.
    pub fn subscriptions(&self) -> &[SubscriptionHandle] {
        &self.subscriptions
    }

    /// Broadcasts a move under the mover's army-moves key.
    pub async fn publish_move(&self, army_move: &ArmyMove) -> Result<(), PublishError> {
        let key = routing::qualified(
            &self.settings.routing.army_moves_prefix,
            &army_move.player.username,
        );
        self.publisher
            .publish(&self.settings.exchanges.topic, &key, army_move, &JsonCodec)
            .await
    }

    /// Runs one console command. Returns `false` once the client should stop.
    pub async fn execute(&self, command: &ClientCommand) -> Result<bool, PublishError> {
        match command {
            ClientCommand::Move { to_location } => {
                let player = self.rules.snapshot();
                let army_move = ArmyMove {
                    units: player.units.clone(),
                    player,
                    to_location: to_location.clone(),
                };
                self.publish_move(&army_move).await?;
                info!(to_location = %to_location, units = army_move.units.len(), "move published");
            }
            ClientCommand::Status => {
                let player = self.rules.snapshot();
                println!("{} holds {} units", player.username, player.units.len());
            }
            ClientCommand::Spam(count) => {
                let published = spam(&self.publisher, &self.settings, &self.username, *count).await?;
                println!("Published {published} logs");
            }
            ClientCommand::Help => println!("{CLIENT_HELP}"),
            ClientCommand::Quit => {
                info!("goodbye");
                return Ok(false);
            }
            ClientCommand::Invalid(usage) => println!("{usage}"),
            ClientCommand::Unknown(word) => println!("I don't understand the command '{word}'"),
        }
        Ok(true)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("username", &self.username)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

/// Publishes `count` game logs as `username`, for load-testing the log queue.
pub async fn spam(
    publisher: &Publisher,
    settings: &Settings,
    username: &str,
    count: usize,
) -> Result<usize, PublishError> {
    let key = routing::qualified(&settings.routing.game_log_slug, username);
    for i in 0..count {
        let log = GameLog::now(username, format!("flood message {i} from {username}"));
        publisher
            .publish(&settings.exchanges.topic, &key, &log, &BincodeCodec)
            .await?;
    }
    Ok(count)
}
