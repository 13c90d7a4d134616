//! CLI for Peril
//!
//! Subcommands:
//! - `server`: run the game server console (pause/resume broadcasts, game-log storage)
//! - `client`: run a game client console for one player
//! - `spam`: flood the game-log queue with generated records

use clap::Parser;
use std::sync::Arc;

use peril_bus::broker::AmqpConnection;
use peril_bus::client::{self, CLIENT_HELP, Client, ClientCommand, Spectator};
use peril_bus::config::{Settings, load_config};
use peril_bus::persistence::GameLogStore;
use peril_bus::pubsub::Publisher;
use peril_bus::server::{SERVER_HELP, Server, ServerCommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "peril")]
enum Command {
    /// Start the game server console
    Server,
    /// Start a game client console
    Client {
        /// Player name; also names the client's own queues
        #[arg(long)]
        username: String,
    },
    /// Publish generated game logs as the given player
    Spam {
        /// Player name used in the routing key and the records
        #[arg(long)]
        username: String,
        /// Number of records to publish
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("could not load configuration: {e}");
            std::process::exit(1);
        }
    };
    peril_bus::utils::logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Server => run_server(settings).await,
        Command::Client { username } => run_client(settings, username).await,
        Command::Spam { username, count } => run_spam(settings, &username, count).await,
    };

    if let Err(e) = result {
        error!("peril failed: {e}");
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let connection = AmqpConnection::connect(&settings.broker.url).await?;
    info!("Peril game server connected to the broker");

    let store = GameLogStore::open(&settings.storage.path)?;
    let server = Server::start(&connection, settings, store).await?;
    println!("{SERVER_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = ServerCommand::parse(&line) else { continue };
                match server.execute(&command).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    connection.close().await?;
    Ok(())
}

async fn run_client(settings: Settings, username: String) -> Result<(), Box<dyn std::error::Error>> {
    let connection = AmqpConnection::connect(&settings.broker.url).await?;
    info!(username = %username, "Peril game client connected to the broker");

    let rules = Arc::new(Spectator::new(username.as_str()));
    let client = Client::start(&connection, settings, username, rules).await?;
    println!("{CLIENT_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = ClientCommand::parse(&line) else { continue };
                match client.execute(&command).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    connection.close().await?;
    Ok(())
}

async fn run_spam(
    settings: Settings,
    username: &str,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let connection = AmqpConnection::connect(&settings.broker.url).await?;
    let publisher = Publisher::open(&connection).await?;

    let published = client::spam(&publisher, &settings, username, count).await?;
    println!("Published {published} logs");

    publisher.close().await?;
    connection.close().await?;
    Ok(())
}
