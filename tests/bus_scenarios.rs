use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use peril_bus::broker::{BrokerChannel, Envelope, MemoryBroker, MemoryConnection};
use peril_bus::codec::{BincodeCodec, Codec, JsonCodec};
use peril_bus::config::Settings;
use peril_bus::client::{Client, GameRules, MoveOutcome, WarOutcome};
use peril_bus::persistence::GameLogStore;
use peril_bus::routing::{self, ArmyMove, GameLog, Player, PlayingState, RecognitionOfWar, Unit, UnitRank};
use peril_bus::server::{Server, ServerCommand};
use peril_bus::{Disposition, QueuePolicy, SubscriptionOptions, Topology, publish, subscribe};

const DLQ: &str = "peril_dlq";

async fn setup() -> (MemoryBroker, MemoryConnection, Topology, Settings) {
    let broker = MemoryBroker::new();
    let connection = broker.connect();
    let settings = Settings::default();
    let topology = Topology::new(settings.broker.dead_letter_exchange.clone());
    let channel = connection.open_channel().unwrap();
    topology
        .declare_exchanges(&channel, &settings.exchanges, &settings.broker.dead_letter_queue)
        .await
        .unwrap();
    (broker, connection, topology, settings)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[test]
fn game_records_survive_both_codecs() {
    let log = GameLog {
        current_time: Utc.timestamp_opt(1_725_000_000, 123_456_789).unwrap(),
        message: "napoleon spawned a cavalry in europe".to_string(),
        username: "napoleon".to_string(),
    };
    let state = PlayingState { is_paused: true };

    for payload in [JsonCodec.encode(&log).unwrap(), BincodeCodec.encode(&log).unwrap()] {
        let decoded: GameLog = match payload.content_type {
            "application/json" => JsonCodec.decode(&payload.bytes).unwrap(),
            _ => BincodeCodec.decode(&payload.bytes).unwrap(),
        };
        assert_eq!(decoded, log);
    }
    assert_eq!(
        JsonCodec
            .decode::<PlayingState>(&JsonCodec.encode(&state).unwrap().bytes)
            .unwrap(),
        state
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_broadcast_is_received_once_and_acked() {
    let (broker, connection, topology, settings) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = routing::qualified(&settings.routing.pause_key, "washington");

    subscribe(
        &connection,
        &topology,
        SubscriptionOptions::new(
            settings.exchanges.direct.clone(),
            queue.clone(),
            settings.routing.pause_key.clone(),
            QueuePolicy::Transient,
        ),
        JsonCodec,
        move |state: PlayingState| {
            tx.send(state).unwrap();
            Disposition::Ack
        },
    )
    .await
    .unwrap();

    let channel = connection.open_channel().unwrap();
    publish(
        &channel,
        &settings.exchanges.direct,
        &settings.routing.pause_key,
        &PlayingState { is_paused: true },
        &JsonCodec,
    )
    .await
    .unwrap();

    let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, PlayingState { is_paused: true });

    wait_until(|| broker.unacked_count(&queue) == 0).await;
    assert_eq!(broker.ready_count(&queue), 0);
    assert!(
        timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
        "acked pause message was delivered again"
    );
    assert!(broker.ready_payloads(DLQ).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn war_recognition_is_requeued_until_the_defender_handles_it() {
    let (broker, connection, topology, settings) = setup().await;
    let prefix = settings.routing.war_recognitions_prefix.clone();
    let passed_over = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(Mutex::new(Vec::new()));

    for player in ["napoleon", "washington"] {
        let passed_over = Arc::clone(&passed_over);
        let handled = Arc::clone(&handled);
        subscribe(
            &connection,
            &topology,
            SubscriptionOptions::new(
                settings.exchanges.topic.clone(),
                prefix.clone(),
                routing::wildcard(&prefix),
                QueuePolicy::Durable,
            ),
            JsonCodec,
            move |war: RecognitionOfWar| {
                if war.defender.username != player {
                    passed_over.fetch_add(1, Ordering::SeqCst);
                    return Disposition::RequeueLater;
                }
                handled.lock().unwrap().push((player, war));
                Disposition::Ack
            },
        )
        .await
        .unwrap();
    }
    assert_eq!(broker.consumer_count(&prefix), 2);
    assert_eq!(
        broker.queue_attributes(&prefix).map(|attrs| attrs.durable),
        Some(true)
    );

    let war = RecognitionOfWar {
        attacker: Player::new("napoleon"),
        defender: Player::new("washington"),
    };
    let channel = connection.open_channel().unwrap();
    publish(
        &channel,
        &settings.exchanges.topic,
        &routing::qualified(&prefix, &war.attacker.username),
        &war,
        &JsonCodec,
    )
    .await
    .unwrap();

    wait_until(|| !handled.lock().unwrap().is_empty()).await;
    wait_until(|| broker.unacked_count(&prefix) == 0).await;
    assert_eq!(*handled.lock().unwrap(), vec![("washington", war)]);
    assert_eq!(broker.ready_count(&prefix), 0);
    assert!(broker.ready_payloads(DLQ).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poison_message_is_dead_lettered_and_never_redelivered() {
    let (broker, connection, topology, settings) = setup().await;
    let prefix = settings.routing.war_recognitions_prefix.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    subscribe(
        &connection,
        &topology,
        SubscriptionOptions::new(
            settings.exchanges.topic.clone(),
            prefix.clone(),
            routing::wildcard(&prefix),
            QueuePolicy::Durable,
        ),
        JsonCodec,
        move |_: RecognitionOfWar| {
            counter.fetch_add(1, Ordering::SeqCst);
            Disposition::Ack
        },
    )
    .await
    .unwrap();

    let channel = connection.open_channel().unwrap();
    let garbage = b"{\"attacker\": napoleon".to_vec();
    channel
        .basic_publish(Envelope {
            exchange: settings.exchanges.topic.clone(),
            routing_key: routing::qualified(&prefix, "napoleon"),
            content_type: "application/json".to_string(),
            payload: garbage.clone(),
        })
        .await
        .unwrap();

    wait_until(|| broker.ready_count(DLQ) == 1).await;
    assert_eq!(broker.ready_payloads(DLQ), vec![garbage]);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(broker.ready_count(&prefix), 0);
    assert_eq!(broker.unacked_count(&prefix), 0);
    assert_eq!(broker.ready_count(DLQ), 1);
}

/// One player holding one territory. Moves onto it start a war the holder wins.
struct Territory {
    username: String,
    home: String,
    paused: Mutex<Option<bool>>,
}

impl Territory {
    fn new(username: &str, home: &str) -> Arc<Self> {
        Arc::new(Self {
            username: username.to_string(),
            home: home.to_string(),
            paused: Mutex::new(None),
        })
    }
}

impl GameRules for Territory {
    fn handle_pause(&self, state: PlayingState) {
        *self.paused.lock().unwrap() = Some(state.is_paused);
    }

    fn handle_move(&self, army_move: &ArmyMove) -> MoveOutcome {
        if army_move.player.username == self.username {
            MoveOutcome::SamePlayer
        } else if army_move.to_location == self.home {
            MoveOutcome::MakeWar
        } else {
            MoveOutcome::Safe
        }
    }

    fn handle_war(&self, war: &RecognitionOfWar) -> WarOutcome {
        if war.defender.username != self.username {
            return WarOutcome::NotInvolved;
        }
        WarOutcome::YouWon {
            winner: self.username.clone(),
            loser: war.attacker.username.clone(),
        }
    }

    fn snapshot(&self) -> Player {
        Player {
            username: self.username.clone(),
            units: vec![Unit {
                id: 1,
                rank: UnitRank::Artillery,
                location: self.home.clone(),
            }],
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_full_round_between_two_clients_and_the_server() {
    let broker = MemoryBroker::new();
    let settings = Settings::default();
    let dir = tempfile::tempdir().unwrap();
    let store = GameLogStore::open(dir.path().to_str().unwrap()).unwrap();
    let server_connection = broker.connect();
    let server = Server::start(&server_connection, settings.clone(), store.clone())
        .await
        .unwrap();

    let washington = Territory::new("washington", "americas");
    let napoleon = Territory::new("napoleon", "europe");
    let washington_connection = broker.connect();
    let napoleon_connection = broker.connect();
    let washington_client = Client::start(
        &washington_connection,
        settings.clone(),
        "washington",
        Arc::clone(&washington),
    )
    .await
    .unwrap();
    let napoleon_client = Client::start(
        &napoleon_connection,
        settings.clone(),
        "napoleon",
        Arc::clone(&napoleon),
    )
    .await
    .unwrap();

    // every client owns its move and pause queues; the war queue is shared
    for name in ["washington", "napoleon"] {
        assert!(broker.queue_exists(&format!("army_moves.{name}")));
        assert!(broker.queue_exists(&format!("pause.{name}")));
    }
    assert_eq!(broker.consumer_count("war"), 2);

    assert!(server.execute(&ServerCommand::Pause).await.unwrap());
    wait_until(|| *washington.paused.lock().unwrap() == Some(true)).await;
    wait_until(|| *napoleon.paused.lock().unwrap() == Some(true)).await;

    napoleon_client
        .publish_move(&ArmyMove {
            player: napoleon.snapshot(),
            units: napoleon.snapshot().units,
            to_location: "americas".to_string(),
        })
        .await
        .unwrap();

    // washington recognizes the war, wins it, and the server stores the log
    wait_until(|| store.len() == 1).await;
    let logs = store.load_for("washington").unwrap();
    assert_eq!(logs[0].message, "washington won a war against napoleon");
    assert_eq!(washington_client.username(), "washington");

    // napoleon's own move came back to it and was rejected
    wait_until(|| broker.ready_count(DLQ) == 1).await;
    let rejected: ArmyMove = JsonCodec.decode(&broker.ready_payloads(DLQ)[0]).unwrap();
    assert_eq!(rejected.player.username, "napoleon");

    wait_until(|| broker.unacked_count("war") == 0).await;
    assert_eq!(broker.ready_count("war"), 0);
    assert_eq!(broker.ready_count("game_logs"), 0);
}
