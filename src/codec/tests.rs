use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{BincodeCodec, Codec, JsonCodec};
use crate::routing::{GameLog, PlayingState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Unit {
    id: u32,
    rank: String,
    location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Move {
    player: String,
    units: Vec<Unit>,
    to_location: String,
}

fn sample_move() -> Move {
    Move {
        player: "washington".into(),
        units: vec![
            Unit {
                id: 1,
                rank: "infantry".into(),
                location: "americas".into(),
            },
            Unit {
                id: 2,
                rank: "artillery".into(),
                location: "americas".into(),
            },
        ],
        to_location: "europe".into(),
    }
}

#[test]
fn test_content_types_are_distinct() {
    assert_eq!(JsonCodec.content_type(), "application/json");
    assert_eq!(BincodeCodec.content_type(), "application/x-bincode");
    assert_ne!(JsonCodec.content_type(), BincodeCodec.content_type());
}

#[test]
fn test_json_payload_is_tagged_and_readable() {
    let payload = JsonCodec.encode(&PlayingState { is_paused: true }).unwrap();
    assert_eq!(payload.content_type, "application/json");
    assert_eq!(payload.bytes, br#"{"isPaused":true}"#);
}

#[test]
fn test_json_roundtrip_nested_value() {
    let original = sample_move();
    let payload = JsonCodec.encode(&original).unwrap();
    let decoded: Move = JsonCodec.decode(&payload.bytes).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_bincode_roundtrip_keeps_timestamp_precision() {
    let log = GameLog {
        current_time: Utc.timestamp_opt(1_725_000_000, 123_456_789).unwrap(),
        message: "washington won a war against napoleon".into(),
        username: "washington".into(),
    };
    let payload = BincodeCodec.encode(&log).unwrap();
    assert_eq!(payload.content_type, "application/x-bincode");

    let decoded: GameLog = BincodeCodec.decode(&payload.bytes).unwrap();
    assert_eq!(decoded, log);
    assert_eq!(decoded.current_time.timestamp_subsec_nanos(), 123_456_789);
}

#[test]
fn test_json_rejects_malformed_payload() {
    let result = JsonCodec.decode::<PlayingState>(b"{\"isPaused\": tru");
    assert!(result.is_err());
}

#[test]
fn test_json_rejects_wrong_schema() {
    let result = JsonCodec.decode::<PlayingState>(br#"{"paused": "yes"}"#);
    assert!(result.is_err());
}

#[test]
fn test_bincode_rejects_truncated_payload() {
    let payload = BincodeCodec.encode(&sample_move()).unwrap();
    let truncated = &payload.bytes[..payload.bytes.len() / 2];
    assert!(BincodeCodec.decode::<Move>(truncated).is_err());
}

#[test]
fn test_bincode_rejects_trailing_bytes() {
    let mut bytes = BincodeCodec.encode(&42u32).unwrap().bytes;
    bytes.push(0xFF);
    assert!(BincodeCodec.decode::<u32>(&bytes).is_err());
}

#[test]
fn test_bincode_rejects_json_bytes() {
    let json = JsonCodec.encode(&sample_move()).unwrap();
    assert!(BincodeCodec.decode::<Move>(&json.bytes).is_err());
}
