/// Routing rule of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Binding key must equal the routing key.
    Direct,
    /// Binding key is a pattern over dot-delimited segments.
    Topic,
    /// Every bound queue receives every message.
    Fanout,
}

impl ExchangeKind {
    /// Whether a queue bound with `binding_key` receives a message published with `routing_key`.
    pub fn routes(self, binding_key: &str, routing_key: &str) -> bool {
        match self {
            ExchangeKind::Direct => binding_key == routing_key,
            ExchangeKind::Topic => topic_matches(binding_key, routing_key),
            ExchangeKind::Fanout => true,
        }
    }
}

/// Topic-exchange matching.
///
/// Both sides are split on `.`; in the pattern `*` matches exactly one
/// segment and `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_segments(&pattern, &key)
}

fn matches_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some((&"#", rest)), _) => {
            matches_segments(rest, key) || (!key.is_empty() && matches_segments(pattern, &key[1..]))
        }
        (Some(_), None) => false,
        (Some((&head, rest)), Some((&segment, key_rest))) => {
            (head == "*" || head == segment) && matches_segments(rest, key_rest)
        }
    }
}
