use super::PriceUpdate;
use serde::{Deserialize, Serialize};

/// Messages sent by a stream client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { symbols: Vec<i64> },
    Unsubscribe { symbols: Vec<i64> },
}

/// Messages pushed to a stream client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PriceUpdate { data: PriceUpdate },
    Subscribed { symbols: Vec<i64> },
    Unsubscribed { symbols: Vec<i64> },
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","symbols":[1,2]}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { symbols } => assert_eq!(symbols, vec![1, 2]),
            _ => panic!("Expected subscribe"),
        }
    }

    #[test]
    fn test_price_update_serialization() {
        let msg = ServerMessage::PriceUpdate {
            data: PriceUpdate {
                symbol_id: 7,
                reference_price: 100.0,
                manipulated_price: 101.5,
                timestamp: 1_700_000_000,
                simulated: false,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"price_update\""));
        assert!(json.contains("\"symbolId\":7"));
        assert!(json.contains("\"manipulatedPrice\":101.5"));
    }
}
