use crate::types::{PriceUpdate, ServerMessage};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A client's subscription information.
pub struct ClientSubscription {
    /// Subscribed symbol ids.
    pub symbols: HashSet<i64>,
    /// Channel to send messages to the client.
    pub tx: mpsc::UnboundedSender<String>,
}

/// Manages live price stream subscriptions.
pub struct RoomManager {
    /// Client subscriptions keyed by client ID.
    clients: DashMap<Uuid, ClientSubscription>,
    /// Symbol rooms: symbol id -> set of client IDs.
    rooms: DashMap<i64, HashSet<Uuid>>,
}

impl RoomManager {
    /// Create a new room manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new client.
    pub fn register(&self, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let client_id = Uuid::new_v4();
        self.clients.insert(
            client_id,
            ClientSubscription {
                symbols: HashSet::new(),
                tx,
            },
        );
        client_id
    }

    /// Unregister a client and remove it from all rooms.
    pub fn unregister(&self, client_id: Uuid) {
        if let Some((_, subscription)) = self.clients.remove(&client_id) {
            for symbol_id in subscription.symbols {
                if let Some(mut room) = self.rooms.get_mut(&symbol_id) {
                    room.remove(&client_id);
                }
            }
        }
    }

    /// Subscribe a client to symbols. Returns the newly added ids.
    pub fn subscribe(&self, client_id: Uuid, symbols: &[i64]) -> Vec<i64> {
        let mut subscribed = Vec::new();

        if let Some(mut client) = self.clients.get_mut(&client_id) {
            for &symbol_id in symbols {
                if client.symbols.insert(symbol_id) {
                    subscribed.push(symbol_id);
                    self.rooms.entry(symbol_id).or_default().insert(client_id);
                }
            }
        }

        subscribed
    }

    /// Unsubscribe a client from symbols. Returns the removed ids.
    pub fn unsubscribe(&self, client_id: Uuid, symbols: &[i64]) -> Vec<i64> {
        let mut unsubscribed = Vec::new();

        if let Some(mut client) = self.clients.get_mut(&client_id) {
            for symbol_id in symbols {
                if client.symbols.remove(symbol_id) {
                    unsubscribed.push(*symbol_id);
                    if let Some(mut room) = self.rooms.get_mut(symbol_id) {
                        room.remove(&client_id);
                    }
                }
            }
        }

        unsubscribed
    }

    /// Senders of every client subscribed to a symbol.
    fn subscribers(&self, symbol_id: i64) -> Vec<mpsc::UnboundedSender<String>> {
        let client_ids: Vec<Uuid> = self
            .rooms
            .get(&symbol_id)
            .map(|room| room.iter().copied().collect())
            .unwrap_or_default();

        client_ids
            .iter()
            .filter_map(|id| self.clients.get(id).map(|c| c.tx.clone()))
            .collect()
    }

    /// Broadcast a message to all clients subscribed to a symbol. Returns the
    /// number of clients it was handed to.
    pub fn broadcast(&self, symbol_id: i64, message: &str) -> usize {
        self.subscribers(symbol_id)
            .into_iter()
            .filter(|tx| tx.send(message.to_string()).is_ok())
            .count()
    }

    /// Send a message to one client.
    pub fn send_to(&self, client_id: Uuid, message: &ServerMessage) {
        if let Ok(json) = serde_json::to_string(message) {
            if let Some(client) = self.clients.get(&client_id) {
                let _ = client.tx.send(json);
            }
        }
    }

    /// Forward every price update to the room of its symbol until the engine
    /// channel closes.
    pub async fn run_fanout(self: Arc<Self>, mut updates: broadcast::Receiver<PriceUpdate>) {
        info!("Price stream fan-out started");
        loop {
            match updates.recv().await {
                Ok(update) => {
                    let symbol_id = update.symbol_id;
                    let msg = ServerMessage::PriceUpdate { data: update };
                    if let Ok(json) = serde_json::to_string(&msg) {
                        let delivered = self.broadcast(symbol_id, &json);
                        if delivered > 0 {
                            debug!("Price update for symbol {} sent to {} clients", symbol_id, delivered);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Price stream fan-out lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Price stream fan-out stopped");
    }

    /// Get the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Get the number of active rooms (symbols with subscribers).
    pub fn room_count(&self) -> usize {
        self.rooms.iter().filter(|r| !r.is_empty()).count()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let manager = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let client_id = manager.register(tx);
        assert_eq!(manager.client_count(), 1);

        manager.unregister(client_id);
        assert_eq!(manager.client_count(), 0);
    }

    #[test]
    fn test_subscribe_is_deduplicated() {
        let manager = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let client_id = manager.register(tx);

        assert_eq!(manager.subscribe(client_id, &[1, 2]), vec![1, 2]);
        assert_eq!(manager.subscribe(client_id, &[2, 3]), vec![3]);
        assert_eq!(manager.room_count(), 3);

        assert_eq!(manager.unsubscribe(client_id, &[1, 9]), vec![1]);
        assert_eq!(manager.room_count(), 2);
    }

    #[test]
    fn test_broadcast_reaches_room_only() {
        let manager = RoomManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = manager.register(tx1);
        let c2 = manager.register(tx2);
        manager.subscribe(c1, &[1]);
        manager.subscribe(c2, &[2]);

        assert_eq!(manager.broadcast(1, "hello"), 1);
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fanout_forwards_price_updates() {
        let manager = RoomManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client_id = manager.register(tx);
        manager.subscribe(client_id, &[5]);

        let (updates_tx, updates_rx) = broadcast::channel(16);
        let fanout = tokio::spawn(manager.clone().run_fanout(updates_rx));

        for symbol_id in [4, 5] {
            updates_tx
                .send(PriceUpdate {
                    symbol_id,
                    reference_price: 10.0,
                    manipulated_price: 10.5,
                    timestamp: 1_700_000_000,
                    simulated: false,
                })
                .unwrap();
        }
        drop(updates_tx);
        fanout.await.unwrap();

        let json = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "price_update");
        assert_eq!(value["data"]["symbolId"], 5);
        assert_eq!(value["data"]["manipulatedPrice"], 10.5);
        assert!(rx.try_recv().is_err());
    }
}
