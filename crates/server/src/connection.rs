//! Connection fan-out: maps connected players to the channel that feeds
//! their socket-writer task, so gameplay broadcasts reach everyone
//! currently online without the world/session/security core knowing
//! anything about sockets.
//!
//! Grounded on the pack's session-table-plus-broadcast pattern (the
//! Slime Online reference server keeps a `sessions` map the accept loop
//! and background tasks both reach through); this registry plays the
//! same role but stays a plain `Mutex<HashMap<..>>` since fan-out here
//! is a flat broadcast, not a per-session read/write split.

use msweep_wire::ServerMessage;
use msweep_world::PlayerId;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// One outbound line per send; the writer task on the other end forwards
/// each line to the socket verbatim.
pub struct ConnectionRegistry {
    senders: Mutex<HashMap<PlayerId, UnboundedSender<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, player_id: PlayerId, tx: UnboundedSender<String>) {
        self.senders.lock().unwrap().insert(player_id, tx);
    }

    pub fn unregister(&self, player_id: PlayerId) {
        self.senders.lock().unwrap().remove(&player_id);
    }

    /// Send a message to exactly one connected player. Silently a no-op
    /// if they've since disconnected.
    pub fn send_to(&self, player_id: PlayerId, msg: &ServerMessage) {
        let Ok(line) = serde_json::to_string(msg) else {
            return;
        };
        if let Some(tx) = self.senders.lock().unwrap().get(&player_id) {
            let _ = tx.send(line);
        }
    }

    /// Send a message to every connected player. Safe to call with
    /// already-revealed tile/player data; nothing withheld by the
    /// viewport materializer is ever broadcast this way.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let Ok(line) = serde_json::to_string(msg) else {
            return;
        };
        for tx in self.senders.lock().unwrap().values() {
            let _ = tx.send(line.clone());
        }
    }

    pub fn connected_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msweep_wire::PositionWire;
    use tokio::sync::mpsc;

    fn sample_message() -> ServerMessage {
        ServerMessage::Pong {
            server_timestamp: 1,
            echo: 1,
        }
    }

    #[test]
    fn send_to_unregistered_player_is_a_noop() {
        let registry = ConnectionRegistry::new();
        registry.send_to(42, &sample_message());
    }

    #[test]
    fn broadcast_reaches_every_registered_sender() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(1, tx1);
        registry.register(2, tx2);

        registry.broadcast(&ServerMessage::GameOver { progress_percent: 100 });

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert_eq!(registry.connected_count(), 2);
    }

    #[test]
    fn unregister_stops_further_delivery() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, tx);
        registry.unregister(1);
        registry.send_to(
            1,
            &ServerMessage::Welcome {
                player_id: 1,
                username: "x".to_string(),
                color: "#000".to_string(),
                position: PositionWire { x: 0, y: 0 },
                world_size: 10,
                session_token: "tok".to_string(),
            },
        );
        assert!(rx.try_recv().is_err());
    }
}
