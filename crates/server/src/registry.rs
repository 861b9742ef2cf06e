//! Live connection registry
//!
//! Maps connection ids to their transport and bot. Ids are minted with UUID
//! v4 on insert and never reused; once an entry is removed its id answers
//! NotFound forever.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;
use voicebridge_bot::BotHandle;
use voicebridge_transport::PeerSession;

/// One accepted connection
pub struct Connection {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub transport: Arc<PeerSession>,
    bot: BotHandle,
}

impl Connection {
    pub fn new(id: String, transport: Arc<PeerSession>, bot: BotHandle) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            transport,
            bot,
        }
    }

    /// The bot task has ended (peer gone, or aborted)
    pub fn is_finished(&self) -> bool {
        self.bot.is_finished()
    }
}

/// Registry of live connections
///
/// Capacity-bounded; the sweeper task calls [`ConnectionRegistry::sweep`] to
/// drop entries whose bot has finished.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Mint a fresh id; the caller builds the [`Connection`] around it
    pub fn mint_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn at_capacity(&self) -> bool {
        self.connections.read().len() >= self.max_connections
    }

    /// Register a connection; rejects when full
    pub fn insert(&self, connection: Connection) -> bool {
        let mut map = self.connections.write();
        if map.len() >= self.max_connections {
            return false;
        }
        map.insert(connection.id.clone(), Arc::new(connection));
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Remove one connection, aborting its bot and closing the transport
    ///
    /// Teardown never awaits the bot task.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(connection) => {
                connection.bot.abort();
                let transport = Arc::clone(&connection.transport);
                tokio::spawn(async move {
                    let _ = transport.close().await;
                });
                tracing::info!(connection_id = %id, "Connection removed");
                true
            }
            None => false,
        }
    }

    /// Drop all entries whose bot has finished; returns how many went
    pub fn sweep(&self) -> usize {
        let finished: Vec<String> = self
            .connections
            .read()
            .values()
            .filter(|c| c.is_finished())
            .map(|c| c.id.clone())
            .collect();

        for id in &finished {
            self.remove(id);
        }
        finished.len()
    }

    /// Remove everything; used at shutdown
    pub fn clear(&self) {
        let ids = self.ids();
        for id in &ids {
            self.remove(id);
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Closed all connections");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicebridge_transport::WebRtcConfig;

    async fn test_connection(registry: &ConnectionRegistry) -> Connection {
        let transport = Arc::new(PeerSession::new(WebRtcConfig::default()).await.unwrap());
        let bot = fake_bot();
        Connection::new(registry.mint_id(), transport, bot)
    }

    fn fake_bot() -> BotHandle {
        // A pending task stands in for a live bot
        voicebridge_bot::BotHandle::from_task(tokio::spawn(std::future::pending()))
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = ConnectionRegistry::new(10);
        let connection = test_connection(&registry).await;
        let id = connection.id.clone();

        assert!(registry.insert(connection));
        assert!(registry.get(&id).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id));
        assert!(registry.get(&id).is_none());
        // Removal is idempotent and the id stays dead
        assert!(!registry.remove(&id));
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let registry = ConnectionRegistry::new(1);
        let first = test_connection(&registry).await;
        let second = test_connection(&registry).await;

        assert!(registry.insert(first));
        assert!(registry.at_capacity());
        assert!(!registry.insert(second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = ConnectionRegistry::new(10);
        let a = registry.mint_id();
        let b = registry.mint_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_sweep_drops_finished_bots() {
        let registry = ConnectionRegistry::new(10);
        let transport = Arc::new(PeerSession::new(WebRtcConfig::default()).await.unwrap());
        let bot = voicebridge_bot::BotHandle::from_task(tokio::spawn(async {}));
        let connection = Connection::new(registry.mint_id(), transport, bot);
        let id = connection.id.clone();
        registry.insert(connection);

        // Let the empty task finish
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(registry.sweep(), 1);
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = ConnectionRegistry::new(10);
        registry.insert(test_connection(&registry).await);
        registry.insert(test_connection(&registry).await);
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
    }
}
