use std::collections::HashMap;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use filtrex_model::events::ServerMessage;

/// One WebSocket session: its outbound channel and the compilations it has
/// in flight.
pub struct Connection {
    pub id: Uuid,
    sender: mpsc::Sender<ServerMessage>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

impl Connection {
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Send a message to this connection; false once the socket is gone.
    pub async fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).await.is_ok()
    }

    /// Register a new compilation if the per-connection cap allows it.
    pub async fn begin_compile(
        &self,
        compile_id: Uuid,
        max_concurrent: usize,
    ) -> Option<CancellationToken> {
        let mut active = self.active.lock().await;
        if active.len() >= max_concurrent || active.contains_key(&compile_id) {
            return None;
        }
        let token = CancellationToken::new();
        active.insert(compile_id, token.clone());
        Some(token)
    }

    pub async fn finish_compile(&self, compile_id: Uuid) {
        self.active.lock().await.remove(&compile_id);
    }

    /// Cancel one in-flight compilation; false when the id is unknown.
    pub async fn cancel_compile(&self, compile_id: Uuid) -> bool {
        match self.active.lock().await.get(&compile_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Abort everything on disconnect.
    pub async fn cancel_all(&self) {
        for token in self.active.lock().await.values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let (tx, _rx) = mpsc::channel(8);
        Connection::new(tx)
    }

    #[tokio::test]
    async fn concurrent_compilations_are_capped() {
        let connection = connection();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        assert!(connection.begin_compile(a, 2).await.is_some());
        assert!(connection.begin_compile(b, 2).await.is_some());
        assert!(connection.begin_compile(c, 2).await.is_none());

        connection.finish_compile(a).await;
        assert!(connection.begin_compile(c, 2).await.is_some());
    }

    #[tokio::test]
    async fn duplicate_compile_ids_are_rejected() {
        let connection = connection();
        let id = Uuid::new_v4();
        assert!(connection.begin_compile(id, 3).await.is_some());
        assert!(connection.begin_compile(id, 3).await.is_none());
    }

    #[tokio::test]
    async fn cancel_fires_the_right_token() {
        let connection = connection();
        let id = Uuid::new_v4();
        let token = connection.begin_compile(id, 3).await.unwrap();

        assert!(!token.is_cancelled());
        assert!(connection.cancel_compile(id).await);
        assert!(token.is_cancelled());
        assert!(!connection.cancel_compile(Uuid::new_v4()).await);
    }
}
