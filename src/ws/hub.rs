//! Session registry for connected clients.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::ServerEvent;

/// Size of the per-session send buffer.
const SESSION_BUFFER_SIZE: usize = 64;

/// Addressable end of one client's channel.
///
/// Cloned into every task working on behalf of the session. Once the
/// session is unregistered its token is cancelled and further emits fail.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this session only. Returns false if the session is gone.
    pub async fn emit(&self, event: ServerEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Session {} closed before event could be sent", self.id);
            return false;
        }
        true
    }

    /// Token that fires when the session disconnects.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

/// Registry of live sessions.
///
/// Holds no state beyond the handles; nothing survives a disconnect.
pub struct WsHub {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl WsHub {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a new session.
    ///
    /// Returns the handle used to emit events and the receiver the
    /// connection's writer drains.
    pub fn register(&self) -> (SessionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER_SIZE);
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            tx,
            cancel: CancellationToken::new(),
        };
        self.sessions.insert(handle.id, handle.clone());
        info!("Registered session {}", handle.id);
        (handle, rx)
    }

    /// Drop a session and cancel everything still running for it.
    pub fn unregister(&self, id: Uuid) {
        if let Some((_, handle)) = self.sessions.remove(&id) {
            handle.cancel.cancel();
            info!("Unregistered session {}", id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_emit() {
        let hub = WsHub::new();
        let (session, mut rx) = hub.register();
        assert_eq!(hub.session_count(), 1);

        assert!(session.emit(ServerEvent::Ping).await);
        assert!(matches!(rx.recv().await, Some(ServerEvent::Ping)));
    }

    #[tokio::test]
    async fn test_unregister_cancels_and_blocks_emits() {
        let hub = WsHub::new();
        let (session, _rx) = hub.register();
        let token = session.child_token();

        hub.unregister(session.id());

        assert_eq!(hub.session_count(), 0);
        assert!(token.is_cancelled());
        assert!(!session.emit(ServerEvent::Ping).await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let hub = WsHub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        assert_ne!(a.id(), b.id());

        a.emit(ServerEvent::Chunk("for a".to_string())).await;
        assert!(matches!(rx_a.recv().await, Some(ServerEvent::Chunk(ref s)) if s == "for a"));
        assert!(rx_b.try_recv().is_err());
    }
}
