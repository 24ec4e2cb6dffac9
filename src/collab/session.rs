use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{PresenceUser, ServerMessage};
use crate::storage::UserRecord;

/// Server-side state for one live client connection. The identity was
/// resolved at handshake time and is never re-derived from client data.
pub struct Session {
    pub conn_id: Uuid,
    pub user: UserRecord,
    /// Diagram this session is currently viewing, if any.
    pub joined: Option<String>,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Session {
    pub fn new(conn_id: Uuid, user: UserRecord, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            conn_id,
            user,
            joined: None,
            tx,
        }
    }

    pub fn presence_user(&self) -> PresenceUser {
        PresenceUser {
            id: self.user.id.clone(),
            username: self.user.username.clone(),
            first_name: self.user.first_name.clone(),
            last_name: self.user.last_name.clone(),
        }
    }

    /// Push a message to this connection. Best-effort: a connection whose
    /// socket task has already gone away simply drops the message.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.tx.send(message);
    }
}
