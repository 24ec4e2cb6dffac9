use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    ClientMessage, CursorMoveMessage, DiagramRef, ElementAddMessage, ElementAddedMessage,
    ElementConfirmMessage, ElementDeletedMessage, ElementLockedMessage, ElementRef,
    ElementUnlockedMessage, ElementUpdateMessage, ElementUpdatedMessage, ErrorMessage,
    JoinedMessage, LockFailedMessage, LockGrantedMessage, LockedElementsMessage, PongMessage,
    PresenceUser, ServerMessage, UnlockReason, UserEventMessage, UsersUpdatedMessage,
    CursorMovedMessage,
};
use crate::storage::{DiagramStore, UserRecord};

use super::cursors::CursorTracker;
use super::error::CollabError;
use super::locks::{AcquireOutcome, LockTable, ReleaseError};
use super::presence::PresenceRegistry;
use super::session::Session;

/// Messages produced by one dispatch, each resolved to a target connection.
pub type Outbound = Vec<(Uuid, ServerMessage)>;

/// Counters reported by the diagnostics endpoint.
pub struct CollabStats {
    pub n_conn: u32,
    pub n_rooms: u32,
    pub n_locks: u32,
    pub n_cursors: u32,
}

/// Collaboration state shared by all connections: who is connected, who is
/// where, who holds what. Mutated only through [`EventRouter`] methods.
#[derive(Default)]
pub struct CollabState {
    pub sessions: HashMap<Uuid, Session>,
    pub presence: PresenceRegistry,
    pub locks: LockTable,
    pub cursors: CursorTracker,
}

/// Single entry point for every session event. All mutations are serialized
/// behind one mutex; the storage lookup a join needs happens before the
/// mutex is taken, so one slow lookup never stalls other connections.
pub struct EventRouter {
    state: Mutex<CollabState>,
    lock_timeout: Duration,
}

impl EventRouter {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(CollabState::default()),
            lock_timeout,
        }
    }

    /// Register a freshly authenticated connection and return its id.
    pub async fn register(&self, user: UserRecord, tx: mpsc::UnboundedSender<ServerMessage>) -> Uuid {
        let conn_id = Uuid::new_v4();
        let mut state = self.state.lock().await;
        state.sessions.insert(conn_id, Session::new(conn_id, user, tx));
        conn_id
    }

    /// Handle one inbound event: validate, mutate, deliver. The returned
    /// set is what was delivered, with acknowledgements addressed to the
    /// sender and broadcasts to its room peers.
    pub async fn dispatch(
        &self,
        conn_id: Uuid,
        message: ClientMessage,
        diagrams: &dyn DiagramStore,
    ) -> Outbound {
        if let ClientMessage::Join(join) = &message {
            match diagrams.diagram_exists(&join.diagram_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return self
                        .error_reply(
                            conn_id,
                            &CollabError::NotFound(format!("diagram {}", join.diagram_id)),
                        )
                        .await;
                }
                Err(e) => {
                    warn!("Diagram lookup failed for {}: {}", join.diagram_id, e);
                    return self
                        .error_reply(
                            conn_id,
                            &CollabError::Internal("diagram lookup failed".to_string()),
                        )
                        .await;
                }
            }
        }

        let mut state = self.state.lock().await;
        let result = match message {
            ClientMessage::Join(m) => handle_join(&mut state, conn_id, &m.diagram_id),
            ClientMessage::Leave(m) => handle_leave(&mut state, conn_id, &m.diagram_id),
            ClientMessage::ElementAdd(m) => handle_element_add(&mut state, conn_id, m),
            ClientMessage::ElementUpdate(m) => handle_element_update(&mut state, conn_id, m),
            ClientMessage::ElementDelete(m) => handle_element_delete(&mut state, conn_id, m),
            ClientMessage::Lock(m) => handle_lock(&mut state, conn_id, m),
            ClientMessage::Unlock(m) => handle_unlock(&mut state, conn_id, m),
            ClientMessage::CursorMove(m) => {
                // best-effort path: failures are discarded, never reported
                let outbound = handle_cursor_move(&mut state, conn_id, m);
                deliver(&state, &outbound);
                return outbound;
            }
            ClientMessage::Ping => Ok(vec![(
                conn_id,
                ServerMessage::Pong(PongMessage {
                    date: Utc::now().to_rfc3339(),
                }),
            )]),
        };

        let outbound = match result {
            Ok(outbound) => outbound,
            Err(e) => vec![(conn_id, ServerMessage::Error(e.to_error_message()))],
        };
        deliver(&state, &outbound);
        outbound
    }

    /// Tear down a connection: leave its room, release its locks, drop its
    /// cursor and session.
    pub async fn disconnect(&self, conn_id: Uuid) -> Outbound {
        let mut state = self.state.lock().await;
        let joined = match state.sessions.get(&conn_id) {
            Some(session) => session.joined.clone(),
            None => return Vec::new(),
        };

        let mut outbound = Vec::new();
        if let Some(diagram_id) = joined {
            outbound.extend(depart(&mut state, conn_id, &diagram_id));
        }
        if let Some(session) = state.sessions.remove(&conn_id) {
            state.cursors.remove(&session.user.id);
        }

        deliver(&state, &outbound);
        outbound
    }

    /// Force-release every lock older than the configured timeout and
    /// notify the affected rooms.
    pub async fn sweep_expired_locks(&self) -> Outbound {
        let mut state = self.state.lock().await;
        let expired = state.locks.sweep_expired(self.lock_timeout, Instant::now());
        if expired.is_empty() {
            return Vec::new();
        }

        info!("Expired {} stale element lock(s)", expired.len());
        let mut outbound = Vec::new();
        for lock in &expired {
            for conn in conns_in_room(&state, &lock.diagram_id) {
                outbound.push((
                    conn,
                    ServerMessage::ElementUnlocked(ElementUnlockedMessage {
                        element_id: lock.element_id.clone(),
                        unlocked_by: lock.holder.clone(),
                        reason: UnlockReason::Timeout,
                    }),
                ));
            }
        }
        deliver(&state, &outbound);
        outbound
    }

    /// Send a private error message to one connection.
    pub async fn error_reply(&self, conn_id: Uuid, error: &CollabError) -> Outbound {
        let state = self.state.lock().await;
        let outbound = vec![(conn_id, ServerMessage::Error(error.to_error_message()))];
        deliver(&state, &outbound);
        outbound
    }

    pub async fn stats(&self) -> CollabStats {
        let state = self.state.lock().await;
        CollabStats {
            n_conn: state.sessions.len() as u32,
            n_rooms: state.presence.room_count() as u32,
            n_locks: state.locks.len() as u32,
            n_cursors: state.cursors.len() as u32,
        }
    }
}

fn deliver(state: &CollabState, outbound: &Outbound) {
    for (conn_id, message) in outbound {
        if let Some(session) = state.sessions.get(conn_id) {
            session.send(message.clone());
        }
    }
}

fn conns_in_room(state: &CollabState, diagram_id: &str) -> Vec<Uuid> {
    state
        .sessions
        .values()
        .filter(|session| session.joined.as_deref() == Some(diagram_id))
        .map(|session| session.conn_id)
        .collect()
}

fn roster(state: &CollabState, diagram_id: &str) -> Vec<PresenceUser> {
    let mut seen = HashSet::new();
    let mut users = Vec::new();
    for session in state.sessions.values() {
        if session.joined.as_deref() == Some(diagram_id) && seen.insert(session.user.id.clone()) {
            users.push(session.presence_user());
        }
    }
    users
}

fn current_user(state: &CollabState, conn_id: Uuid) -> Result<PresenceUser, CollabError> {
    state
        .sessions
        .get(&conn_id)
        .map(|session| session.presence_user())
        .ok_or_else(|| CollabError::Internal("unknown connection".to_string()))
}

/// The sender must currently be joined to the diagram it is talking about.
fn ensure_joined(
    state: &CollabState,
    conn_id: Uuid,
    diagram_id: &str,
) -> Result<PresenceUser, CollabError> {
    let session = state
        .sessions
        .get(&conn_id)
        .ok_or_else(|| CollabError::Internal("unknown connection".to_string()))?;
    if session.joined.as_deref() != Some(diagram_id) {
        return Err(CollabError::NotJoined(diagram_id.to_string()));
    }
    Ok(session.presence_user())
}

fn handle_join(
    state: &mut CollabState,
    conn_id: Uuid,
    diagram_id: &str,
) -> Result<Outbound, CollabError> {
    let user = current_user(state, conn_id)?;
    let previous = state
        .sessions
        .get(&conn_id)
        .and_then(|session| session.joined.clone());

    // rejoining the current diagram just refreshes the client's view
    if previous.as_deref() == Some(diagram_id) {
        return Ok(vec![
            (
                conn_id,
                ServerMessage::Joined(JoinedMessage {
                    diagram_id: diagram_id.to_string(),
                    users: roster(state, diagram_id),
                }),
            ),
            (
                conn_id,
                ServerMessage::LockedElements(LockedElementsMessage {
                    locks: state.locks.snapshot_for(diagram_id),
                }),
            ),
        ]);
    }

    let mut outbound = Vec::new();

    // a session views at most one diagram at a time
    if let Some(previous_diagram) = previous {
        outbound.extend(depart(state, conn_id, &previous_diagram));
    }

    // a newer connection of the same user supersedes the older one
    let superseded = state
        .sessions
        .values()
        .find(|session| {
            session.conn_id != conn_id
                && session.user.id == user.id
                && session.joined.as_deref() == Some(diagram_id)
        })
        .map(|session| session.conn_id);
    if let Some(other_conn) = superseded {
        if let Some(other_session) = state.sessions.get_mut(&other_conn) {
            other_session.joined = None;
        }
        outbound.push((
            other_conn,
            ServerMessage::Error(ErrorMessage {
                message: "session superseded by a newer connection".to_string(),
                element_id: None,
                locked_by: None,
            }),
        ));
    }

    let newly_present = state.presence.join(diagram_id, &user.id);
    if let Some(session) = state.sessions.get_mut(&conn_id) {
        session.joined = Some(diagram_id.to_string());
    }

    let users = roster(state, diagram_id);
    outbound.push((
        conn_id,
        ServerMessage::Joined(JoinedMessage {
            diagram_id: diagram_id.to_string(),
            users: users.clone(),
        }),
    ));
    outbound.push((
        conn_id,
        ServerMessage::LockedElements(LockedElementsMessage {
            locks: state.locks.snapshot_for(diagram_id),
        }),
    ));

    for member in conns_in_room(state, diagram_id) {
        if member != conn_id && newly_present {
            outbound.push((
                member,
                ServerMessage::UserJoined(UserEventMessage { user: user.clone() }),
            ));
        }
    }
    for member in conns_in_room(state, diagram_id) {
        outbound.push((
            member,
            ServerMessage::UsersUpdated(UsersUpdatedMessage {
                users: users.clone(),
            }),
        ));
    }

    Ok(outbound)
}

fn handle_leave(
    state: &mut CollabState,
    conn_id: Uuid,
    diagram_id: &str,
) -> Result<Outbound, CollabError> {
    ensure_joined(state, conn_id, diagram_id)?;
    let mut outbound = depart(state, conn_id, diagram_id);
    outbound.push((
        conn_id,
        ServerMessage::Left(DiagramRef {
            diagram_id: diagram_id.to_string(),
        }),
    ));
    Ok(outbound)
}

/// Remove a session from its room: release its locks, update the roster and
/// tell the remaining members. Shared by leave, disconnect and the implicit
/// leave performed when a session joins a different diagram.
fn depart(state: &mut CollabState, conn_id: Uuid, diagram_id: &str) -> Outbound {
    let user = match state.sessions.get(&conn_id) {
        Some(session) => session.presence_user(),
        None => return Vec::new(),
    };

    if let Some(session) = state.sessions.get_mut(&conn_id) {
        session.joined = None;
    }

    // the user may still be viewing the diagram through another connection
    let user_still_present = state
        .sessions
        .values()
        .any(|session| session.user.id == user.id && session.joined.as_deref() == Some(diagram_id));
    if user_still_present {
        return Vec::new();
    }

    let released = state.locks.release_all_for(&user.id, diagram_id);
    state.presence.leave(diagram_id, &user.id);

    let remaining = conns_in_room(state, diagram_id);
    let mut outbound = Vec::new();
    for lock in released {
        for conn in &remaining {
            outbound.push((
                *conn,
                ServerMessage::ElementUnlocked(ElementUnlockedMessage {
                    element_id: lock.element_id.clone(),
                    unlocked_by: user.id.clone(),
                    reason: UnlockReason::UserDeparted,
                }),
            ));
        }
    }
    for conn in &remaining {
        outbound.push((
            *conn,
            ServerMessage::UserLeft(UserEventMessage { user: user.clone() }),
        ));
    }
    let users = roster(state, diagram_id);
    for conn in &remaining {
        outbound.push((
            *conn,
            ServerMessage::UsersUpdated(UsersUpdatedMessage {
                users: users.clone(),
            }),
        ));
    }
    outbound
}

fn handle_lock(
    state: &mut CollabState,
    conn_id: Uuid,
    message: ElementRef,
) -> Result<Outbound, CollabError> {
    let user = ensure_joined(state, conn_id, &message.diagram_id)?;

    match state
        .locks
        .acquire(&user.id, &message.diagram_id, &message.element_id, Instant::now())
    {
        AcquireOutcome::Granted { renewed, locked_at } => {
            let mut outbound = vec![(
                conn_id,
                ServerMessage::LockGranted(LockGrantedMessage {
                    element_id: message.element_id.clone(),
                }),
            )];
            // a renewal changes nothing peers can observe
            if !renewed {
                for peer in conns_in_room(state, &message.diagram_id) {
                    if peer == conn_id {
                        continue;
                    }
                    outbound.push((
                        peer,
                        ServerMessage::ElementLocked(ElementLockedMessage {
                            element_id: message.element_id.clone(),
                            locked_by: user.id.clone(),
                            user: user.clone(),
                            locked_at,
                        }),
                    ));
                }
            }
            Ok(outbound)
        }
        AcquireOutcome::Conflict { holder } => Ok(vec![(
            conn_id,
            ServerMessage::LockFailed(LockFailedMessage {
                element_id: message.element_id,
                locked_by: holder,
            }),
        )]),
    }
}

fn handle_unlock(
    state: &mut CollabState,
    conn_id: Uuid,
    message: ElementRef,
) -> Result<Outbound, CollabError> {
    let user = ensure_joined(state, conn_id, &message.diagram_id)?;

    match state.locks.release(&user.id, &message.element_id) {
        Ok(_) => {
            let mut outbound = vec![(
                conn_id,
                ServerMessage::LockReleased(LockGrantedMessage {
                    element_id: message.element_id.clone(),
                }),
            )];
            for peer in conns_in_room(state, &message.diagram_id) {
                if peer == conn_id {
                    continue;
                }
                outbound.push((
                    peer,
                    ServerMessage::ElementUnlocked(ElementUnlockedMessage {
                        element_id: message.element_id.clone(),
                        unlocked_by: user.id.clone(),
                        reason: UnlockReason::Explicit,
                    }),
                ));
            }
            Ok(outbound)
        }
        Err(ReleaseError::HeldByOther(holder)) => Err(CollabError::LockConflict {
            element_id: message.element_id,
            holder,
        }),
        Err(ReleaseError::NotHeld) => Err(CollabError::NotFound(format!(
            "lock on element {}",
            message.element_id
        ))),
    }
}

fn handle_element_add(
    state: &mut CollabState,
    conn_id: Uuid,
    message: ElementAddMessage,
) -> Result<Outbound, CollabError> {
    let user = ensure_joined(state, conn_id, &message.diagram_id)?;

    let element_id = message
        .element
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| CollabError::InvalidRequest("element requires an id".to_string()))?;

    let created_at = Utc::now();
    let mut outbound = vec![(
        conn_id,
        ServerMessage::ElementAddedConfirm(ElementConfirmMessage {
            element_id: element_id.clone(),
        }),
    )];
    for peer in conns_in_room(state, &message.diagram_id) {
        if peer == conn_id {
            continue;
        }
        outbound.push((
            peer,
            ServerMessage::ElementAdded(ElementAddedMessage {
                element: message.element.clone(),
                user: user.clone(),
                created_at,
            }),
        ));
    }
    Ok(outbound)
}

fn handle_element_update(
    state: &mut CollabState,
    conn_id: Uuid,
    message: ElementUpdateMessage,
) -> Result<Outbound, CollabError> {
    let user = ensure_joined(state, conn_id, &message.diagram_id)?;

    if message.changes.is_null() {
        return Err(CollabError::InvalidRequest("changes must not be empty".to_string()));
    }
    if let Some(lock) = state.locks.get(&message.element_id) {
        if lock.holder != user.id {
            return Err(CollabError::LockConflict {
                element_id: message.element_id,
                holder: lock.holder.clone(),
            });
        }
    }

    let updated_at = Utc::now();
    let mut outbound = vec![(
        conn_id,
        ServerMessage::ElementUpdatedConfirm(ElementConfirmMessage {
            element_id: message.element_id.clone(),
        }),
    )];
    for peer in conns_in_room(state, &message.diagram_id) {
        if peer == conn_id {
            continue;
        }
        outbound.push((
            peer,
            ServerMessage::ElementUpdated(ElementUpdatedMessage {
                element_id: message.element_id.clone(),
                changes: message.changes.clone(),
                updated_by: user.id.clone(),
                updated_at,
                user: user.clone(),
            }),
        ));
    }
    Ok(outbound)
}

fn handle_element_delete(
    state: &mut CollabState,
    conn_id: Uuid,
    message: ElementRef,
) -> Result<Outbound, CollabError> {
    let user = ensure_joined(state, conn_id, &message.diagram_id)?;

    if let Some(lock) = state.locks.get(&message.element_id) {
        if lock.holder != user.id {
            return Err(CollabError::LockConflict {
                element_id: message.element_id,
                holder: lock.holder.clone(),
            });
        }
    }
    // deleting an element retires its lock; the deletion broadcast already
    // invalidates peers' lock views
    state.locks.remove(&message.element_id);

    let deleted_at = Utc::now();
    let mut outbound = vec![(
        conn_id,
        ServerMessage::ElementDeletedConfirm(ElementConfirmMessage {
            element_id: message.element_id.clone(),
        }),
    )];
    for peer in conns_in_room(state, &message.diagram_id) {
        if peer == conn_id {
            continue;
        }
        outbound.push((
            peer,
            ServerMessage::ElementDeleted(ElementDeletedMessage {
                element_id: message.element_id.clone(),
                deleted_by: user.id.clone(),
                deleted_at,
            }),
        ));
    }
    Ok(outbound)
}

fn handle_cursor_move(
    state: &mut CollabState,
    conn_id: Uuid,
    message: CursorMoveMessage,
) -> Outbound {
    let user = match state.sessions.get(&conn_id) {
        Some(session) if session.joined.as_deref() == Some(message.diagram_id.as_str()) => {
            session.presence_user()
        }
        _ => return Vec::new(),
    };

    let updated_at = state
        .cursors
        .update(&user.id, &message.diagram_id, message.position);

    let mut outbound = Vec::new();
    for peer in conns_in_room(state, &message.diagram_id) {
        if peer == conn_id {
            continue;
        }
        outbound.push((
            peer,
            ServerMessage::CursorMoved(CursorMovedMessage {
                user_id: user.id.clone(),
                username: user.username.clone(),
                position: message.position,
                updated_at,
            }),
        ));
    }
    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CursorPoint;
    use crate::storage::memory::InMemoryDiagramStore;

    fn user(id: &str) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            username: format!("{}-name", id),
            first_name: None,
            last_name: None,
            is_active: true,
        }
    }

    async fn connect(
        router: &EventRouter,
        id: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = router.register(user(id), tx).await;
        (conn_id, rx)
    }

    fn join(diagram_id: &str) -> ClientMessage {
        ClientMessage::Join(DiagramRef {
            diagram_id: diagram_id.to_string(),
        })
    }

    fn lock(diagram_id: &str, element_id: &str) -> ClientMessage {
        ClientMessage::Lock(ElementRef {
            diagram_id: diagram_id.to_string(),
            element_id: element_id.to_string(),
        })
    }

    fn sent_to(outbound: &Outbound, conn_id: Uuid) -> Vec<&ServerMessage> {
        outbound
            .iter()
            .filter(|(target, _)| *target == conn_id)
            .map(|(_, message)| message)
            .collect()
    }

    #[tokio::test]
    async fn join_sends_roster_and_lock_snapshot() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _rx) = connect(&router, "alice").await;

        let outbound = router.dispatch(alice, join("d1"), &store).await;
        let to_alice = sent_to(&outbound, alice);

        assert!(matches!(to_alice[0], ServerMessage::Joined(m) if m.users.len() == 1));
        assert!(matches!(to_alice[1], ServerMessage::LockedElements(m) if m.locks.is_empty()));
        assert!(to_alice
            .iter()
            .any(|m| matches!(m, ServerMessage::UsersUpdated(m) if m.users.len() == 1)));
    }

    #[tokio::test]
    async fn join_rejects_unknown_diagrams() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::new();
        store.insert("d1");
        let (alice, _rx) = connect(&router, "alice").await;

        let outbound = router.dispatch(alice, join("missing"), &store).await;
        assert!(matches!(outbound[0].1, ServerMessage::Error(_)));

        let stats = router.stats().await;
        assert_eq!(stats.n_rooms, 0);
    }

    #[tokio::test]
    async fn events_for_unjoined_diagrams_are_rejected() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _rx) = connect(&router, "alice").await;

        let outbound = router.dispatch(alice, lock("d1", "e1"), &store).await;
        assert_eq!(outbound.len(), 1);
        assert!(matches!(
            &outbound[0].1,
            ServerMessage::Error(m) if m.message.contains("not joined")
        ));
    }

    #[tokio::test]
    async fn lock_conflict_names_the_holder_and_clears_on_release() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;

        let outbound = router.dispatch(alice, lock("d1", "e1"), &store).await;
        assert!(matches!(outbound[0].1, ServerMessage::LockGranted(_)));
        assert!(sent_to(&outbound, bob)
            .iter()
            .any(|m| matches!(m, ServerMessage::ElementLocked(m) if m.locked_by == "alice")));

        // bob cannot update while alice holds the lock
        let update = ClientMessage::ElementUpdate(ElementUpdateMessage {
            diagram_id: "d1".to_string(),
            element_id: "e1".to_string(),
            changes: serde_json::json!({ "x": 10 }),
        });
        let outbound = router.dispatch(bob, update.clone(), &store).await;
        assert!(matches!(
            &outbound[0].1,
            ServerMessage::Error(m) if m.locked_by.as_deref() == Some("alice")
        ));

        // after alice releases, bob's retry goes through
        let unlock = ClientMessage::Unlock(ElementRef {
            diagram_id: "d1".to_string(),
            element_id: "e1".to_string(),
        });
        router.dispatch(alice, unlock, &store).await;
        let outbound = router.dispatch(bob, update, &store).await;
        assert!(matches!(outbound[0].1, ServerMessage::ElementUpdatedConfirm(_)));
        assert!(sent_to(&outbound, alice)
            .iter()
            .any(|m| matches!(m, ServerMessage::ElementUpdated(_))));
    }

    #[tokio::test]
    async fn repeated_acquire_by_the_holder_is_idempotent() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;

        router.dispatch(alice, lock("d1", "e1"), &store).await;
        let outbound = router.dispatch(alice, lock("d1", "e1"), &store).await;

        assert!(matches!(outbound[0].1, ServerMessage::LockGranted(_)));
        // renewal is invisible to peers
        assert!(sent_to(&outbound, bob).is_empty());
        assert_eq!(router.stats().await.n_locks, 1);
    }

    #[tokio::test]
    async fn a_lock_cannot_be_released_by_another_user() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;
        router.dispatch(alice, lock("d1", "e1"), &store).await;

        let unlock = ClientMessage::Unlock(ElementRef {
            diagram_id: "d1".to_string(),
            element_id: "e1".to_string(),
        });
        let outbound = router.dispatch(bob, unlock, &store).await;
        assert!(matches!(
            &outbound[0].1,
            ServerMessage::Error(m) if m.locked_by.as_deref() == Some("alice")
        ));
        assert_eq!(router.stats().await.n_locks, 1);
    }

    #[tokio::test]
    async fn disconnect_releases_locks_and_notifies_the_room() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;
        router.dispatch(alice, lock("d1", "e1"), &store).await;

        let outbound = router.disconnect(alice).await;
        let to_bob = sent_to(&outbound, bob);

        assert!(to_bob.iter().any(|m| matches!(
            m,
            ServerMessage::ElementUnlocked(m)
                if m.reason == UnlockReason::UserDeparted && m.element_id == "e1"
        )));
        assert!(to_bob
            .iter()
            .any(|m| matches!(m, ServerMessage::UsersUpdated(m) if m.users.len() == 1)));

        let stats = router.stats().await;
        assert_eq!(stats.n_conn, 1);
        assert_eq!(stats.n_locks, 0);
        assert_eq!(stats.n_cursors, 0);
    }

    #[tokio::test]
    async fn sweep_notifies_each_room_once_per_expired_lock() {
        let router = EventRouter::new(Duration::ZERO);
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;
        router.dispatch(alice, lock("d1", "e1"), &store).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let outbound = router.sweep_expired_locks().await;

        let unlocks: Vec<_> = outbound
            .iter()
            .filter(|(_, m)| {
                matches!(m, ServerMessage::ElementUnlocked(m) if m.reason == UnlockReason::Timeout)
            })
            .collect();
        assert_eq!(unlocks.len(), 2); // one per room member
        assert_eq!(router.stats().await.n_locks, 0);
    }

    #[tokio::test]
    async fn joining_a_second_diagram_leaves_the_first() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;
        router.dispatch(alice, lock("d1", "e1"), &store).await;

        let outbound = router.dispatch(alice, join("d2"), &store).await;

        // bob sees alice depart d1, lock released
        let to_bob = sent_to(&outbound, bob);
        assert!(to_bob.iter().any(|m| matches!(
            m,
            ServerMessage::ElementUnlocked(m) if m.reason == UnlockReason::UserDeparted
        )));
        assert!(to_bob.iter().any(|m| matches!(m, ServerMessage::UserLeft(_))));

        let stats = router.stats().await;
        assert_eq!(stats.n_rooms, 2);
        assert_eq!(stats.n_locks, 0);
    }

    #[tokio::test]
    async fn a_second_session_of_the_same_user_supersedes_the_first() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (first, _rx1) = connect(&router, "alice").await;
        let (second, _rx2) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(first, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;

        let outbound = router.dispatch(second, join("d1"), &store).await;

        // the older session is detached and told so
        assert!(sent_to(&outbound, first)
            .iter()
            .any(|m| matches!(m, ServerMessage::Error(m) if m.message.contains("superseded"))));
        // no duplicate roster entries
        let roster_users = outbound
            .iter()
            .find_map(|(target, m)| match m {
                ServerMessage::UsersUpdated(m) if *target == second => Some(m.users.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(roster_users.len(), 2);

        // events from the superseded session are now rejected
        let outbound = router.dispatch(first, lock("d1", "e1"), &store).await;
        assert!(matches!(outbound[0].1, ServerMessage::Error(_)));
    }

    #[tokio::test]
    async fn cursor_moves_are_broadcast_and_failures_are_silent() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;

        let cursor = ClientMessage::CursorMove(CursorMoveMessage {
            diagram_id: "d1".to_string(),
            position: CursorPoint { x: 4.0, y: 2.0 },
        });
        let outbound = router.dispatch(alice, cursor, &store).await;
        assert!(sent_to(&outbound, bob)
            .iter()
            .any(|m| matches!(m, ServerMessage::CursorMoved(m) if m.user_id == "alice")));

        // a cursor event for a diagram the sender never joined is dropped
        let stray = ClientMessage::CursorMove(CursorMoveMessage {
            diagram_id: "other".to_string(),
            position: CursorPoint { x: 0.0, y: 0.0 },
        });
        let outbound = router.dispatch(alice, stray, &store).await;
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn element_add_is_never_lock_gated() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        let (bob, _brx) = connect(&router, "bob").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(bob, join("d1"), &store).await;
        router.dispatch(alice, lock("d1", "e1"), &store).await;

        let add = ClientMessage::ElementAdd(ElementAddMessage {
            diagram_id: "d1".to_string(),
            element: serde_json::json!({ "id": "e2", "kind": "class" }),
        });
        let outbound = router.dispatch(bob, add, &store).await;
        assert!(matches!(outbound[0].1, ServerMessage::ElementAddedConfirm(_)));
        assert!(sent_to(&outbound, alice)
            .iter()
            .any(|m| matches!(m, ServerMessage::ElementAdded(_))));
    }

    #[tokio::test]
    async fn deleting_an_element_clears_its_lock() {
        let router = EventRouter::new(Duration::from_secs(30));
        let store = InMemoryDiagramStore::allow_all();
        let (alice, _arx) = connect(&router, "alice").await;
        router.dispatch(alice, join("d1"), &store).await;
        router.dispatch(alice, lock("d1", "e1"), &store).await;

        let delete = ClientMessage::ElementDelete(ElementRef {
            diagram_id: "d1".to_string(),
            element_id: "e1".to_string(),
        });
        let outbound = router.dispatch(alice, delete, &store).await;
        assert!(matches!(outbound[0].1, ServerMessage::ElementDeletedConfirm(_)));
        assert_eq!(router.stats().await.n_locks, 0);
    }
}
