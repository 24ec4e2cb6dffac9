//! End-to-end collaboration scenarios driven through the event router,
//! without a live transport.

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use uml_collab::collab::router::{EventRouter, Outbound};
use uml_collab::models::{
    ClientMessage, CursorPoint, CursorMoveMessage, DiagramRef, ElementRef, ElementUpdateMessage,
    ServerMessage, UnlockReason,
};
use uml_collab::storage::memory::InMemoryDiagramStore;
use uml_collab::storage::UserRecord;

fn user(id: &str) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        username: format!("{}-name", id),
        first_name: Some(id.to_string()),
        last_name: None,
        is_active: true,
    }
}

async fn connect(router: &EventRouter, id: &str) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn_id = router.register(user(id), tx).await;
    (conn_id, rx)
}

fn join(diagram_id: &str) -> ClientMessage {
    ClientMessage::Join(DiagramRef {
        diagram_id: diagram_id.to_string(),
    })
}

fn leave(diagram_id: &str) -> ClientMessage {
    ClientMessage::Leave(DiagramRef {
        diagram_id: diagram_id.to_string(),
    })
}

fn lock(diagram_id: &str, element_id: &str) -> ClientMessage {
    ClientMessage::Lock(ElementRef {
        diagram_id: diagram_id.to_string(),
        element_id: element_id.to_string(),
    })
}

fn unlock(diagram_id: &str, element_id: &str) -> ClientMessage {
    ClientMessage::Unlock(ElementRef {
        diagram_id: diagram_id.to_string(),
        element_id: element_id.to_string(),
    })
}

fn update(diagram_id: &str, element_id: &str) -> ClientMessage {
    ClientMessage::ElementUpdate(ElementUpdateMessage {
        diagram_id: diagram_id.to_string(),
        element_id: element_id.to_string(),
        changes: serde_json::json!({ "name": "Order" }),
    })
}

fn sent_to(outbound: &Outbound, conn_id: Uuid) -> Vec<&ServerMessage> {
    outbound
        .iter()
        .filter(|(target, _)| *target == conn_id)
        .map(|(_, message)| message)
        .collect()
}

/// The roster most recently pushed to a connection by this dispatch.
fn last_roster(outbound: &Outbound, conn_id: Uuid) -> Option<Vec<String>> {
    sent_to(outbound, conn_id)
        .into_iter()
        .rev()
        .find_map(|message| match message {
            ServerMessage::UsersUpdated(m) => {
                Some(m.users.iter().map(|u| u.id.clone()).collect())
            }
            _ => None,
        })
}

#[tokio::test]
async fn lock_contention_lifecycle() {
    let router = EventRouter::new(Duration::from_secs(30));
    let store = InMemoryDiagramStore::new();
    store.insert("d1");

    // A joins and takes the lock on E1
    let (a, _arx) = connect(&router, "user-a").await;
    router.dispatch(a, join("d1"), &store).await;
    let outbound = router.dispatch(a, lock("d1", "e1"), &store).await;
    assert!(matches!(outbound[0].1, ServerMessage::LockGranted(_)));

    // A can edit E1
    let outbound = router.dispatch(a, update("d1", "e1"), &store).await;
    assert!(matches!(outbound[0].1, ServerMessage::ElementUpdatedConfirm(_)));

    // B joins and receives the lock snapshot naming A
    let (b, _brx) = connect(&router, "user-b").await;
    let outbound = router.dispatch(b, join("d1"), &store).await;
    let snapshot = sent_to(&outbound, b)
        .into_iter()
        .find_map(|message| match message {
            ServerMessage::LockedElements(m) => Some(m.locks.clone()),
            _ => None,
        })
        .expect("joining session receives a lock snapshot");
    assert_eq!(snapshot.get("e1").unwrap().locked_by, "user-a");

    // B's edit of E1 is refused with a conflict naming A
    let outbound = router.dispatch(b, update("d1", "e1"), &store).await;
    assert!(matches!(
        &outbound[0].1,
        ServerMessage::Error(m) if m.locked_by.as_deref() == Some("user-a")
    ));

    // A releases; B's retry succeeds
    let outbound = router.dispatch(a, unlock("d1", "e1"), &store).await;
    assert!(matches!(outbound[0].1, ServerMessage::LockReleased(_)));
    assert!(sent_to(&outbound, b).iter().any(|m| matches!(
        m,
        ServerMessage::ElementUnlocked(m) if m.reason == UnlockReason::Explicit
    )));

    let outbound = router.dispatch(b, update("d1", "e1"), &store).await;
    assert!(matches!(outbound[0].1, ServerMessage::ElementUpdatedConfirm(_)));
}

#[tokio::test]
async fn abandoned_locks_are_released_on_disconnect() {
    let router = EventRouter::new(Duration::from_secs(30));
    let store = InMemoryDiagramStore::new();
    store.insert("d1");

    let (a, _arx) = connect(&router, "user-a").await;
    let (b, _brx) = connect(&router, "user-b").await;
    router.dispatch(a, join("d1"), &store).await;
    router.dispatch(b, join("d1"), &store).await;
    router.dispatch(a, lock("d1", "e1"), &store).await;

    // A drops without an explicit unlock
    let outbound = router.disconnect(a).await;
    assert!(sent_to(&outbound, b).iter().any(|m| matches!(
        m,
        ServerMessage::ElementUnlocked(m)
            if m.element_id == "e1" && m.reason == UnlockReason::UserDeparted
    )));
    assert_eq!(router.stats().await.n_locks, 0);
}

#[tokio::test]
async fn stalled_locks_expire_through_the_sweep() {
    let router = EventRouter::new(Duration::ZERO);
    let store = InMemoryDiagramStore::new();
    store.insert("d1");

    let (a, _arx) = connect(&router, "user-a").await;
    let (b, _brx) = connect(&router, "user-b").await;
    router.dispatch(a, join("d1"), &store).await;
    router.dispatch(b, join("d1"), &store).await;
    router.dispatch(a, lock("d1", "e1"), &store).await;

    // A stalls: no release, no disconnect
    tokio::time::sleep(Duration::from_millis(5)).await;
    let outbound = router.sweep_expired_locks().await;

    for conn in [a, b] {
        let unlocks: Vec<_> = sent_to(&outbound, conn)
            .into_iter()
            .filter(|m| matches!(
                m,
                ServerMessage::ElementUnlocked(m)
                    if m.element_id == "e1" && m.reason == UnlockReason::Timeout
            ))
            .collect();
        assert_eq!(unlocks.len(), 1, "exactly one notification per member");
    }
    assert_eq!(router.stats().await.n_locks, 0);

    // a second sweep has nothing left to expire
    assert!(router.sweep_expired_locks().await.is_empty());
}

#[tokio::test]
async fn rosters_converge_after_every_membership_change() {
    let router = EventRouter::new(Duration::from_secs(30));
    let store = InMemoryDiagramStore::new();
    store.insert("d1");

    let (a, _arx) = connect(&router, "user-a").await;
    let (b, _brx) = connect(&router, "user-b").await;
    let (c, _crx) = connect(&router, "user-c").await;

    let outbound = router.dispatch(a, join("d1"), &store).await;
    assert_eq!(last_roster(&outbound, a).unwrap(), vec!["user-a"]);

    let outbound = router.dispatch(b, join("d1"), &store).await;
    for conn in [a, b] {
        let mut roster = last_roster(&outbound, conn).unwrap();
        roster.sort();
        assert_eq!(roster, vec!["user-a", "user-b"]);
    }

    let outbound = router.dispatch(c, join("d1"), &store).await;
    for conn in [a, b, c] {
        let mut roster = last_roster(&outbound, conn).unwrap();
        roster.sort();
        assert_eq!(roster, vec!["user-a", "user-b", "user-c"]);
    }

    let outbound = router.dispatch(b, leave("d1"), &store).await;
    for conn in [a, c] {
        let mut roster = last_roster(&outbound, conn).unwrap();
        roster.sort();
        assert_eq!(roster, vec!["user-a", "user-c"]);
    }
    // the leaver gets its ack, not a roster
    assert!(sent_to(&outbound, b)
        .iter()
        .any(|m| matches!(m, ServerMessage::Left(_))));
}

#[tokio::test]
async fn leave_clears_all_of_the_users_locks_in_the_diagram() {
    let router = EventRouter::new(Duration::from_secs(30));
    let store = InMemoryDiagramStore::new();
    store.insert("d1");

    let (a, _arx) = connect(&router, "user-a").await;
    let (b, _brx) = connect(&router, "user-b").await;
    router.dispatch(a, join("d1"), &store).await;
    router.dispatch(b, join("d1"), &store).await;
    router.dispatch(a, lock("d1", "e1"), &store).await;
    router.dispatch(a, lock("d1", "e2"), &store).await;
    router.dispatch(b, lock("d1", "e3"), &store).await;

    let outbound = router.dispatch(a, leave("d1"), &store).await;
    let departed: Vec<_> = sent_to(&outbound, b)
        .into_iter()
        .filter(|m| matches!(
            m,
            ServerMessage::ElementUnlocked(m) if m.reason == UnlockReason::UserDeparted
        ))
        .collect();
    assert_eq!(departed.len(), 2);

    // B's own lock is untouched
    assert_eq!(router.stats().await.n_locks, 1);
}

#[tokio::test]
async fn cursor_updates_never_produce_error_replies() {
    let router = EventRouter::new(Duration::from_secs(30));
    let store = InMemoryDiagramStore::new();
    store.insert("d1");

    let (a, _arx) = connect(&router, "user-a").await;

    // not joined anywhere: the event is swallowed, no error goes back
    let outbound = router
        .dispatch(
            a,
            ClientMessage::CursorMove(CursorMoveMessage {
                diagram_id: "d1".to_string(),
                position: CursorPoint { x: 1.0, y: 1.0 },
            }),
            &store,
        )
        .await;
    assert!(outbound.is_empty());
}
