use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A user as shown to other members of a diagram room.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// 2D pointer position on the diagram canvas.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CursorPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DiagramRef {
    pub diagram_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
    pub diagram_id: String,
    pub element_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementAddMessage {
    pub diagram_id: String,
    pub element: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementUpdateMessage {
    pub diagram_id: String,
    pub element_id: String,
    pub changes: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorMoveMessage {
    pub diagram_id: String,
    pub position: CursorPoint,
}

/// Every event a client may send over the collaboration socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "diagram:join")]
    Join(DiagramRef),
    #[serde(rename = "diagram:leave")]
    Leave(DiagramRef),
    #[serde(rename = "diagram:element:add")]
    ElementAdd(ElementAddMessage),
    #[serde(rename = "diagram:element:update")]
    ElementUpdate(ElementUpdateMessage),
    #[serde(rename = "diagram:element:delete")]
    ElementDelete(ElementRef),
    #[serde(rename = "element:lock")]
    Lock(ElementRef),
    #[serde(rename = "element:unlock")]
    Unlock(ElementRef),
    #[serde(rename = "cursor:move")]
    CursorMove(CursorMoveMessage),
    #[serde(rename = "ping")]
    Ping,
}

/// Why a lock disappeared.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    Explicit,
    UserDeparted,
    Timeout,
}

/// Lock entry as carried in the `lockedElements` snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMessage {
    pub diagram_id: String,
    pub users: Vec<PresenceUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UsersUpdatedMessage {
    pub users: Vec<PresenceUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserEventMessage {
    pub user: PresenceUser,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LockedElementsMessage {
    pub locks: HashMap<String, LockInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LockGrantedMessage {
    pub element_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LockFailedMessage {
    pub element_id: String,
    pub locked_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementLockedMessage {
    pub element_id: String,
    pub locked_by: String,
    pub user: PresenceUser,
    pub locked_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementUnlockedMessage {
    pub element_id: String,
    pub unlocked_by: String,
    pub reason: UnlockReason,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementAddedMessage {
    pub element: Value,
    pub user: PresenceUser,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementUpdatedMessage {
    pub element_id: String,
    pub changes: Value,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub user: PresenceUser,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementDeletedMessage {
    pub element_id: String,
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementConfirmMessage {
    pub element_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorMovedMessage {
    pub user_id: String,
    pub username: String,
    pub position: CursorPoint,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
}

/// Every event the server may push over the collaboration socket.
///
/// Acknowledgements go only to the originating connection; the remaining
/// variants are room broadcasts.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "joined")]
    Joined(JoinedMessage),
    #[serde(rename = "left")]
    Left(DiagramRef),
    #[serde(rename = "usersUpdated")]
    UsersUpdated(UsersUpdatedMessage),
    #[serde(rename = "userJoined")]
    UserJoined(UserEventMessage),
    #[serde(rename = "userLeft")]
    UserLeft(UserEventMessage),
    #[serde(rename = "lockedElements")]
    LockedElements(LockedElementsMessage),
    #[serde(rename = "lockGranted")]
    LockGranted(LockGrantedMessage),
    #[serde(rename = "lockFailed")]
    LockFailed(LockFailedMessage),
    #[serde(rename = "lockReleased")]
    LockReleased(LockGrantedMessage),
    #[serde(rename = "elementLocked")]
    ElementLocked(ElementLockedMessage),
    #[serde(rename = "elementUnlocked")]
    ElementUnlocked(ElementUnlockedMessage),
    #[serde(rename = "elementAdded")]
    ElementAdded(ElementAddedMessage),
    #[serde(rename = "elementAddedConfirm")]
    ElementAddedConfirm(ElementConfirmMessage),
    #[serde(rename = "elementUpdated")]
    ElementUpdated(ElementUpdatedMessage),
    #[serde(rename = "elementUpdatedConfirm")]
    ElementUpdatedConfirm(ElementConfirmMessage),
    #[serde(rename = "elementDeleted")]
    ElementDeleted(ElementDeletedMessage),
    #[serde(rename = "elementDeletedConfirm")]
    ElementDeletedConfirm(ElementConfirmMessage),
    #[serde(rename = "cursorMoved")]
    CursorMoved(CursorMovedMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}
