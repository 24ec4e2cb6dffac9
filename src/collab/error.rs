use thiserror::Error;

use crate::models::ErrorMessage;

/// Everything that can go wrong while handling a session event. Each value
/// is converted into a private `error` reply to the offending connection;
/// nothing here ever reaches other connections.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("not joined to diagram {0}")]
    NotJoined(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("element {element_id} is locked by another user")]
    LockConflict { element_id: String, holder: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CollabError {
    pub fn to_error_message(&self) -> ErrorMessage {
        match self {
            CollabError::LockConflict { element_id, holder } => ErrorMessage {
                message: self.to_string(),
                element_id: Some(element_id.clone()),
                locked_by: Some(holder.clone()),
            },
            other => ErrorMessage {
                message: other.to_string(),
                element_id: None,
                locked_by: None,
            },
        }
    }
}
