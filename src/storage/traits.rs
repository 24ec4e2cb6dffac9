//! Trait seams for the two external collaborators the session engine
//! depends on: identity resolution and diagram storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A user as resolved by the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Resolves an authenticated user id to its user record.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<UserRecord, StorageError>;
}

/// Read access to diagram storage. The engine only ever asks whether a
/// diagram exists and is accessible; everything else lives with the
/// CRUD API that owns the data.
#[async_trait]
pub trait DiagramStore: Send + Sync {
    async fn diagram_exists(&self, diagram_id: &str) -> Result<bool, StorageError>;
}
