//! In-memory collaborator backends, used when no database or identity
//! service is configured and by the test suite.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::traits::{DiagramStore, IdentityProvider, StorageError, UserRecord};

/// Identity provider backed by a fixed user map.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        self.users.lock().unwrap().insert(user.id.clone(), user);
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn get_user(&self, user_id: &str) -> Result<UserRecord, StorageError> {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

/// Diagram store backed by a set of known diagram ids. With `allow_all`
/// every id passes the existence check, which is how the server runs
/// when no database is configured.
pub struct InMemoryDiagramStore {
    diagrams: Mutex<HashSet<String>>,
    allow_all: bool,
}

impl InMemoryDiagramStore {
    pub fn new() -> Self {
        Self {
            diagrams: Mutex::new(HashSet::new()),
            allow_all: false,
        }
    }

    pub fn allow_all() -> Self {
        Self {
            diagrams: Mutex::new(HashSet::new()),
            allow_all: true,
        }
    }

    pub fn insert(&self, diagram_id: impl Into<String>) {
        self.diagrams.lock().unwrap().insert(diagram_id.into());
    }
}

impl Default for InMemoryDiagramStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiagramStore for InMemoryDiagramStore {
    async fn diagram_exists(&self, diagram_id: &str) -> Result<bool, StorageError> {
        if self.allow_all {
            return Ok(true);
        }
        Ok(self.diagrams.lock().unwrap().contains(diagram_id))
    }
}
