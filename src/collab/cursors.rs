use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::CursorPoint;

/// Last reported pointer position of one user.
#[derive(Debug, Clone)]
pub struct CursorPosition {
    pub user_id: String,
    pub diagram_id: String,
    pub position: CursorPoint,
    pub updated_at: DateTime<Utc>,
}

/// Last-write-wins cursor positions per connected user. No conflict logic:
/// every move overwrites whatever was there.
#[derive(Default)]
pub struct CursorTracker {
    cursors: HashMap<String, CursorPosition>,
}

impl CursorTracker {
    pub fn update(&mut self, user_id: &str, diagram_id: &str, position: CursorPoint) -> DateTime<Utc> {
        let updated_at = Utc::now();
        self.cursors.insert(
            user_id.to_string(),
            CursorPosition {
                user_id: user_id.to_string(),
                diagram_id: diagram_id.to_string(),
                position,
                updated_at,
            },
        );
        updated_at
    }

    pub fn remove(&mut self, user_id: &str) {
        self.cursors.remove(user_id);
    }

    pub fn get(&self, user_id: &str) -> Option<&CursorPosition> {
        self.cursors.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }
}
