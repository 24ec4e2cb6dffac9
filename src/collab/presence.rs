use std::collections::{HashMap, HashSet};

/// Which users are currently present in which diagram. Membership is keyed
/// by user id, so a user never appears twice in a roster no matter how many
/// connections they hold.
#[derive(Default)]
pub struct PresenceRegistry {
    rooms: HashMap<String, HashSet<String>>,
}

impl PresenceRegistry {
    /// Add a user to a diagram's room, creating the room on first join.
    /// Returns true if the user was not already present.
    pub fn join(&mut self, diagram_id: &str, user_id: &str) -> bool {
        self.rooms
            .entry(diagram_id.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    /// Remove a user from a diagram's room. The room entry itself is
    /// dropped once its member set empties, so idle rooms are never leaked.
    /// Returns true if the user was present.
    pub fn leave(&mut self, diagram_id: &str, user_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(diagram_id) else {
            return false;
        };
        let removed = members.remove(user_id);
        if members.is_empty() {
            self.rooms.remove(diagram_id);
        }
        removed
    }

    pub fn contains(&self, diagram_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(diagram_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false)
    }

    pub fn members(&self, diagram_id: &str) -> Vec<String> {
        self.rooms
            .get(diagram_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
