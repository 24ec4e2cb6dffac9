use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::models::LockInfo;

/// An exclusive edit claim on one diagram element.
#[derive(Debug, Clone)]
pub struct ElementLock {
    pub element_id: String,
    pub diagram_id: String,
    pub holder: String,
    pub acquired_at: Instant,
    pub acquired_wall: DateTime<Utc>,
}

#[derive(Debug)]
pub enum AcquireOutcome {
    Granted {
        /// true when the holder already owned the lock and only the
        /// timestamp was refreshed
        renewed: bool,
        locked_at: DateTime<Utc>,
    },
    Conflict {
        holder: String,
    },
}

#[derive(Debug, PartialEq)]
pub enum ReleaseError {
    NotHeld,
    HeldByOther(String),
}

/// All live element locks, keyed by element id. At most one lock exists per
/// element at any time.
#[derive(Default)]
pub struct LockTable {
    locks: HashMap<String, ElementLock>,
}

impl LockTable {
    /// Acquire or renew the lock on an element. A request by the current
    /// holder refreshes the acquisition time and reports `renewed`.
    pub fn acquire(
        &mut self,
        user_id: &str,
        diagram_id: &str,
        element_id: &str,
        now: Instant,
    ) -> AcquireOutcome {
        if let Some(existing) = self.locks.get_mut(element_id) {
            if existing.holder != user_id {
                return AcquireOutcome::Conflict {
                    holder: existing.holder.clone(),
                };
            }
            existing.acquired_at = now;
            existing.acquired_wall = Utc::now();
            return AcquireOutcome::Granted {
                renewed: true,
                locked_at: existing.acquired_wall,
            };
        }

        let locked_at = Utc::now();
        self.locks.insert(
            element_id.to_string(),
            ElementLock {
                element_id: element_id.to_string(),
                diagram_id: diagram_id.to_string(),
                holder: user_id.to_string(),
                acquired_at: now,
                acquired_wall: locked_at,
            },
        );
        AcquireOutcome::Granted {
            renewed: false,
            locked_at,
        }
    }

    /// Release a lock held by `user_id`. A lock held by someone else, or no
    /// lock at all, is an error: locks are never released on behalf of
    /// another user.
    pub fn release(&mut self, user_id: &str, element_id: &str) -> Result<ElementLock, ReleaseError> {
        match self.locks.get(element_id) {
            None => Err(ReleaseError::NotHeld),
            Some(lock) if lock.holder != user_id => {
                Err(ReleaseError::HeldByOther(lock.holder.clone()))
            }
            Some(_) => Ok(self.locks.remove(element_id).unwrap()),
        }
    }

    /// Release every lock `user_id` holds in `diagram_id`. Used when a user
    /// leaves or disconnects so no lock is ever orphaned.
    pub fn release_all_for(&mut self, user_id: &str, diagram_id: &str) -> Vec<ElementLock> {
        let element_ids: Vec<String> = self
            .locks
            .values()
            .filter(|lock| lock.holder == user_id && lock.diagram_id == diagram_id)
            .map(|lock| lock.element_id.clone())
            .collect();

        element_ids
            .into_iter()
            .filter_map(|element_id| self.locks.remove(&element_id))
            .collect()
    }

    /// Delete every lock older than `timeout` and return them.
    pub fn sweep_expired(&mut self, timeout: Duration, now: Instant) -> Vec<ElementLock> {
        let expired_ids: Vec<String> = self
            .locks
            .values()
            .filter(|lock| now.duration_since(lock.acquired_at) > timeout)
            .map(|lock| lock.element_id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|element_id| self.locks.remove(&element_id))
            .collect()
    }

    pub fn get(&self, element_id: &str) -> Option<&ElementLock> {
        self.locks.get(element_id)
    }

    pub fn remove(&mut self, element_id: &str) -> Option<ElementLock> {
        self.locks.remove(element_id)
    }

    /// Current locks of one diagram, in the shape sent to a joining session.
    pub fn snapshot_for(&self, diagram_id: &str) -> HashMap<String, LockInfo> {
        self.locks
            .values()
            .filter(|lock| lock.diagram_id == diagram_id)
            .map(|lock| {
                (
                    lock.element_id.clone(),
                    LockInfo {
                        locked_by: lock.holder.clone(),
                        locked_at: lock.acquired_wall,
                    },
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
