//! Live sessions, one mutex per room

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::game::{Game, RoomId};

/// Exclusive handle on one session's aggregate
pub type SessionHandle = Arc<Mutex<Game>>;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<RoomId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, room_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(room_id).cloned()
    }

    /// Register `game`, replacing any previous session for the room
    pub async fn insert(&self, game: Game) -> SessionHandle {
        let handle = Arc::new(Mutex::new(game));
        let room = handle.lock().await.room_id.clone();
        self.sessions.write().await.insert(room, handle.clone());
        handle
    }

    pub async fn remove(&self, room_id: &str) -> Option<SessionHandle> {
        self.sessions.write().await.remove(room_id)
    }

    /// Remove the room's session only if it is still `handle`
    pub async fn remove_handle(&self, room_id: &str, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(room_id) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                sessions.remove(room_id);
                true
            }
            _ => false,
        }
    }

    pub async fn rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.sessions.read().await.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PhasePlan;

    #[tokio::test]
    async fn test_insert_replace_remove() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty().await);

        let first = registry
            .insert(Game::new("room", Vec::new(), PhasePlan::for_roles(&[])))
            .await;
        let second = registry
            .insert(Game::new("room", Vec::new(), PhasePlan::for_roles(&[])))
            .await;
        assert_eq!(registry.len().await, 1);

        let live = registry.get("room").await.unwrap();
        assert!(Arc::ptr_eq(&live, &second));
        assert!(!Arc::ptr_eq(&live, &first));

        // A stale handle no longer owns the room
        assert!(!registry.remove_handle("room", &first).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("room").await.is_some());
        assert!(registry.get("room").await.is_none());
    }
}
