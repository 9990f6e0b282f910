//! Live room directory consulted during recovery

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;

/// Whether a chat room still exists on the platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn room_exists(&self, room_id: &str) -> bool;
}

/// Directory backed by a set of known rooms
#[derive(Debug, Default)]
pub struct InMemoryRooms {
    rooms: RwLock<HashSet<String>>,
}

impl InMemoryRooms {
    pub fn new<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rooms: RwLock::new(rooms.into_iter().map(Into::into).collect()),
        }
    }

    pub fn insert(&self, room_id: impl Into<String>) {
        if let Ok(mut rooms) = self.rooms.write() {
            rooms.insert(room_id.into());
        }
    }

    pub fn remove(&self, room_id: &str) {
        if let Ok(mut rooms) = self.rooms.write() {
            rooms.remove(room_id);
        }
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRooms {
    async fn room_exists(&self, room_id: &str) -> bool {
        self.rooms
            .read()
            .map(|rooms| rooms.contains(room_id))
            .unwrap_or(false)
    }
}

/// Treats every room as live
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyRoom;

#[async_trait]
impl RoomDirectory for AnyRoom {
    async fn room_exists(&self, _room_id: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_rooms() {
        let rooms = InMemoryRooms::new(["a", "b"]);
        assert!(rooms.room_exists("a").await);
        rooms.remove("a");
        assert!(!rooms.room_exists("a").await);
        rooms.insert("c");
        assert!(rooms.room_exists("c").await);
        assert!(AnyRoom.room_exists("zzz").await);
    }
}
