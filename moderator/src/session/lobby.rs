//! Pre-game lobbies: players gather before roles are dealt

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Rejection;
use crate::game::{PlayerId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyOptions {
    pub min_players: usize,
    pub max_players: usize,
}

impl Default for LobbyOptions {
    fn default() -> Self {
        Self {
            min_players: 5,
            max_players: 18,
        }
    }
}

impl LobbyOptions {
    pub fn validate(&self) -> Result<(), Rejection> {
        if self.min_players < 3 {
            return Err(Rejection::InvalidLobbyOptions(format!(
                "min_players must be at least 3, got {}",
                self.min_players
            )));
        }
        if self.max_players < self.min_players {
            return Err(Rejection::InvalidLobbyOptions(format!(
                "max_players {} is below min_players {}",
                self.max_players, self.min_players
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lobby {
    pub room_id: RoomId,
    pub options: LobbyOptions,
    /// Seated players in join order
    pub seats: Vec<(PlayerId, String)>,
    pub created_at: DateTime<Utc>,
}

impl Lobby {
    pub fn is_seated(&self, player_id: &str) -> bool {
        self.seats.iter().any(|(id, _)| id == player_id)
    }

    pub fn ready(&self) -> Result<(), Rejection> {
        if self.seats.len() < self.options.min_players {
            return Err(Rejection::NotEnoughPlayers {
                have: self.seats.len(),
                need: self.options.min_players,
            });
        }
        Ok(())
    }
}

/// Open lobbies by room
#[derive(Debug, Default)]
pub struct LobbyBoard {
    lobbies: Mutex<HashMap<RoomId, Lobby>>,
}

impl LobbyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a lobby; false when one is already open for the room
    pub fn open(&self, room_id: &str, options: LobbyOptions) -> Result<bool, Rejection> {
        options.validate()?;
        let mut lobbies = self.lobbies.lock().unwrap_or_else(PoisonError::into_inner);
        if lobbies.contains_key(room_id) {
            return Ok(false);
        }
        lobbies.insert(
            room_id.to_string(),
            Lobby {
                room_id: room_id.to_string(),
                options,
                seats: Vec::new(),
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Seat a player; returns the number seated
    pub fn join(&self, room_id: &str, player_id: &str, name: &str) -> Result<usize, Rejection> {
        let mut lobbies = self.lobbies.lock().unwrap_or_else(PoisonError::into_inner);
        let lobby = lobbies.get_mut(room_id).ok_or(Rejection::NoLobby)?;
        if lobby.is_seated(player_id) {
            return Err(Rejection::AlreadyJoined(player_id.to_string()));
        }
        if lobby.seats.len() >= lobby.options.max_players {
            return Err(Rejection::LobbyFull(lobby.options.max_players));
        }
        lobby.seats.push((player_id.to_string(), name.to_string()));
        Ok(lobby.seats.len())
    }

    pub fn leave(&self, room_id: &str, player_id: &str) -> Result<usize, Rejection> {
        let mut lobbies = self.lobbies.lock().unwrap_or_else(PoisonError::into_inner);
        let lobby = lobbies.get_mut(room_id).ok_or(Rejection::NoLobby)?;
        let before = lobby.seats.len();
        lobby.seats.retain(|(id, _)| id != player_id);
        if lobby.seats.len() == before {
            return Err(Rejection::NotInLobby(player_id.to_string()));
        }
        Ok(lobby.seats.len())
    }

    pub fn get(&self, room_id: &str) -> Option<Lobby> {
        self.lobbies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned()
    }

    /// Take a ready lobby off the board. A lobby short of players stays open.
    pub fn take_ready(&self, room_id: &str) -> Result<Lobby, Rejection> {
        let mut lobbies = self.lobbies.lock().unwrap_or_else(PoisonError::into_inner);
        lobbies.get(room_id).ok_or(Rejection::NoLobby)?.ready()?;
        lobbies.remove(room_id).ok_or(Rejection::NoLobby)
    }

    /// Put back a lobby whose start failed, unless the room reopened meanwhile
    pub fn restore(&self, lobby: Lobby) {
        self.lobbies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(lobby.room_id.clone())
            .or_insert(lobby);
    }

    pub fn remove(&self, room_id: &str) -> Option<Lobby> {
        self.lobbies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.lobbies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> LobbyOptions {
        LobbyOptions {
            min_players: 3,
            max_players: 4,
        }
    }

    #[test]
    fn test_join_leave_and_limits() {
        let board = LobbyBoard::new();
        assert!(board.open("r", small()).unwrap());
        assert!(!board.open("r", small()).unwrap());

        assert_eq!(board.join("r", "a", "Ann").unwrap(), 1);
        assert_eq!(board.join("r", "a", "Ann"), Err(Rejection::AlreadyJoined("a".into())));
        board.join("r", "b", "Bo").unwrap();
        assert!(matches!(
            board.get("r").unwrap().ready(),
            Err(Rejection::NotEnoughPlayers { have: 2, need: 3 })
        ));
        board.join("r", "c", "Cy").unwrap();
        board.join("r", "d", "Di").unwrap();
        assert_eq!(board.join("r", "e", "Ed"), Err(Rejection::LobbyFull(4)));

        assert_eq!(board.leave("r", "b").unwrap(), 3);
        assert_eq!(board.leave("r", "b"), Err(Rejection::NotInLobby("b".into())));
        assert!(board.get("r").unwrap().ready().is_ok());
        assert_eq!(board.join("x", "a", "Ann"), Err(Rejection::NoLobby));
    }

    #[test]
    fn test_take_ready_is_single_shot() {
        let board = LobbyBoard::new();
        board.open("r", small()).unwrap();
        board.join("r", "a", "Ann").unwrap();
        assert!(matches!(
            board.take_ready("r"),
            Err(Rejection::NotEnoughPlayers { have: 1, need: 3 })
        ));
        assert!(board.contains("r"));

        board.join("r", "b", "Bo").unwrap();
        board.join("r", "c", "Cy").unwrap();
        let lobby = board.take_ready("r").unwrap();
        assert_eq!(lobby.seats.len(), 3);
        assert_eq!(board.take_ready("r"), Err(Rejection::NoLobby));

        board.restore(lobby.clone());
        assert_eq!(board.get("r"), Some(lobby));
    }

    #[test]
    fn test_invalid_options() {
        let board = LobbyBoard::new();
        let bad = LobbyOptions {
            min_players: 6,
            max_players: 4,
        };
        assert!(matches!(
            board.open("r", bad),
            Err(Rejection::InvalidLobbyOptions(_))
        ));
        assert!(!board.contains("r"));
    }
}
