//! Read-only projections handed to collaborators.
//!
//! A living player's role never leaves the engine through a snapshot. The
//! private view adds what one player is allowed to know about themselves.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Game, Phase, PlayerId, RoomId, SubPhase, Winner};
use crate::roles::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub display_name: String,
    pub alive: bool,
    pub is_captain: bool,
    pub in_love: bool,
    /// Only present once the player is dead
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub room_id: RoomId,
    pub game_id: Uuid,
    pub phase: Phase,
    pub sub_phase: SubPhase,
    pub day_count: u32,
    pub players: Vec<PlayerView>,
    pub dead_players: Vec<PlayerId>,
    pub winner: Option<Winner>,
}

impl GameSnapshot {
    pub fn of(game: &Game) -> Self {
        let players = game
            .players
            .iter()
            .map(|p| PlayerView {
                id: p.id.clone(),
                display_name: p.display_name.clone(),
                alive: p.alive,
                is_captain: game.captain_id.as_deref() == Some(p.id.as_str()),
                in_love: p.in_love,
                role: (!p.alive).then_some(p.role),
            })
            .collect();

        Self {
            room_id: game.room_id.clone(),
            game_id: game.game_id,
            phase: game.phase,
            sub_phase: game.sub_phase,
            day_count: game.day_count,
            players,
            dead_players: game
                .players
                .iter()
                .filter(|p| !p.alive)
                .map(|p| p.id.clone())
                .collect(),
            winner: game.winner,
        }
    }

    pub fn player(&self, id: &str) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// What one player may see about themselves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateView {
    pub snapshot: GameSnapshot,
    pub player_id: PlayerId,
    pub role: Role,
    pub lover: Option<PlayerId>,
    /// Other pack members, for pack members only
    pub pack_mates: Vec<PlayerId>,
}

impl PrivateView {
    pub fn of(game: &Game, player_id: &str) -> Option<Self> {
        let me = game.player(player_id)?;
        let lover = game
            .lover_bonds
            .iter()
            .find_map(|b| b.partner_of(player_id))
            .cloned();
        let pack_mates = if me.role.is_adversary() {
            game.players
                .iter()
                .filter(|p| p.id != me.id && p.role.is_adversary())
                .map(|p| p.id.clone())
                .collect()
        } else {
            Vec::new()
        };

        Some(Self {
            snapshot: GameSnapshot::of(game),
            player_id: me.id.clone(),
            role: me.role,
            lover,
            pack_mates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{LoverBond, PhasePlan, Player};

    fn sample() -> Game {
        let roles = [Role::Werewolf, Role::Seer, Role::Villager, Role::Werewolf];
        let players = roles
            .iter()
            .enumerate()
            .map(|(i, r)| Player::new(format!("p{}", i), format!("P{}", i), *r))
            .collect();
        let mut game = Game::new("room-1", players, PhasePlan::for_roles(&roles));
        game.player_mut("p1").unwrap().alive = false;
        game.captain_id = Some("p2".into());
        game
    }

    #[test]
    fn test_snapshot_hides_living_roles() {
        let snap = GameSnapshot::of(&sample());
        assert_eq!(snap.dead_players, vec!["p1".to_string()]);
        assert_eq!(snap.player("p1").unwrap().role, Some(Role::Seer));
        assert!(snap.players.iter().filter(|p| p.alive).all(|p| p.role.is_none()));
        assert!(snap.player("p2").unwrap().is_captain);

        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("werewolf"));
    }

    #[test]
    fn test_private_view() {
        let mut game = sample();
        game.lover_bonds.push(LoverBond {
            first: "p0".into(),
            second: "p2".into(),
            consumed: false,
        });

        let wolf = PrivateView::of(&game, "p0").unwrap();
        assert_eq!(wolf.role, Role::Werewolf);
        assert_eq!(wolf.lover.as_deref(), Some("p2"));
        assert_eq!(wolf.pack_mates, vec!["p3".to_string()]);

        let villager = PrivateView::of(&game, "p2").unwrap();
        assert!(villager.pack_mates.is_empty());
        assert!(PrivateView::of(&game, "nobody").is_none());
    }
}
