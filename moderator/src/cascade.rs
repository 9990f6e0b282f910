//! Breadth-first death cascade.
//!
//! Applies confirmed kills to the aggregate and follows their consequences:
//! extra lives, decoy reveals, bonded partners and revenge shots. Every
//! one-shot flag fires at most once and the queue always drains.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::{Game, PlayerId};
use crate::roles::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    Pack,
    LoneWolf,
    Poison,
    VillageVote,
    Heartbreak,
    Revenge,
}

impl DeathCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DeathCause::Pack => "pack",
            DeathCause::LoneWolf => "lone_wolf",
            DeathCause::Poison => "poison",
            DeathCause::VillageVote => "village_vote",
            DeathCause::Heartbreak => "heartbreak",
            DeathCause::Revenge => "revenge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Death {
    pub player_id: PlayerId,
    pub role: Role,
    pub cause: DeathCause,
}

/// A lethal event that did not kill
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spared {
    ExtraLife(PlayerId),
    DecoyRevealed(PlayerId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// In the order they happened
    pub deaths: Vec<Death>,
    pub spared: Vec<Spared>,
    /// Revenge shot holders queued for a last stand
    pub revenge: Vec<PlayerId>,
    pub captain_vacated: bool,
}

/// Apply `kills` and everything they trigger
pub fn apply_deaths<I>(game: &mut Game, kills: I) -> CascadeOutcome
where
    I: IntoIterator<Item = (PlayerId, DeathCause)>,
{
    let mut queue: VecDeque<(PlayerId, DeathCause)> = kills.into_iter().collect();
    let mut outcome = CascadeOutcome::default();

    while let Some((id, cause)) = queue.pop_front() {
        let Some(player) = game.player_mut(&id) else {
            continue;
        };
        if !player.alive {
            continue;
        }

        if player.role == Role::Elder && !player.extra_life_used && cause != DeathCause::Heartbreak
        {
            player.extra_life_used = true;
            debug!(player = %id, cause = cause.as_str(), "Extra life consumed");
            outcome.spared.push(Spared::ExtraLife(id));
            continue;
        }

        if player.role == Role::Idiot
            && cause == DeathCause::VillageVote
            && !player.was_revealed_as_decoy
        {
            player.was_revealed_as_decoy = true;
            player.can_vote = false;
            debug!(player = %id, "Decoy revealed");
            outcome.spared.push(Spared::DecoyRevealed(id));
            continue;
        }

        player.alive = false;
        let role = player.role;
        let takes_revenge = role == Role::Hunter && !player.has_used_revenge_shot;
        outcome.deaths.push(Death {
            player_id: id.clone(),
            role,
            cause,
        });

        for bond in game.lover_bonds.iter_mut().filter(|b| !b.consumed) {
            if let Some(partner) = bond.partner_of(&id).cloned() {
                bond.consumed = true;
                queue.push_back((partner, DeathCause::Heartbreak));
            }
        }

        if takes_revenge && !game.revenge_queue.contains(&id) {
            game.revenge_queue.push_back(id.clone());
            outcome.revenge.push(id.clone());
        }

        if game.captain_id.as_deref() == Some(id.as_str()) {
            game.captain_id = None;
            outcome.captain_vacated = true;
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{LoverBond, PhasePlan, Player};

    fn game(roles: &[Role]) -> Game {
        let players = roles
            .iter()
            .enumerate()
            .map(|(i, r)| Player::new(format!("p{}", i), format!("P{}", i), *r))
            .collect();
        Game::new("r", players, PhasePlan::for_roles(roles))
    }

    fn bond(g: &mut Game, a: &str, b: &str) {
        g.lover_bonds.push(LoverBond {
            first: a.into(),
            second: b.into(),
            consumed: false,
        });
    }

    #[test]
    fn test_bonded_pair_dies_together_once() {
        let mut g = game(&[Role::Werewolf, Role::Villager, Role::Seer, Role::Villager]);
        bond(&mut g, "p1", "p2");

        let out = apply_deaths(&mut g, vec![("p1".to_string(), DeathCause::Pack)]);
        assert_eq!(out.deaths.len(), 2);
        assert_eq!(out.deaths[1].cause, DeathCause::Heartbreak);
        assert!(g.lover_bonds[0].consumed);

        let again = apply_deaths(&mut g, vec![("p2".to_string(), DeathCause::Poison)]);
        assert!(again.deaths.is_empty());
    }

    #[test]
    fn test_extra_life_absorbs_first_kill_only() {
        let mut g = game(&[Role::Werewolf, Role::Elder, Role::Villager]);
        let first = apply_deaths(&mut g, vec![("p1".to_string(), DeathCause::Pack)]);
        assert_eq!(first.spared, vec![Spared::ExtraLife("p1".into())]);
        assert!(g.is_alive("p1"));

        let second = apply_deaths(&mut g, vec![("p1".to_string(), DeathCause::Pack)]);
        assert_eq!(second.deaths.len(), 1);
    }

    #[test]
    fn test_heartbreak_ignores_extra_life() {
        let mut g = game(&[Role::Werewolf, Role::Elder, Role::Villager, Role::Villager]);
        bond(&mut g, "p1", "p2");
        let out = apply_deaths(&mut g, vec![("p2".to_string(), DeathCause::VillageVote)]);
        assert_eq!(out.deaths.len(), 2);
        assert!(!g.is_alive("p1"));
    }

    #[test]
    fn test_decoy_survives_village_vote_once() {
        let mut g = game(&[Role::Werewolf, Role::Idiot, Role::Villager]);
        let out = apply_deaths(&mut g, vec![("p1".to_string(), DeathCause::VillageVote)]);
        assert_eq!(out.spared, vec![Spared::DecoyRevealed("p1".into())]);
        let p1 = g.player("p1").unwrap();
        assert!(p1.alive && !p1.can_vote);

        let night = apply_deaths(&mut g, vec![("p1".to_string(), DeathCause::Pack)]);
        assert_eq!(night.deaths.len(), 1);
    }

    #[test]
    fn test_hunter_queued_and_captain_vacated() {
        let mut g = game(&[Role::Werewolf, Role::Hunter, Role::Villager]);
        g.captain_id = Some("p1".into());
        let out = apply_deaths(&mut g, vec![("p1".to_string(), DeathCause::Pack)]);
        assert_eq!(out.revenge, vec!["p1".to_string()]);
        assert!(out.captain_vacated);
        assert_eq!(g.revenge_queue.len(), 1);
        assert!(g.captain_id.is_none());
    }
}
