//! Role catalogue, night action kinds and default deals
//!
//! Roles are assigned once when a lobby starts. Only the Thief can change a
//! role afterwards (night 1).

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Rejection;
use crate::game::{PlayerId, SubPhase};

/// Which side a role wins with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Village,
    Pack,
}

/// The closed role set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Villager,
    /// Pack member, votes in the nightly consensus
    Werewolf,
    /// Pack member that may also devour a fellow pack member on even nights
    LoneWolf,
    /// Night 1: takes a player's role, the victim becomes a Villager
    Thief,
    /// Night 1: binds two players into a bonded pair
    Cupid,
    /// Puts a player to sleep; their effects this night are void
    Sandman,
    /// Redirects kills aimed at one player onto another
    Trickster,
    /// Protects one player per night, never the same one twice in a row
    Guardian,
    /// One life potion, one death potion
    Witch,
    /// Learns one role per night
    Seer,
    /// Adds two votes against a player at the next day vote
    Raven,
    /// Strips a player's vote for the next day
    Silencer,
    /// Takes a revenge shot on death
    Hunter,
    /// Survives the first lethal event
    Elder,
    /// Survives the village vote once revealed, but loses the vote
    Idiot,
}

impl Role {
    pub fn faction(self) -> Faction {
        match self {
            Role::Werewolf | Role::LoneWolf => Faction::Pack,
            _ => Faction::Village,
        }
    }

    /// Adversary faction membership
    pub fn is_adversary(self) -> bool {
        self.faction() == Faction::Pack
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Villager => "villager",
            Role::Werewolf => "werewolf",
            Role::LoneWolf => "lone_wolf",
            Role::Thief => "thief",
            Role::Cupid => "cupid",
            Role::Sandman => "sandman",
            Role::Trickster => "trickster",
            Role::Guardian => "guardian",
            Role::Witch => "witch",
            Role::Seer => "seer",
            Role::Raven => "raven",
            Role::Silencer => "silencer",
            Role::Hunter => "hunter",
            Role::Elder => "elder",
            Role::Idiot => "idiot",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot items that exist once per game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consumable {
    LifePotion,
    DeathPotion,
}

impl Consumable {
    pub fn as_str(self) -> &'static str {
        match self {
            Consumable::LifePotion => "life_potion",
            Consumable::DeathPotion => "death_potion",
        }
    }
}

/// Night action kinds submitted by individual players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Steal,
    Bind,
    Sleep,
    Redirect,
    Protect,
    Devour,
    Heal,
    Poison,
    Inspect,
    Curse,
    Silence,
    /// Explicit skip for the current sub-phase
    Pass,
}

impl ActionKind {
    /// The sub-phase this kind belongs to. `Pass` applies to whichever
    /// sub-phase is live.
    pub fn sub_phase(self) -> Option<SubPhase> {
        match self {
            ActionKind::Steal => Some(SubPhase::Thief),
            ActionKind::Bind => Some(SubPhase::Cupid),
            ActionKind::Sleep => Some(SubPhase::Sandman),
            ActionKind::Redirect => Some(SubPhase::Trickster),
            ActionKind::Protect => Some(SubPhase::Guardian),
            ActionKind::Devour => Some(SubPhase::LoneWolf),
            ActionKind::Heal | ActionKind::Poison => Some(SubPhase::Witch),
            ActionKind::Inspect => Some(SubPhase::Seer),
            ActionKind::Curse => Some(SubPhase::Raven),
            ActionKind::Silence => Some(SubPhase::Silencer),
            ActionKind::Pass => None,
        }
    }

    /// Consumable spent by this action, if any
    pub fn consumable(self) -> Option<Consumable> {
        match self {
            ActionKind::Heal => Some(Consumable::LifePotion),
            ActionKind::Poison => Some(Consumable::DeathPotion),
            _ => None,
        }
    }

    /// Whether the action expects a pair of players
    pub fn takes_pair(self) -> bool {
        matches!(self, ActionKind::Bind | ActionKind::Redirect)
    }

    /// Claim label; passes are scoped to the sub-phase they skip
    pub fn claim_label(self, live: SubPhase) -> String {
        match self {
            ActionKind::Pass => format!("pass_{}", live.as_str()),
            other => other.as_str().to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Steal => "steal",
            ActionKind::Bind => "bind",
            ActionKind::Sleep => "sleep",
            ActionKind::Redirect => "redirect",
            ActionKind::Protect => "protect",
            ActionKind::Devour => "devour",
            ActionKind::Heal => "heal",
            ActionKind::Poison => "poison",
            ActionKind::Inspect => "inspect",
            ActionKind::Curse => "curse",
            ActionKind::Silence => "silence",
            ActionKind::Pass => "pass",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target payload of a night action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    None,
    Player(PlayerId),
    Pair(PlayerId, PlayerId),
}

impl ActionTarget {
    pub fn player(&self) -> Option<&PlayerId> {
        match self {
            ActionTarget::Player(id) => Some(id),
            _ => None,
        }
    }

    pub fn pair(&self) -> Option<(&PlayerId, &PlayerId)> {
        match self {
            ActionTarget::Pair(a, b) => Some((a, b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionTarget::None => write!(f, "-"),
            ActionTarget::Player(id) => write!(f, "{}", id),
            ActionTarget::Pair(a, b) => write!(f, "{}+{}", a, b),
        }
    }
}

/// Roles added on top of the pack, in order, while seats remain
const SPECIAL_ORDER: &[Role] = &[
    Role::Seer,
    Role::Witch,
    Role::Guardian,
    Role::Hunter,
    Role::Cupid,
    Role::Elder,
    Role::Idiot,
];

/// Default composition for `players` seats: a quarter pack (at least one),
/// then the special roles, the rest villagers.
pub fn default_composition(players: usize) -> Vec<Role> {
    let pack = (players / 4).max(1);
    let mut roles = vec![Role::Werewolf; pack.min(players)];

    for role in SPECIAL_ORDER {
        if roles.len() >= players {
            break;
        }
        roles.push(*role);
    }
    while roles.len() < players {
        roles.push(Role::Villager);
    }
    roles
}

/// Check a role list against the seat count. Both factions must be present.
pub fn validate_composition(players: usize, roles: &[Role]) -> Result<(), Rejection> {
    if roles.len() != players {
        return Err(Rejection::RoleCountMismatch {
            players,
            roles: roles.len(),
        });
    }
    let adversaries = roles.iter().filter(|r| r.is_adversary()).count();
    if adversaries == 0 || adversaries == roles.len() {
        return Err(Rejection::InvalidComposition(
            "both factions must be dealt".to_string(),
        ));
    }
    Ok(())
}

/// Shuffle `roles` onto `seats` (id, display name), preserving seat order
pub fn deal<R: Rng + ?Sized>(
    seats: &[(PlayerId, String)],
    roles: &[Role],
    rng: &mut R,
) -> Result<Vec<(PlayerId, String, Role)>, Rejection> {
    validate_composition(seats.len(), roles)?;

    let mut deck = roles.to_vec();
    deck.shuffle(rng);

    Ok(seats
        .iter()
        .cloned()
        .zip(deck)
        .map(|((id, name), role)| (id, name, role))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_composition_sizes() {
        let five = default_composition(5);
        assert_eq!(five.len(), 5);
        assert_eq!(five.iter().filter(|r| r.is_adversary()).count(), 1);
        assert_eq!(five[1], Role::Seer);

        let twelve = default_composition(12);
        assert_eq!(twelve.iter().filter(|r| r.is_adversary()).count(), 3);
        assert!(twelve.contains(&Role::Idiot));
        assert_eq!(twelve.iter().filter(|r| **r == Role::Villager).count(), 2);
    }

    #[test]
    fn test_composition_needs_both_factions() {
        let err = validate_composition(2, &[Role::Villager, Role::Seer]).unwrap_err();
        assert!(matches!(err, Rejection::InvalidComposition(_)));

        let err = validate_composition(3, &[Role::Werewolf]).unwrap_err();
        assert!(matches!(err, Rejection::RoleCountMismatch { .. }));
    }

    #[test]
    fn test_deal_is_seeded() {
        let seats: Vec<(PlayerId, String)> = (0..6)
            .map(|i| (format!("p{}", i), format!("Player {}", i)))
            .collect();
        let roles = default_composition(6);

        let a = deal(&seats, &roles, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = deal(&seats, &roles, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].0, "p0");

        let mut dealt: Vec<Role> = a.iter().map(|(_, _, r)| *r).collect();
        let mut expected = roles.clone();
        dealt.sort();
        expected.sort();
        assert_eq!(dealt, expected);
    }

    #[test]
    fn test_pass_label_scoped_to_sub_phase() {
        assert_eq!(
            ActionKind::Pass.claim_label(SubPhase::Witch),
            "pass_witch"
        );
        assert_eq!(ActionKind::Heal.claim_label(SubPhase::Witch), "heal");
        assert_eq!(ActionKind::Heal.consumable(), Some(Consumable::LifePotion));
    }
}
