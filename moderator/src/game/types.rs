//! Session aggregate and its per-cycle scratch state

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::{Cursor, PhasePlan};
use crate::consensus::PackBallot;
use crate::roles::{ActionKind, ActionTarget, Consumable, Role};

/// Stable room identifier from the chat platform
pub type RoomId = String;

/// Stable player identifier from the chat platform
pub type PlayerId = String;

/// Top-level phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Night,
    Day,
    Ended,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Night => "night",
            Phase::Day => "day",
            Phase::Ended => "ended",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-boxed step within a phase.
///
/// Night steps are listed in firing order. `LastStand` interrupts whichever
/// phase is live; `Closed` is the only step of an ended game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubPhase {
    Thief,
    Cupid,
    Sandman,
    Trickster,
    Guardian,
    Wolves,
    LoneWolf,
    Witch,
    Seer,
    Raven,
    Silencer,
    Wake,
    Deliberation,
    Vote,
    CaptainVote,
    LastStand,
    Closed,
}

impl SubPhase {
    /// Roles whose living holders act in this step
    pub fn actor_roles(self) -> &'static [Role] {
        match self {
            SubPhase::Thief => &[Role::Thief],
            SubPhase::Cupid => &[Role::Cupid],
            SubPhase::Sandman => &[Role::Sandman],
            SubPhase::Trickster => &[Role::Trickster],
            SubPhase::Guardian => &[Role::Guardian],
            SubPhase::Wolves => &[Role::Werewolf, Role::LoneWolf],
            SubPhase::LoneWolf => &[Role::LoneWolf],
            SubPhase::Witch => &[Role::Witch],
            SubPhase::Seer => &[Role::Seer],
            SubPhase::Raven => &[Role::Raven],
            SubPhase::Silencer => &[Role::Silencer],
            _ => &[],
        }
    }

    /// Night steps where individual players submit night actions
    pub fn is_role_step(self) -> bool {
        !matches!(self, SubPhase::Wolves) && !self.actor_roles().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubPhase::Thief => "thief",
            SubPhase::Cupid => "cupid",
            SubPhase::Sandman => "sandman",
            SubPhase::Trickster => "trickster",
            SubPhase::Guardian => "guardian",
            SubPhase::Wolves => "wolves",
            SubPhase::LoneWolf => "lone_wolf",
            SubPhase::Witch => "witch",
            SubPhase::Seer => "seer",
            SubPhase::Raven => "raven",
            SubPhase::Silencer => "silencer",
            SubPhase::Wake => "wake",
            SubPhase::Deliberation => "deliberation",
            SubPhase::Vote => "vote",
            SubPhase::CaptainVote => "captain_vote",
            SubPhase::LastStand => "last_stand",
            SubPhase::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SubPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ballot families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// Nightly pack consensus
    Pack,
    /// Day elimination
    Village,
    /// Captain election or tie-break
    Captain,
    /// Vote to end the game early
    End,
}

impl VoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteKind::Pack => "pack",
            VoteKind::Village => "village",
            VoteKind::Captain => "captain",
            VoteKind::End => "end",
        }
    }
}

impl std::fmt::Display for VoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seated player. Never removed from the game; `alive` only flips once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub role: Role,
    pub alive: bool,
    pub in_love: bool,
    pub can_vote: bool,
    pub has_used_revenge_shot: bool,
    pub was_revealed_as_decoy: bool,
    pub extra_life_used: bool,
    /// Guardian only: who was protected last night
    pub last_protected: Option<PlayerId>,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
            alive: true,
            in_love: false,
            can_vote: true,
            has_used_revenge_shot: false,
            was_revealed_as_decoy: false,
            extra_life_used: false,
            last_protected: None,
        }
    }
}

/// Two players bound by Cupid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoverBond {
    pub first: PlayerId,
    pub second: PlayerId,
    /// Set once the bond has propagated a death
    pub consumed: bool,
}

impl LoverBond {
    pub fn partner_of(&self, id: &str) -> Option<&PlayerId> {
        if self.first == id {
            Some(&self.second)
        } else if self.second == id {
            Some(&self.first)
        } else {
            None
        }
    }
}

/// Who won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Village,
    Pack,
    Lovers,
    Nobody,
}

impl Winner {
    pub fn as_str(self) -> &'static str {
        match self {
            Winner::Village => "village",
            Winner::Pack => "pack",
            Winner::Lovers => "lovers",
            Winner::Nobody => "nobody",
        }
    }
}

/// An accepted night action, in submission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightAction {
    pub seq: u32,
    pub actor: PlayerId,
    pub kind: ActionKind,
    pub target: ActionTarget,
    pub sub_phase: SubPhase,
}

/// Night-local state, reset when a night starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightScratch {
    pub actions: Vec<NightAction>,
    pub pack: PackBallot,
    /// Settled pack victim
    pub pack_target: Option<PlayerId>,
    /// Pack consensus has settled (with or without a victim)
    pub pack_settled: bool,
}

impl NightScratch {
    pub fn next_seq(&self) -> u32 {
        self.actions.len() as u32
    }

    pub fn actions_in(&self, sub: SubPhase) -> impl Iterator<Item = &NightAction> {
        self.actions.iter().filter(move |a| a.sub_phase == sub)
    }
}

/// Captain ballot flavour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptainVoteMode {
    /// Living players elect a captain
    Election,
    /// The captain picks one of the tied candidates
    TieBreak { candidates: Vec<PlayerId> },
}

/// Day-local state, reset when a day starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayScratch {
    pub ballots: BTreeMap<PlayerId, PlayerId>,
    /// Extra votes against a target (Raven)
    pub modifiers: BTreeMap<PlayerId, u32>,
    pub silenced: BTreeSet<PlayerId>,
    pub captain_ballots: BTreeMap<PlayerId, PlayerId>,
    pub captain_mode: CaptainVoteMode,
    /// The elimination vote has produced its verdict
    pub decided: bool,
}

impl Default for DayScratch {
    fn default() -> Self {
        Self {
            ballots: BTreeMap::new(),
            modifiers: BTreeMap::new(),
            silenced: BTreeSet::new(),
            captain_ballots: BTreeMap::new(),
            captain_mode: CaptainVoteMode::Election,
            decided: false,
        }
    }
}

/// One session's full state.
///
/// Players are persisted as separate rows, so they are skipped when the
/// session row itself is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: Uuid,
    pub room_id: RoomId,
    pub phase: Phase,
    pub sub_phase: SubPhase,
    pub day_count: u32,
    #[serde(skip)]
    pub players: Vec<Player>,
    pub captain_id: Option<PlayerId>,
    pub lover_bonds: Vec<LoverBond>,
    pub plan: PhasePlan,
    pub night: NightScratch,
    pub day: DayScratch,
    /// Hunters waiting for their last-stand window, in death order
    pub revenge_queue: VecDeque<PlayerId>,
    /// Where to continue once the last stand closes
    pub resume: Option<Cursor>,
    pub end_votes: BTreeSet<PlayerId>,
    pub consumables_spent: BTreeSet<Consumable>,
    /// Monotonic ballot number, bumped for every voting window
    pub ballot: u32,
    /// Bumped on every sub-phase change
    pub transition_seq: u64,
    pub log_seq: u64,
    pub winner: Option<Winner>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    /// Fresh game at the first step of night 1
    pub fn new(room_id: impl Into<RoomId>, players: Vec<Player>, plan: PhasePlan) -> Self {
        let now = Utc::now();
        let first = plan.first();
        Self {
            game_id: Uuid::new_v4(),
            room_id: room_id.into(),
            phase: first.phase,
            sub_phase: first.sub_phase,
            day_count: 1,
            players,
            captain_id: None,
            lover_bonds: Vec::new(),
            plan,
            night: NightScratch::default(),
            day: DayScratch::default(),
            revenge_queue: VecDeque::new(),
            resume: None,
            end_votes: BTreeSet::new(),
            consumables_spent: BTreeSet::new(),
            ballot: 1,
            transition_seq: 0,
            log_seq: 0,
            winner: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            phase: self.phase,
            sub_phase: self.sub_phase,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.player(id).map(|p| p.alive).unwrap_or(false)
    }

    pub fn alive(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.alive)
    }

    pub fn alive_count(&self) -> usize {
        self.alive().count()
    }

    pub fn alive_adversaries(&self) -> impl Iterator<Item = &Player> {
        self.alive().filter(|p| p.role.is_adversary())
    }

    /// Living players holding one of `roles`
    pub fn alive_with_roles<'a>(&'a self, roles: &'a [Role]) -> impl Iterator<Item = &'a Player> {
        self.alive().filter(move |p| roles.contains(&p.role))
    }

    pub fn living_captain(&self) -> Option<&Player> {
        self.captain_id
            .as_deref()
            .and_then(|id| self.player(id))
            .filter(|p| p.alive)
    }

    pub fn dealt_roles(&self) -> Vec<Role> {
        self.players.iter().map(|p| p.role).collect()
    }

    /// Partner through an unconsumed bond
    pub fn lover_of(&self, id: &str) -> Option<&PlayerId> {
        self.lover_bonds
            .iter()
            .filter(|b| !b.consumed)
            .find_map(|b| b.partner_of(id))
    }

    /// Victory conditions, checked after every cascade
    pub fn winner_check(&self) -> Option<Winner> {
        let alive: Vec<&Player> = self.alive().collect();
        if alive.is_empty() {
            return Some(Winner::Nobody);
        }

        if alive.len() == 2 {
            let (a, b) = (&alive[0].id, &alive[1].id);
            let bonded = self.lover_bonds.iter().any(|bond| {
                (bond.first == *a && bond.second == *b) || (bond.first == *b && bond.second == *a)
            });
            if bonded {
                return Some(Winner::Lovers);
            }
        }

        let adversaries = alive.iter().filter(|p| p.role.is_adversary()).count();
        if adversaries == 0 {
            Some(Winner::Village)
        } else if adversaries == alive.len() {
            Some(Winner::Pack)
        } else {
            None
        }
    }
}
