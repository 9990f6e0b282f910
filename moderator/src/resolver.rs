//! Per-cycle conflict resolution.
//!
//! [`resolve`] is a pure function over one night's accumulated effects. It
//! never touches the aggregate; the caller applies the confirmed kills
//! through the death cascade in the same unit of work.
//!
//! Pipeline, in order:
//!
//! 1. drop redirects onto a dead player or back onto their own origin
//! 2. remove every effect whose source actor is blocked (pack kills have no
//!    single actor and cannot be blocked)
//! 3. move surviving kills along surviving redirects, tagging them
//! 4. kills against a protected or immune player survive unless they bypass
//!    protection
//! 5. one kill per target, first submitted wins
//! 6. last vote modifier per target wins
//! 7. one silence per target

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::cascade::DeathCause;
use crate::game::{Game, PlayerId};

/// Who produced an effect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSource {
    Player(PlayerId),
    /// The pack's collective decision
    Pack,
}

impl EffectSource {
    pub fn actor(&self) -> Option<&str> {
        match self {
            EffectSource::Player(id) => Some(id),
            EffectSource::Pack => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub source: PlayerId,
    pub from: PlayerId,
    pub to: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub source: PlayerId,
    pub target: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protection {
    pub source: PlayerId,
    pub target: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immunity {
    pub source: PlayerId,
    pub target: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingKill {
    pub source: EffectSource,
    pub target: PlayerId,
    pub cause: DeathCause,
    pub bypass_protection: bool,
    pub redirected: bool,
}

impl PendingKill {
    pub fn new(source: EffectSource, target: impl Into<PlayerId>, cause: DeathCause) -> Self {
        Self {
            source,
            target: target.into(),
            cause,
            bypass_protection: false,
            redirected: false,
        }
    }

    pub fn bypassing(mut self) -> Self {
        self.bypass_protection = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteModifier {
    pub source: PlayerId,
    pub target: PlayerId,
    pub extra_votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Silence {
    pub source: PlayerId,
    pub target: PlayerId,
}

/// Raw effects of one cycle, each list in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleEffects {
    pub redirects: Vec<Redirect>,
    pub blocks: Vec<Block>,
    pub protections: Vec<Protection>,
    pub immunities: Vec<Immunity>,
    pub pending_kills: Vec<PendingKill>,
    pub vote_modifiers: Vec<VoteModifier>,
    pub silenced: Vec<Silence>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub confirmed_kills: Vec<PendingKill>,
    /// Kills absorbed by protection or immunity
    pub survived_kills: Vec<PendingKill>,
    /// Actors whose effects were voided
    pub blocked: Vec<PlayerId>,
    pub dropped_redirects: Vec<Redirect>,
    pub vote_modifiers: BTreeMap<PlayerId, u32>,
    pub silenced: Vec<PlayerId>,
}

/// Resolve one cycle's effects against the current aggregate
pub fn resolve(effects: &CycleEffects, game: &Game) -> Resolution {
    let mut resolution = Resolution::default();

    // 1. Invalid redirects
    let mut redirects = Vec::new();
    for r in &effects.redirects {
        if r.to == r.from || !game.is_alive(&r.to) {
            resolution.dropped_redirects.push(r.clone());
        } else {
            redirects.push(r);
        }
    }

    // 2. Blocks
    let blocked: BTreeSet<&str> = effects.blocks.iter().map(|b| b.target.as_str()).collect();
    let unblocked = |source: &str| !blocked.contains(source);
    resolution.blocked = blocked.iter().map(|s| s.to_string()).collect();

    redirects.retain(|r| unblocked(&r.source));
    let kills = effects
        .pending_kills
        .iter()
        .filter(|k| k.source.actor().map(unblocked).unwrap_or(true));

    // 3. Redirects, first matching redirect only
    let kills: Vec<PendingKill> = kills
        .map(|k| {
            let mut kill = k.clone();
            if let Some(r) = redirects.iter().find(|r| r.from == kill.target) {
                kill.target = r.to.clone();
                kill.redirected = true;
            }
            kill
        })
        .collect();

    // 4. Protection and immunity
    let shielded: BTreeSet<&str> = effects
        .protections
        .iter()
        .filter(|p| unblocked(&p.source))
        .map(|p| p.target.as_str())
        .chain(
            effects
                .immunities
                .iter()
                .filter(|i| unblocked(&i.source))
                .map(|i| i.target.as_str()),
        )
        .collect();

    // 5. One kill per target
    let mut killed: BTreeSet<PlayerId> = BTreeSet::new();
    for kill in kills {
        if shielded.contains(kill.target.as_str()) && !kill.bypass_protection {
            resolution.survived_kills.push(kill);
        } else if killed.insert(kill.target.clone()) {
            resolution.confirmed_kills.push(kill);
        }
    }

    // 6. Vote modifiers
    for m in effects.vote_modifiers.iter().filter(|m| unblocked(&m.source)) {
        resolution
            .vote_modifiers
            .insert(m.target.clone(), m.extra_votes);
    }

    // 7. Silences
    let mut seen = BTreeSet::new();
    for s in effects.silenced.iter().filter(|s| unblocked(&s.source)) {
        if seen.insert(s.target.as_str()) {
            resolution.silenced.push(s.target.clone());
        }
    }

    resolution
}
