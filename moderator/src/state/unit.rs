//! Unit of work: claims, rows and events staged by one session mutation.
//!
//! Claims are checked against the store and against what this unit already
//! staged, then written together with the session and player rows in one
//! batch at commit. Dropping a unit without committing discards everything.

use std::collections::HashMap;

use chrono::Utc;

use super::schema::{self, keys};
use super::store::{decode, encode, RowWrite, StateStore, StoreError, StoreResult};
use super::types::*;
use crate::events::EngineEvent;
use crate::game::{Game, PlayerId, RoomId, VoteKind};
use crate::roles::{ActionTarget, Consumable};

pub struct UnitOfWork<'a> {
    store: &'a StateStore,
    room: RoomId,
    purge_first: bool,
    writes: Vec<RowWrite>,
    staged: HashMap<(&'static str, String), Vec<u8>>,
    log_entries: Vec<ActionLogEntry>,
    events: Vec<EngineEvent>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(store: &'a StateStore, room: impl Into<RoomId>) -> Self {
        Self {
            store,
            room: room.into(),
            purge_first: false,
            writes: Vec::new(),
            staged: HashMap::new(),
            log_entries: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Wipe leftover rows of the room before writing (new game)
    pub fn reset_room(&mut self) {
        self.purge_first = true;
    }

    fn lookup(&self, cf: &'static str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if let Some(bytes) = self.staged.get(&(cf, key.to_string())) {
            return Ok(Some(bytes.clone()));
        }
        if self.purge_first {
            return Ok(None);
        }
        self.store.get_raw(cf, key)
    }

    fn stage(&mut self, cf: &'static str, key: String, value: Vec<u8>, insert_only: bool) {
        self.staged.insert((cf, key.clone()), value.clone());
        self.writes.push(if insert_only {
            RowWrite::Insert { cf, key, value }
        } else {
            RowWrite::Put { cf, key, value }
        });
    }

    pub fn has_night_claim(&self, cycle: u32, action: &str, actor: &str) -> StoreResult<bool> {
        let key = keys::night_action(&self.room, cycle, action, actor);
        Ok(self.lookup(schema::CF_NIGHT_ACTIONS, &key)?.is_some())
    }

    /// Insert-only claim on (cycle, action, actor)
    pub fn claim_night_action(
        &mut self,
        cycle: u32,
        action: &str,
        actor: &str,
        target: &ActionTarget,
    ) -> StoreResult<ClaimOutcome> {
        if self.has_night_claim(cycle, action, actor)? {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        let claim = NightActionClaim {
            room_id: self.room.clone(),
            cycle,
            action: action.to_string(),
            actor: actor.to_string(),
            target: target.clone(),
            claimed_at: Utc::now(),
        };
        let key = keys::night_action(&self.room, cycle, action, actor);
        self.stage(schema::CF_NIGHT_ACTIONS, key, encode(&claim)?, true);
        Ok(ClaimOutcome::Claimed)
    }

    /// Game-lifetime claim on a one-shot item
    pub fn claim_consumable(
        &mut self,
        item: Consumable,
        claimant: &str,
        cycle: u32,
    ) -> StoreResult<ClaimOutcome> {
        let key = keys::consumable(&self.room, item.as_str());
        if self.lookup(schema::CF_CONSUMABLES, &key)?.is_some() {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        let claim = ConsumableClaim {
            room_id: self.room.clone(),
            item,
            claimant: claimant.to_string(),
            cycle,
            claimed_at: Utc::now(),
        };
        self.stage(schema::CF_CONSUMABLES, key, encode(&claim)?, true);
        Ok(ClaimOutcome::Claimed)
    }

    /// Record a ballot; the target may change, an identical one is reported
    /// as unchanged and stages nothing.
    pub fn claim_vote(
        &mut self,
        kind: VoteKind,
        ballot: u32,
        voter: &str,
        target: Option<&PlayerId>,
    ) -> StoreResult<VoteClaimOutcome> {
        let key = keys::vote(&self.room, kind.as_str(), ballot, voter);
        let previous = match self.lookup(schema::CF_VOTES, &key)? {
            Some(bytes) => Some(decode::<VoteClaim>(&bytes)?),
            None => None,
        };

        let outcome = match previous {
            Some(prev) if prev.target.as_ref() == target => return Ok(VoteClaimOutcome::Unchanged),
            Some(prev) => VoteClaimOutcome::Changed {
                previous: prev.target,
            },
            None => VoteClaimOutcome::First,
        };

        let claim = VoteClaim {
            room_id: self.room.clone(),
            kind,
            ballot,
            voter: voter.to_string(),
            target: target.cloned(),
            claimed_at: Utc::now(),
        };
        self.stage(schema::CF_VOTES, key, encode(&claim)?, false);
        Ok(outcome)
    }

    /// Append a moderator log line and announce it
    pub fn log(&mut self, game: &mut Game, line: impl Into<String>, reveals_role: bool) {
        game.log_seq += 1;
        let entry = ActionLogEntry {
            room_id: self.room.clone(),
            seq: game.log_seq,
            line: line.into(),
            reveals_role,
            at: Utc::now(),
        };
        self.events.push(EngineEvent::ActionLog {
            room_id: self.room.clone(),
            line: entry.line.clone(),
            reveals_role,
            timestamp: entry.at,
        });
        self.log_entries.push(entry);
    }

    pub fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    pub fn is_dirty(&self) -> bool {
        self.purge_first || !self.writes.is_empty() || !self.log_entries.is_empty()
    }

    /// Write everything in one batch and hand back the staged events.
    ///
    /// An ended game is purged instead of written.
    pub fn commit(self, game: &Game) -> StoreResult<Vec<EngineEvent>> {
        let mut batch = Vec::new();

        if game.is_ended() {
            batch.push(RowWrite::PurgeRoom(self.room.clone()));
        } else {
            if self.purge_first {
                batch.push(RowWrite::PurgeRoom(self.room.clone()));
            }
            batch.extend(self.writes);
            batch.push(RowWrite::Put {
                cf: schema::CF_SESSIONS,
                key: keys::session(&self.room),
                value: encode(game)?,
            });
            for (seat, player) in game.players.iter().enumerate() {
                let row = PlayerRow {
                    room_id: self.room.clone(),
                    seat: seat as u16,
                    player: player.clone(),
                };
                batch.push(RowWrite::Put {
                    cf: schema::CF_PLAYERS,
                    key: keys::player(&self.room, seat as u16),
                    value: encode(&row)?,
                });
            }
            for entry in &self.log_entries {
                let value = serde_json::to_vec(entry)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                batch.push(RowWrite::Put {
                    cf: schema::CF_ACTION_LOG,
                    key: keys::log(&self.room, entry.seq),
                    value,
                });
            }
        }

        self.store.apply(batch)?;
        Ok(self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{PhasePlan, Player};
    use crate::roles::Role;
    use tempfile::tempdir;

    fn setup() -> (StateStore, tempfile::TempDir, Game) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("uow.db")).unwrap();
        let roles = [Role::Werewolf, Role::Witch, Role::Villager];
        let players = roles
            .iter()
            .enumerate()
            .map(|(i, r)| Player::new(format!("u{}", i), format!("U{}", i), *r))
            .collect();
        let game = Game::new("room", players, PhasePlan::for_roles(&roles));
        (store, dir, game)
    }

    #[test]
    fn test_claim_visible_within_unit_and_after_commit() {
        let (store, _dir, mut game) = setup();
        let target = ActionTarget::Player("u2".into());

        let mut uow = UnitOfWork::new(&store, "room");
        assert!(uow.claim_night_action(1, "heal", "u1", &target).unwrap().is_claimed());
        assert_eq!(
            uow.claim_night_action(1, "heal", "u1", &ActionTarget::None).unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        uow.log(&mut game, "witch healed", true);
        let events = uow.commit(&game).unwrap();
        assert_eq!(events.len(), 1);

        let mut again = UnitOfWork::new(&store, "room");
        assert_eq!(
            again.claim_night_action(1, "heal", "u1", &target).unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        assert!(!again.is_dirty());
        assert_eq!(store.action_log("room").unwrap()[0].line, "witch healed");
    }

    #[test]
    fn test_uncommitted_unit_leaves_no_rows() {
        let (store, _dir, _game) = setup();
        {
            let mut uow = UnitOfWork::new(&store, "room");
            uow.claim_consumable(Consumable::LifePotion, "u1", 1).unwrap();
        }
        assert!(store.consumable("room", Consumable::LifePotion).unwrap().is_none());
    }

    #[test]
    fn test_vote_claim_outcomes() {
        let (store, _dir, game) = setup();
        let a = "u0".to_string();
        let b = "u2".to_string();

        let mut uow = UnitOfWork::new(&store, "room");
        assert_eq!(
            uow.claim_vote(VoteKind::Village, 3, "u1", Some(&a)).unwrap(),
            VoteClaimOutcome::First
        );
        uow.commit(&game).unwrap();

        let mut uow = UnitOfWork::new(&store, "room");
        assert_eq!(
            uow.claim_vote(VoteKind::Village, 3, "u1", Some(&a)).unwrap(),
            VoteClaimOutcome::Unchanged
        );
        assert_eq!(
            uow.claim_vote(VoteKind::Village, 3, "u1", Some(&b)).unwrap(),
            VoteClaimOutcome::Changed {
                previous: Some(a.clone())
            }
        );
        assert_eq!(
            uow.claim_vote(VoteKind::Village, 4, "u1", Some(&b)).unwrap(),
            VoteClaimOutcome::First
        );
    }

    #[test]
    fn test_ended_game_commit_purges() {
        let (store, _dir, mut game) = setup();
        UnitOfWork::new(&store, "room").commit(&game).unwrap();
        assert_eq!(store.row_count("room").unwrap(), 4);

        game.phase = crate::game::Phase::Ended;
        let mut uow = UnitOfWork::new(&store, "room");
        uow.claim_consumable(Consumable::DeathPotion, "u1", 1).unwrap();
        uow.commit(&game).unwrap();
        assert_eq!(store.row_count("room").unwrap(), 0);
    }
}
