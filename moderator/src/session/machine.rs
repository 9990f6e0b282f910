//! Transition logic for one session.
//!
//! A [`Machine`] borrows a draft of the aggregate and the unit of work for
//! the duration of one command. Everything here is synchronous; the manager
//! commits the unit and swaps the draft in afterwards, or drops both when an
//! error is returned.

use chrono::Utc;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info};

use crate::cascade::{apply_deaths, DeathCause, Spared};
use crate::config::EngineConfig;
use crate::consensus::{ConsensusPath, PackBallot, PackOutcome, RoundVerdict};
use crate::error::{EngineResult, Rejection, Submission};
use crate::events::{EndReason, EngineEvent};
use crate::game::{
    CaptainVoteMode, Cursor, DayScratch, Game, LoverBond, NightAction, NightScratch, Phase, Player, PlayerId,
    StepContext, SubPhase, VoteKind, Winner,
};
use crate::resolver::{
    self, Block, CycleEffects, EffectSource, Immunity, PendingKill, Protection, Redirect, Silence,
    VoteModifier,
};
use crate::roles::{ActionKind, ActionTarget, Consumable, Role};
use crate::state::{UnitOfWork, VoteClaimOutcome};
use crate::tally::{self, DayVerdict};

/// Extra votes a Raven's curse adds
const CURSE_VOTES: u32 = 2;

/// Result of an accepted night action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReceipt {
    pub sub_phase: SubPhase,
    pub advanced: bool,
    /// Seer insight, only ever returned to the acting player
    pub revealed: Option<(PlayerId, Role)>,
}

/// Result of an accepted ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    pub kind: VoteKind,
    /// Replaced an earlier ballot
    pub changed: bool,
    pub advanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndVoteReceipt {
    pub votes: usize,
    pub needed: usize,
    pub ended: bool,
}

pub struct Machine<'a, 's> {
    game: &'a mut Game,
    uow: &'a mut UnitOfWork<'s>,
    config: &'a EngineConfig,
    rng: &'a mut StdRng,
}

impl<'a, 's> Machine<'a, 's> {
    pub fn new(
        game: &'a mut Game,
        uow: &'a mut UnitOfWork<'s>,
        config: &'a EngineConfig,
        rng: &'a mut StdRng,
    ) -> Self {
        Self {
            game,
            uow,
            config,
            rng,
        }
    }

    pub fn game(&self) -> &Game {
        self.game
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_live(&self) -> Result<(), Rejection> {
        if self.game.is_ended() {
            Err(Rejection::GameEnded)
        } else {
            Ok(())
        }
    }

    fn player(&self, id: &str) -> Result<&Player, Rejection> {
        self.game
            .player(id)
            .ok_or_else(|| Rejection::UnknownPlayer(id.to_string()))
    }

    fn name(&self, id: &str) -> String {
        self.game
            .player(id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn log_public(&mut self, line: impl Into<String>) {
        self.uow.log(&mut *self.game, line, false);
    }

    /// Line that discloses hidden information
    fn log_secret(&mut self, line: impl Into<String>) {
        self.uow.log(&mut *self.game, line, true);
    }

    fn spent(&self, item: Consumable) -> bool {
        self.game.consumables_spent.contains(&item)
    }

    fn witch_can_act(&self) -> bool {
        let can_heal = !self.spent(Consumable::LifePotion) && self.game.night.pack_target.is_some();
        let can_poison = !self.spent(Consumable::DeathPotion);
        can_heal || can_poison
    }

    /// Living players expected to act in a role step
    fn eligible_actors(&self, sub: SubPhase) -> Vec<PlayerId> {
        let actors: Vec<PlayerId> = self
            .game
            .alive_with_roles(sub.actor_roles())
            .map(|p| p.id.clone())
            .collect();
        let blocked = match sub {
            SubPhase::Witch => !self.witch_can_act(),
            SubPhase::LoneWolf => self.game.alive_adversaries().count() < 2,
            _ => false,
        };
        if blocked {
            Vec::new()
        } else {
            actors
        }
    }

    fn actor_done(&self, sub: SubPhase, actor: &str) -> bool {
        let mut mine = self
            .game
            .night
            .actions_in(sub)
            .filter(|a| a.actor == actor)
            .peekable();
        if sub == SubPhase::Witch {
            mine.any(|a| a.kind == ActionKind::Pass) || !self.witch_can_act()
        } else {
            mine.peek().is_some()
        }
    }

    fn living_target(&self, id: &str) -> Result<(), Rejection> {
        let target = self.player(id)?;
        if !target.alive {
            return Err(Rejection::target(id, "player is dead"));
        }
        Ok(())
    }

    fn step_context(&self) -> StepContext {
        StepContext {
            night_number: self.game.day_count,
            captain_vote_needed: self.game.living_captain().is_none()
                || matches!(
                    self.game.day.captain_mode,
                    CaptainVoteMode::TieBreak { .. }
                ),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Announce a freshly dealt game and enter its first step
    pub fn begin(&mut self) {
        let players: Vec<PlayerId> = self.game.players.iter().map(|p| p.id.clone()).collect();
        self.uow.emit(EngineEvent::GameStarted {
            room_id: self.game.room_id.clone(),
            game_id: self.game.game_id,
            players,
            timestamp: Utc::now(),
        });

        let deal: Vec<String> = self
            .game
            .players
            .iter()
            .map(|p| format!("{} is the {}", p.display_name, p.role))
            .collect();
        for line in deal {
            self.log_secret(line);
        }

        info!(
            room = %self.game.room_id,
            game_id = %self.game.game_id,
            players = self.game.players.len(),
            "Game started"
        );
        self.game.night = NightScratch::default();
        let first = self.game.plan.first();
        self.enter(first);
    }

    /// Step through cursors until one has to wait for input or a timer
    fn enter(&mut self, mut cursor: Cursor) {
        loop {
            if cursor == Cursor::CLOSED {
                let winner = self.game.winner_check().unwrap_or(Winner::Nobody);
                self.finish(Some(winner), EndReason::Victory);
                return;
            }

            if self.game.phase == Phase::Day && cursor.phase == Phase::Night {
                self.game.day_count += 1;
                self.game.night = NightScratch::default();
            }
            self.game.phase = cursor.phase;
            self.game.sub_phase = cursor.sub_phase;
            self.game.transition_seq += 1;

            debug!(
                room = %self.game.room_id,
                cycle = self.game.day_count,
                sub_phase = %cursor.sub_phase,
                seq = self.game.transition_seq,
                "Entered sub-phase"
            );
            self.uow.emit(EngineEvent::PhaseChanged {
                room_id: self.game.room_id.clone(),
                phase: cursor.phase,
                sub_phase: cursor.sub_phase,
                day_count: self.game.day_count,
                transition_seq: self.game.transition_seq,
                timestamp: Utc::now(),
            });
            self.log_public(format!(
                "{} {}: {}",
                cursor.phase, self.game.day_count, cursor.sub_phase
            ));

            self.on_enter();

            if !self.step_complete() {
                return;
            }
            self.leave_current();
            if self.game.is_ended() {
                return;
            }
            cursor = self.next_cursor();
        }
    }

    fn on_enter(&mut self) {
        match self.game.sub_phase {
            SubPhase::Wolves => {
                self.game.ballot += 1;
                self.game.night.pack = PackBallot::open();
                self.game.night.pack_settled = false;
                if self.game.alive_adversaries().next().is_none() {
                    self.settle_pack(None, ConsensusPath::NoKill);
                }
            }
            SubPhase::Wake => self.resolve_night(),
            SubPhase::Vote => {
                self.game.ballot += 1;
                self.game.day.ballots.clear();
                self.game.day.decided = false;
                self.game.day.captain_mode = CaptainVoteMode::Election;
                self.game.day.captain_ballots.clear();
            }
            SubPhase::CaptainVote => {
                self.game.ballot += 1;
                self.game.day.captain_ballots.clear();
            }
            SubPhase::LastStand => {
                if let Some(hunter) = self.game.revenge_queue.front().cloned() {
                    let name = self.name(&hunter);
                    self.log_public(format!("{}, the hunter, takes aim", name));
                }
            }
            _ => {}
        }
    }

    fn step_complete(&self) -> bool {
        let sub = self.game.sub_phase;
        match sub {
            SubPhase::Wake => true,
            SubPhase::Deliberation | SubPhase::Closed => false,
            SubPhase::Wolves => self.game.night.pack_settled,
            SubPhase::Vote => {
                tally::early_majority(self.game).is_some()
                    || tally::tally_village(self.game).everyone_voted()
            }
            SubPhase::CaptainVote => tally::captain_ballot_complete(self.game),
            SubPhase::LastStand => self.game.revenge_queue.is_empty(),
            _ => self
                .eligible_actors(sub)
                .iter()
                .all(|a| self.actor_done(sub, a)),
        }
    }

    /// Close out the current step before moving on
    fn leave_current(&mut self) {
        match self.game.sub_phase {
            SubPhase::Wolves if !self.game.night.pack_settled => {
                let voters: Vec<PlayerId> =
                    self.game.alive_adversaries().map(|p| p.id.clone()).collect();
                let target = self.config.consensus().close_on_timeout(
                    &self.game.night.pack,
                    &voters,
                    &mut *self.rng,
                );
                self.settle_pack(target, ConsensusPath::Timeout);
            }
            SubPhase::Vote => self.close_vote(),
            SubPhase::CaptainVote => self.close_captain_vote(),
            SubPhase::LastStand => {
                if let Some(hunter) = self.game.revenge_queue.pop_front() {
                    if let Some(p) = self.game.player_mut(&hunter) {
                        p.has_used_revenge_shot = true;
                    }
                    let name = self.name(&hunter);
                    self.log_public(format!("{} lowers the weapon; the shot is lost", name));
                }
            }
            _ => {}
        }
    }

    /// Where to go after the current step
    fn next_cursor(&mut self) -> Cursor {
        if self.game.winner_check().is_some() {
            return Cursor::CLOSED;
        }

        let current = self.game.cursor();
        if !self.game.revenge_queue.is_empty() {
            if current.sub_phase != SubPhase::LastStand && self.game.resume.is_none() {
                let ctx = self.step_context();
                self.game.resume = Some(self.game.plan.next_after(current, &ctx));
            }
            return Cursor {
                phase: current.phase,
                sub_phase: SubPhase::LastStand,
            };
        }

        if current.sub_phase == SubPhase::LastStand {
            if let Some(resume) = self.game.resume.take() {
                return resume;
            }
        }

        let ctx = self.step_context();
        self.game.plan.next_after(current, &ctx)
    }

    /// Advance if the live step has everything it waits for
    fn settle(&mut self) {
        if self.step_complete() {
            self.advance_now();
        }
    }

    fn advance_now(&mut self) {
        self.leave_current();
        if self.game.is_ended() {
            return;
        }
        let next = self.next_cursor();
        self.enter(next);
    }

    /// Explicit advance (admin or collaborator)
    pub fn advance(&mut self) -> EngineResult<Submission<Cursor>> {
        self.ensure_live()?;
        self.advance_now();
        Ok(Submission::Accepted(self.game.cursor()))
    }

    /// Timer for transition `seq` fired; stale timers do nothing
    pub fn expire(&mut self, seq: u64) -> EngineResult<Submission<Cursor>> {
        if self.game.is_ended() || self.game.transition_seq != seq {
            debug!(room = %self.game.room_id, seq, current = self.game.transition_seq, "Stale timer ignored");
            return Ok(Submission::Ignored);
        }
        info!(
            room = %self.game.room_id,
            sub_phase = %self.game.sub_phase,
            cycle = self.game.day_count,
            "Sub-phase timed out"
        );
        self.advance_now();
        Ok(Submission::Accepted(self.game.cursor()))
    }

    fn finish(&mut self, winner: Option<Winner>, reason: EndReason) {
        self.game.phase = Phase::Ended;
        self.game.sub_phase = SubPhase::Closed;
        self.game.transition_seq += 1;
        self.game.winner = winner;
        self.game.resume = None;
        self.game.revenge_queue.clear();

        info!(room = %self.game.room_id, winner = ?winner, reason = ?reason, "Game ended");
        let line = match winner {
            Some(w) => format!("The game is over: {} wins", w.as_str()),
            None => "The game was stopped".to_string(),
        };
        self.log_public(line);
        self.uow.emit(EngineEvent::GameEnded {
            room_id: self.game.room_id.clone(),
            winner,
            reason,
            timestamp: Utc::now(),
        });
    }

    /// End without a winner; a second call is a no-op
    pub fn terminate(&mut self, reason: EndReason) -> EngineResult<Submission<()>> {
        if self.game.is_ended() {
            return Ok(Submission::Ignored);
        }
        self.finish(None, reason);
        Ok(Submission::Accepted(()))
    }

    // =========================================================================
    // Night actions
    // =========================================================================

    pub fn submit_night_action(
        &mut self,
        actor: &str,
        kind: ActionKind,
        target: ActionTarget,
    ) -> EngineResult<Submission<ActionReceipt>> {
        self.ensure_live()?;
        let player = self.player(actor)?.clone();
        let live = self.game.sub_phase;
        let cycle = self.game.day_count;
        let label = kind.claim_label(live);

        if self.uow.has_night_claim(cycle, &label, actor)? {
            debug!(room = %self.game.room_id, actor, action = %label, cycle, "Night action already claimed");
            return Ok(Submission::AlreadyClaimed);
        }

        let step_ok = match kind.sub_phase() {
            Some(sub) => sub == live,
            None => live.is_role_step(),
        };
        if self.game.phase != Phase::Night || !step_ok {
            let expected = kind
                .sub_phase()
                .map(SubPhase::as_str)
                .unwrap_or("a night role step");
            return Err(Rejection::wrong_step(expected, live).into());
        }
        if !self.eligible_actors(live).contains(&player.id) || self.actor_done(live, actor) {
            return Err(Rejection::NotEligible(actor.to_string()).into());
        }

        let target = if kind == ActionKind::Pass {
            ActionTarget::None
        } else {
            self.validate_target(&player, kind, target)?
        };

        if let Some(item) = kind.consumable() {
            if self.spent(item) {
                return Err(Rejection::ConsumableSpent(item.as_str().to_string()).into());
            }
            if !self.uow.claim_consumable(item, actor, cycle)?.is_claimed() {
                return Ok(Submission::AlreadyClaimed);
            }
        }
        if !self
            .uow
            .claim_night_action(cycle, &label, actor, &target)?
            .is_claimed()
        {
            return Ok(Submission::AlreadyClaimed);
        }

        let seq = self.game.night.next_seq();
        self.game.night.actions.push(NightAction {
            seq,
            actor: actor.to_string(),
            kind,
            target: target.clone(),
            sub_phase: live,
        });
        let revealed = self.apply_immediate(actor, kind, &target);
        self.log_secret(format!(
            "{} ({}) {} {}",
            player.display_name, player.role, kind, target
        ));

        let before = self.game.transition_seq;
        self.settle();
        Ok(Submission::Accepted(ActionReceipt {
            sub_phase: live,
            advanced: self.game.transition_seq != before,
            revealed,
        }))
    }

    fn validate_target(
        &self,
        player: &Player,
        kind: ActionKind,
        target: ActionTarget,
    ) -> Result<ActionTarget, Rejection> {
        if kind.takes_pair() {
            let Some((a, b)) = target.pair() else {
                return Err(Rejection::target(&target, "expects two players"));
            };
            if a == b {
                return Err(Rejection::target(&target, "players must differ"));
            }
            self.living_target(a)?;
            self.living_target(b)?;
            return Ok(target);
        }

        let Some(t) = target.player() else {
            return Err(Rejection::target(&target, "expects one player"));
        };
        self.living_target(t)?;

        let self_target = t == &player.id;
        match kind {
            ActionKind::Steal
            | ActionKind::Sleep
            | ActionKind::Poison
            | ActionKind::Inspect
                if self_target =>
            {
                Err(Rejection::target(t, "cannot target yourself"))
            }
            ActionKind::Protect if player.last_protected.as_deref() == Some(t.as_str()) => {
                Err(Rejection::target(t, "protected last night"))
            }
            ActionKind::Devour
                if self_target
                    || !self.game.player(t).map(|p| p.role.is_adversary()).unwrap_or(false) =>
            {
                Err(Rejection::target(t, "must be a fellow pack member"))
            }
            ActionKind::Heal if self.game.night.pack_target.as_deref() != Some(t.as_str()) => {
                Err(Rejection::target(t, "only tonight's pack victim can be healed"))
            }
            _ => Ok(target),
        }
    }

    /// Effects that take hold at submission rather than at Wake
    /// Put to sleep by the Sandman earlier tonight
    fn is_asleep(&self, actor: &str) -> bool {
        self.game.night.actions.iter().any(|a| {
            a.kind == ActionKind::Sleep && matches!(&a.target, ActionTarget::Player(t) if t == actor)
        })
    }

    fn apply_immediate(
        &mut self,
        actor: &str,
        kind: ActionKind,
        target: &ActionTarget,
    ) -> Option<(PlayerId, Role)> {
        match (kind, target) {
            (ActionKind::Steal, ActionTarget::Player(t)) => {
                let stolen = self.game.player(t)?.role;
                if let Some(victim) = self.game.player_mut(t) {
                    victim.role = Role::Villager;
                }
                if let Some(thief) = self.game.player_mut(actor) {
                    thief.role = stolen;
                }
                None
            }
            (ActionKind::Bind, ActionTarget::Pair(a, b)) => {
                self.game.lover_bonds.push(LoverBond {
                    first: a.clone(),
                    second: b.clone(),
                    consumed: false,
                });
                for id in [a, b] {
                    if let Some(p) = self.game.player_mut(id) {
                        p.in_love = true;
                    }
                }
                None
            }
            (ActionKind::Heal, _) => {
                self.game.consumables_spent.insert(Consumable::LifePotion);
                None
            }
            (ActionKind::Poison, _) => {
                self.game.consumables_spent.insert(Consumable::DeathPotion);
                None
            }
            (ActionKind::Inspect, ActionTarget::Player(t)) => {
                if self.is_asleep(actor) {
                    return None;
                }
                let role = self.game.player(t)?.role;
                Some((t.clone(), role))
            }
            _ => None,
        }
    }

    /// Night actions as resolver input; the pack kill comes first
    fn collect_effects(&self) -> CycleEffects {
        let mut effects = CycleEffects::default();
        if let Some(victim) = &self.game.night.pack_target {
            effects.pending_kills.push(PendingKill::new(
                EffectSource::Pack,
                victim.clone(),
                DeathCause::Pack,
            ));
        }

        for action in &self.game.night.actions {
            let source = action.actor.clone();
            match (action.kind, &action.target) {
                (ActionKind::Sleep, ActionTarget::Player(t)) => effects.blocks.push(Block {
                    source,
                    target: t.clone(),
                }),
                (ActionKind::Redirect, ActionTarget::Pair(from, to)) => {
                    effects.redirects.push(Redirect {
                        source,
                        from: from.clone(),
                        to: to.clone(),
                    })
                }
                (ActionKind::Protect, ActionTarget::Player(t)) => {
                    effects.protections.push(Protection {
                        source,
                        target: t.clone(),
                    })
                }
                (ActionKind::Heal, ActionTarget::Player(t)) => effects.immunities.push(Immunity {
                    source,
                    target: t.clone(),
                }),
                (ActionKind::Devour, ActionTarget::Player(t)) => {
                    effects.pending_kills.push(PendingKill::new(
                        EffectSource::Player(source),
                        t.clone(),
                        DeathCause::LoneWolf,
                    ))
                }
                (ActionKind::Poison, ActionTarget::Player(t)) => effects.pending_kills.push(
                    PendingKill::new(EffectSource::Player(source), t.clone(), DeathCause::Poison)
                        .bypassing(),
                ),
                (ActionKind::Curse, ActionTarget::Player(t)) => {
                    effects.vote_modifiers.push(VoteModifier {
                        source,
                        target: t.clone(),
                        extra_votes: CURSE_VOTES,
                    })
                }
                (ActionKind::Silence, ActionTarget::Player(t)) => effects.silenced.push(Silence {
                    source,
                    target: t.clone(),
                }),
                _ => {}
            }
        }
        effects
    }

    fn resolve_night(&mut self) {
        let effects = self.collect_effects();
        let resolution = resolver::resolve(&effects, self.game);

        let guardians: Vec<(PlayerId, Option<PlayerId>)> = self
            .game
            .players
            .iter()
            .filter(|p| p.role == Role::Guardian)
            .map(|p| {
                let protected = self
                    .game
                    .night
                    .actions_in(SubPhase::Guardian)
                    .find(|a| a.actor == p.id && a.kind == ActionKind::Protect)
                    .and_then(|a| a.target.player().cloned());
                (p.id.clone(), protected)
            })
            .collect();
        for (id, protected) in guardians {
            if let Some(g) = self.game.player_mut(&id) {
                g.last_protected = protected;
            }
        }

        self.game.day = DayScratch {
            modifiers: resolution.vote_modifiers.clone(),
            silenced: resolution.silenced.iter().cloned().collect(),
            ..DayScratch::default()
        };

        debug!(
            room = %self.game.room_id,
            cycle = self.game.day_count,
            confirmed = resolution.confirmed_kills.len(),
            survived = resolution.survived_kills.len(),
            blocked = resolution.blocked.len(),
            "Night resolved"
        );
        for kill in &resolution.survived_kills {
            let name = self.name(&kill.target);
            self.log_secret(format!("{} survived an attack ({})", name, kill.cause.as_str()));
        }

        if resolution.confirmed_kills.is_empty() {
            self.log_public("The village wakes; nobody died tonight");
        }
        let kills: Vec<(PlayerId, DeathCause)> = resolution
            .confirmed_kills
            .into_iter()
            .map(|k| (k.target, k.cause))
            .collect();
        self.cascade(kills);
    }

    /// Apply kills and announce their consequences; returns the dead
    fn cascade(&mut self, kills: Vec<(PlayerId, DeathCause)>) -> Vec<PlayerId> {
        let outcome = apply_deaths(self.game, kills);

        for death in &outcome.deaths {
            info!(
                room = %self.game.room_id,
                player = %death.player_id,
                cause = death.cause.as_str(),
                "Player died"
            );
            self.uow.emit(EngineEvent::PlayerKilled {
                room_id: self.game.room_id.clone(),
                player_id: death.player_id.clone(),
                role: death.role,
                cause: death.cause,
                timestamp: Utc::now(),
            });
            let name = self.name(&death.player_id);
            self.log_public(format!(
                "{} died ({}); they were the {}",
                name,
                death.cause.as_str(),
                death.role
            ));
        }
        for spared in &outcome.spared {
            match spared {
                Spared::ExtraLife(id) => {
                    let name = self.name(id);
                    self.log_secret(format!("{} survived thanks to an extra life", name));
                }
                Spared::DecoyRevealed(id) => {
                    let name = self.name(id);
                    self.log_public(format!("{} is the idiot: spared, but loses their vote", name));
                }
            }
        }
        if outcome.captain_vacated {
            self.log_public("The captaincy is vacant");
        }

        outcome.deaths.into_iter().map(|d| d.player_id).collect()
    }

    // =========================================================================
    // Votes
    // =========================================================================

    pub fn submit_vote(
        &mut self,
        voter: &str,
        target: &str,
        kind: VoteKind,
    ) -> EngineResult<Submission<VoteReceipt>> {
        self.ensure_live()?;
        self.player(voter)?;
        match kind {
            VoteKind::Pack => self.submit_pack_vote(voter, target),
            VoteKind::Village => self.submit_village_vote(voter, target),
            VoteKind::Captain => self.submit_captain_vote(voter, target),
            VoteKind::End => Ok(self.submit_vote_to_end(voter)?.map(|r| VoteReceipt {
                kind: VoteKind::End,
                changed: false,
                advanced: r.ended,
            })),
        }
    }

    fn record_ballot(
        &mut self,
        kind: VoteKind,
        voter: &str,
        target: &PlayerId,
    ) -> EngineResult<Option<bool>> {
        let ballot = self.game.ballot;
        match self.uow.claim_vote(kind, ballot, voter, Some(target))? {
            VoteClaimOutcome::Unchanged => Ok(None),
            VoteClaimOutcome::First => Ok(Some(false)),
            VoteClaimOutcome::Changed { .. } => Ok(Some(true)),
        }
    }

    fn submit_pack_vote(&mut self, voter: &str, target: &str) -> EngineResult<Submission<VoteReceipt>> {
        let live = self.game.sub_phase;
        if live != SubPhase::Wolves {
            return Err(Rejection::wrong_step(SubPhase::Wolves, live).into());
        }
        let is_pack = self
            .game
            .player(voter)
            .map(|p| p.alive && p.role.is_adversary())
            .unwrap_or(false);
        if !is_pack || self.game.night.pack_settled {
            return Err(Rejection::NotEligible(voter.to_string()).into());
        }
        let Some(victim) = self.game.player(target).filter(|p| p.alive) else {
            debug!(room = %self.game.room_id, voter, target, "Pack vote for unknown or dead player ignored");
            return Ok(Submission::Ignored);
        };
        if victim.role.is_adversary() {
            return Err(Rejection::target(target, "the pack cannot hunt its own").into());
        }

        let target = target.to_string();
        let Some(changed) = self.record_ballot(VoteKind::Pack, voter, &target)? else {
            return Ok(Submission::AlreadyClaimed);
        };
        self.game
            .night
            .pack
            .votes
            .insert(voter.to_string(), target.clone());
        let (voter_name, target_name) = (self.name(voter), self.name(&target));
        self.log_secret(format!("{} (pack) votes for {}", voter_name, target_name));

        let voters: Vec<PlayerId> = self.game.alive_adversaries().map(|p| p.id.clone()).collect();
        let verdict = self
            .config
            .consensus()
            .evaluate(&self.game.night.pack, &voters, &mut *self.rng);
        match verdict {
            RoundVerdict::Pending => {}
            RoundVerdict::Confirmed(victim) => self.settle_pack(Some(victim), ConsensusPath::Majority),
            RoundVerdict::Rerun => {
                self.game.night.pack.rerun();
                self.game.ballot += 1;
                let round = self.game.night.pack.round;
                self.uow.emit(EngineEvent::PackDisagreement {
                    room_id: self.game.room_id.clone(),
                    round,
                    timestamp: Utc::now(),
                });
                self.log_secret(format!("The pack disagrees; round {} begins", round));
            }
            RoundVerdict::Fallback(victim) => {
                let path = if victim.is_some() {
                    ConsensusPath::Plurality
                } else {
                    ConsensusPath::NoKill
                };
                self.settle_pack(victim, path);
            }
        }

        let before = self.game.transition_seq;
        self.settle();
        Ok(Submission::Accepted(VoteReceipt {
            kind: VoteKind::Pack,
            changed,
            advanced: self.game.transition_seq != before,
        }))
    }

    fn settle_pack(&mut self, target: Option<PlayerId>, path: ConsensusPath) {
        let round = self.game.night.pack.round;
        self.game.night.pack.outcome = Some(PackOutcome {
            target: target.clone(),
            path,
            round,
        });
        self.game.night.pack_target = target.clone();
        self.game.night.pack_settled = true;

        let line = match &target {
            Some(t) => format!("The pack settles on {} ({:?})", self.name(t), path),
            None => format!("The pack makes no kill ({:?})", path),
        };
        self.log_secret(line);
    }

    fn submit_village_vote(
        &mut self,
        voter: &str,
        target: &str,
    ) -> EngineResult<Submission<VoteReceipt>> {
        let live = self.game.sub_phase;
        if live != SubPhase::Vote {
            return Err(Rejection::wrong_step(SubPhase::Vote, live).into());
        }
        if !tally::is_eligible(self.game, voter) {
            return Err(Rejection::NotEligible(voter.to_string()).into());
        }
        if !self.game.is_alive(target) {
            return Ok(Submission::Ignored);
        }

        let target = target.to_string();
        let Some(changed) = self.record_ballot(VoteKind::Village, voter, &target)? else {
            return Ok(Submission::AlreadyClaimed);
        };
        self.game
            .day
            .ballots
            .insert(voter.to_string(), target.clone());
        let (voter_name, target_name) = (self.name(voter), self.name(&target));
        self.log_public(format!("{} votes for {}", voter_name, target_name));

        let before = self.game.transition_seq;
        self.settle();
        Ok(Submission::Accepted(VoteReceipt {
            kind: VoteKind::Village,
            changed,
            advanced: self.game.transition_seq != before,
        }))
    }

    fn close_vote(&mut self) {
        if self.game.day.decided {
            return;
        }
        self.game.day.decided = true;

        let verdict = match tally::early_majority(self.game) {
            Some(target) => DayVerdict::Eliminate(target),
            None => tally::close_village(self.game),
        };
        match verdict {
            DayVerdict::Eliminate(target) => {
                let name = self.name(&target);
                self.log_public(format!("The village sends {} away", name));
                self.cascade(vec![(target, DeathCause::VillageVote)]);
            }
            DayVerdict::Tie(candidates) => {
                if self.game.living_captain().is_some() {
                    self.log_public(format!(
                        "Tie between {}; the captain decides",
                        candidates.join(", ")
                    ));
                    self.game.day.captain_mode = CaptainVoteMode::TieBreak { candidates };
                } else {
                    self.log_public("Tie and no captain; nobody is eliminated");
                }
            }
            DayVerdict::NoVotes => self.log_public("No votes; nobody is eliminated"),
        }
    }

    fn submit_captain_vote(
        &mut self,
        voter: &str,
        target: &str,
    ) -> EngineResult<Submission<VoteReceipt>> {
        let live = self.game.sub_phase;
        if live != SubPhase::CaptainVote {
            return Err(Rejection::wrong_step(SubPhase::CaptainVote, live).into());
        }
        match &self.game.day.captain_mode {
            CaptainVoteMode::Election => {
                if !self.game.is_alive(voter) {
                    return Err(Rejection::NotEligible(voter.to_string()).into());
                }
                if !self.game.is_alive(target) {
                    return Ok(Submission::Ignored);
                }
            }
            CaptainVoteMode::TieBreak { candidates } => {
                if self.game.living_captain().map(|c| c.id.as_str()) != Some(voter) {
                    return Err(Rejection::NotEligible(voter.to_string()).into());
                }
                if !candidates.iter().any(|c| c == target) {
                    return Err(Rejection::target(target, "not one of the tied players").into());
                }
            }
        }

        let target = target.to_string();
        let Some(changed) = self.record_ballot(VoteKind::Captain, voter, &target)? else {
            return Ok(Submission::AlreadyClaimed);
        };
        self.game
            .day
            .captain_ballots
            .insert(voter.to_string(), target.clone());
        let (voter_name, target_name) = (self.name(voter), self.name(&target));
        self.log_public(format!("{} picks {} (captain ballot)", voter_name, target_name));

        let before = self.game.transition_seq;
        self.settle();
        Ok(Submission::Accepted(VoteReceipt {
            kind: VoteKind::Captain,
            changed,
            advanced: self.game.transition_seq != before,
        }))
    }

    fn close_captain_vote(&mut self) {
        let pick = tally::close_captain(self.game, self.config.tie_break, &mut *self.rng);
        let mode = std::mem::replace(&mut self.game.day.captain_mode, CaptainVoteMode::Election);

        match (mode, pick) {
            (CaptainVoteMode::Election, Some(captain)) => {
                let name = self.name(&captain);
                self.game.captain_id = Some(captain);
                self.log_public(format!("{} is the new captain", name));
            }
            (CaptainVoteMode::Election, None) => self.log_public("No captain was elected"),
            (CaptainVoteMode::TieBreak { .. }, Some(target)) => {
                let name = self.name(&target);
                self.log_public(format!("The captain sends {} away", name));
                self.cascade(vec![(target, DeathCause::VillageVote)]);
            }
            (CaptainVoteMode::TieBreak { .. }, None) => {
                self.log_public("The captain did not decide; nobody is eliminated")
            }
        }
    }

    // =========================================================================
    // Last stand and vote to end
    // =========================================================================

    pub fn submit_revenge_shot(
        &mut self,
        hunter: &str,
        target: &str,
    ) -> EngineResult<Submission<Vec<PlayerId>>> {
        self.ensure_live()?;
        self.player(hunter)?;
        let live = self.game.sub_phase;
        if live != SubPhase::LastStand {
            return Err(Rejection::wrong_step(SubPhase::LastStand, live).into());
        }
        if self.game.revenge_queue.front().map(String::as_str) != Some(hunter) {
            return Err(Rejection::NotEligible(hunter.to_string()).into());
        }
        if target == hunter {
            return Err(Rejection::target(target, "cannot target yourself").into());
        }
        self.living_target(target)?;

        let shot = ActionTarget::Player(target.to_string());
        if !self
            .uow
            .claim_night_action(self.game.day_count, "revenge", hunter, &shot)?
            .is_claimed()
        {
            return Ok(Submission::AlreadyClaimed);
        }

        self.game.revenge_queue.pop_front();
        if let Some(p) = self.game.player_mut(hunter) {
            p.has_used_revenge_shot = true;
        }
        let (hunter_name, target_name) = (self.name(hunter), self.name(target));
        self.log_public(format!("{} fires at {}", hunter_name, target_name));

        let effects = CycleEffects {
            pending_kills: vec![PendingKill::new(
                EffectSource::Player(hunter.to_string()),
                target,
                DeathCause::Revenge,
            )],
            ..CycleEffects::default()
        };
        let resolution = resolver::resolve(&effects, self.game);
        let kills = resolution
            .confirmed_kills
            .into_iter()
            .map(|k| (k.target, k.cause))
            .collect();
        let dead = self.cascade(kills);

        if !self.game.is_ended() {
            let next = self.next_cursor();
            self.enter(next);
        }
        Ok(Submission::Accepted(dead))
    }

    pub fn submit_vote_to_end(&mut self, voter: &str) -> EngineResult<Submission<EndVoteReceipt>> {
        self.ensure_live()?;
        if !self.player(voter)?.alive {
            return Err(Rejection::NotEligible(voter.to_string()).into());
        }
        if self.uow.claim_vote(VoteKind::End, 0, voter, None)? == VoteClaimOutcome::Unchanged {
            return Ok(Submission::AlreadyClaimed);
        }
        self.game.end_votes.insert(voter.to_string());

        let alive = self.game.alive_count();
        let votes = self
            .game
            .end_votes
            .iter()
            .filter(|id| self.game.is_alive(id))
            .count();
        let needed = alive / 2 + 1;
        let name = self.name(voter);
        self.log_public(format!("{} votes to end the game ({}/{})", name, votes, needed));

        let ended = votes >= needed;
        if ended {
            self.finish(None, EndReason::VotedToEnd);
        }
        Ok(Submission::Accepted(EndVoteReceipt {
            votes,
            needed,
            ended,
        }))
    }
}
