//! Session manager: the engine's command surface.
//!
//! Every command against a running game goes through [`SessionManager::mutate`]:
//! lock the room's session, clone it into a draft, run the [`Machine`] over the
//! draft, commit the unit of work, swap the draft in and publish its events.
//! A rejected or failed command leaves the live aggregate untouched.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, Rejection, Submission};
use crate::events::{EndReason, EngineEvent, SharedEventBus};
use crate::game::{
    Cursor, Game, GameSnapshot, PhasePlan, Player, PlayerId, PrivateView, RoomId, VoteKind,
};
use crate::roles::{self, ActionKind, ActionTarget, Role};
use crate::rooms::RoomDirectory;
use crate::state::{ActionLogEntry, SharedStateStore, StateStore, UnitOfWork};

use super::dedup::{CommandDeduplicator, CommandKey};
use super::lobby::{Lobby, LobbyBoard, LobbyOptions};
use super::machine::{ActionReceipt, EndVoteReceipt, Machine, VoteReceipt};
use super::registry::{SessionHandle, SessionRegistry};
use super::timers::PhaseTimers;

const MAX_ROOM_ID_LEN: usize = 128;

pub(super) struct Inner {
    pub(super) store: SharedStateStore,
    pub(super) bus: SharedEventBus,
    pub(super) rooms: Arc<dyn RoomDirectory>,
    pub(super) config: EngineConfig,
    pub(super) registry: SessionRegistry,
    pub(super) lobbies: LobbyBoard,
    pub(super) timers: PhaseTimers,
    pub(super) dedup: CommandDeduplicator,
    pub(super) rng: Mutex<StdRng>,
}

/// Cheap to clone; clones share all sessions
#[derive(Clone)]
pub struct SessionManager {
    pub(super) inner: Arc<Inner>,
}

fn validate_room_id(room_id: &str) -> Result<(), Rejection> {
    let ok = !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && !room_id.contains(':')
        && !room_id.chars().any(char::is_control);
    if ok {
        Ok(())
    } else {
        Err(Rejection::InvalidRoomId(room_id.to_string()))
    }
}

impl SessionManager {
    pub fn new(
        store: SharedStateStore,
        bus: SharedEventBus,
        rooms: Arc<dyn RoomDirectory>,
        config: EngineConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                rooms,
                dedup: CommandDeduplicator::new(config.dedup_ttl()),
                config,
                registry: SessionRegistry::new(),
                lobbies: LobbyBoard::new(),
                timers: PhaseTimers::new(),
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Open the store at `config.state_path` with a fresh event bus
    pub fn open(config: EngineConfig, rooms: Arc<dyn RoomDirectory>) -> EngineResult<Self> {
        let store = StateStore::open(&config.state_path)?.shared();
        let bus = crate::events::EventBus::new().shared();
        Ok(Self::new(store, bus, rooms, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SharedStateStore {
        &self.inner.store
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.inner.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.bus.subscribe()
    }

    /// Sequence of the room's armed timer, if any
    pub fn armed_timer(&self, room_id: &str) -> Option<u64> {
        self.inner.timers.armed(room_id)
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.inner.registry.rooms().await
    }

    // =========================================================================
    // Lobby
    // =========================================================================

    /// Open a lobby; false when the room already has a lobby or a running game
    pub async fn create_session(&self, room_id: &str, options: LobbyOptions) -> EngineResult<bool> {
        validate_room_id(room_id)?;
        if let Some(handle) = self.inner.registry.get(room_id).await {
            if !handle.lock().await.is_ended() {
                debug!(room = room_id, "Game already running");
                return Ok(false);
            }
        }
        let opened = self.inner.lobbies.open(room_id, options)?;
        if opened {
            info!(
                room = room_id,
                min_players = options.min_players,
                max_players = options.max_players,
                "Lobby opened"
            );
        }
        Ok(opened)
    }

    pub async fn join_session(&self, room_id: &str, player_id: &str, name: &str) -> EngineResult<usize> {
        let seated = self.inner.lobbies.join(room_id, player_id, name)?;
        debug!(room = room_id, actor = player_id, seated, "Player joined lobby");
        Ok(seated)
    }

    pub async fn leave_session(&self, room_id: &str, player_id: &str) -> EngineResult<usize> {
        let seated = self.inner.lobbies.leave(room_id, player_id)?;
        debug!(room = room_id, actor = player_id, seated, "Player left lobby");
        Ok(seated)
    }

    pub fn lobby(&self, room_id: &str) -> Option<Lobby> {
        self.inner.lobbies.get(room_id)
    }

    /// Deal roles to the lobby and begin the first night
    ///
    /// The lobby leaves the board before dealing, so concurrent starts for one
    /// room cannot both deal. It goes back on the board if the start fails.
    pub async fn start_session(
        &self,
        room_id: &str,
        roles: Option<Vec<Role>>,
    ) -> EngineResult<GameSnapshot> {
        let lobby = self.inner.lobbies.take_ready(room_id)?;
        let (game, events) = match self.begin_game(room_id, &lobby, roles) {
            Ok(begun) => begun,
            Err(err) => {
                self.inner.lobbies.restore(lobby);
                return Err(err);
            }
        };

        self.inner.dedup.forget_room(room_id);
        let snapshot = GameSnapshot::of(&game);
        let handle = self.inner.registry.insert(game).await;
        let live = handle.lock().await;
        for event in events {
            self.inner.bus.publish(event);
        }
        if live.is_ended() {
            self.arm_eviction(&live);
        } else {
            self.arm_timer(&live);
        }
        Ok(snapshot)
    }

    fn begin_game(
        &self,
        room_id: &str,
        lobby: &Lobby,
        roles: Option<Vec<Role>>,
    ) -> EngineResult<(Game, Vec<EngineEvent>)> {
        let roles = roles.unwrap_or_else(|| roles::default_composition(lobby.seats.len()));

        let mut game = {
            let mut rng = self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let dealt = roles::deal(&lobby.seats, &roles, &mut *rng)?;
            let players = dealt
                .into_iter()
                .map(|(id, name, role)| Player::new(id, name, role))
                .collect();
            Game::new(room_id, players, PhasePlan::for_roles(&roles))
        };

        let mut uow = UnitOfWork::new(&self.inner.store, room_id);
        uow.reset_room();
        {
            let mut rng = self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner);
            Machine::new(&mut game, &mut uow, &self.inner.config, &mut *rng).begin();
        }
        let events = uow.commit(&game).map_err(|err| {
            error!(room = room_id, error = %err, "Failed to persist new game");
            EngineError::from(err)
        })?;
        Ok((game, events))
    }

    // =========================================================================
    // In-game commands
    // =========================================================================

    pub async fn submit_night_action(
        &self,
        room_id: &str,
        actor: &str,
        kind: ActionKind,
        target: ActionTarget,
    ) -> EngineResult<Submission<ActionReceipt>> {
        let fingerprint = format!("{}:{}", kind, target);
        self.mutate_once(
            CommandKey::new(room_id, actor, "night"),
            |game| format!("{}:{}", game.day_count, fingerprint),
            move |m| m.submit_night_action(actor, kind, target),
        )
        .await
    }

    pub async fn submit_vote(
        &self,
        room_id: &str,
        voter: &str,
        target: &str,
        kind: VoteKind,
    ) -> EngineResult<Submission<VoteReceipt>> {
        if kind == VoteKind::End {
            return Ok(self
                .submit_vote_to_end(room_id, voter)
                .await?
                .map(|r| VoteReceipt {
                    kind: VoteKind::End,
                    changed: false,
                    advanced: r.ended,
                }));
        }
        self.mutate_once(
            CommandKey::new(room_id, voter, format!("vote:{}", kind)),
            |game| format!("{}:{}", game.ballot, target),
            |m| m.submit_vote(voter, target, kind),
        )
        .await
    }

    /// Count a vote to end; quorum terminates and deletes the session
    pub async fn submit_vote_to_end(
        &self,
        room_id: &str,
        voter: &str,
    ) -> EngineResult<Submission<EndVoteReceipt>> {
        let result = self
            .mutate_once(
                CommandKey::new(room_id, voter, "vote:end"),
                |_| String::new(),
                |m| m.submit_vote_to_end(voter),
            )
            .await?;
        if matches!(&result, Submission::Accepted(r) if r.ended) {
            self.discard(room_id).await;
        }
        Ok(result)
    }

    pub async fn submit_revenge_shot(
        &self,
        room_id: &str,
        hunter: &str,
        target: &str,
    ) -> EngineResult<Submission<Vec<PlayerId>>> {
        self.mutate_once(
            CommandKey::new(room_id, hunter, "revenge"),
            |game| format!("{}:{}", game.day_count, target),
            |m| m.submit_revenge_shot(hunter, target),
        )
        .await
    }

    /// Close the live sub-phase now, as if its timer had fired
    pub async fn advance(&self, room_id: &str) -> EngineResult<Submission<Cursor>> {
        self.mutate(room_id, |m| m.advance()).await
    }

    /// End the room's game or close its lobby. True when anything was stopped.
    pub async fn force_terminate(&self, room_id: &str) -> EngineResult<bool> {
        let lobby_closed = self.inner.lobbies.remove(room_id).is_some();
        let terminated = match self
            .mutate(room_id, |m| m.terminate(EndReason::Forced))
            .await
        {
            Ok(result) => result.is_accepted(),
            Err(EngineError::SessionNotFound(_)) => false,
            Err(err) => return Err(err),
        };
        self.discard(room_id).await;
        if terminated || lobby_closed {
            info!(room = room_id, "Session force-terminated");
        }
        Ok(terminated || lobby_closed)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn snapshot(&self, room_id: &str) -> EngineResult<GameSnapshot> {
        let handle = self
            .inner
            .registry
            .get(room_id)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(room_id.to_string()))?;
        let game = handle.lock().await;
        Ok(GameSnapshot::of(&game))
    }

    pub async fn private_view(&self, room_id: &str, player_id: &str) -> EngineResult<PrivateView> {
        let handle = self
            .inner
            .registry
            .get(room_id)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(room_id.to_string()))?;
        let game = handle.lock().await;
        PrivateView::of(&game, player_id)
            .ok_or_else(|| Rejection::UnknownPlayer(player_id.to_string()).into())
    }

    /// Persisted moderator log of a running game
    pub async fn action_log(&self, room_id: &str) -> EngineResult<Vec<ActionLogEntry>> {
        Ok(self.inner.store.action_log(room_id)?)
    }

    /// Stop all timers, wait for in-flight commands and flush the store
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.inner.timers.cancel_all();
        for room in self.inner.registry.rooms().await {
            if let Some(handle) = self.inner.registry.get(&room).await {
                let _drained = handle.lock().await;
            }
        }
        self.inner.store.flush()?;
        info!("Session manager shut down");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn session(&self, room_id: &str) -> EngineResult<SessionHandle> {
        self.inner
            .registry
            .get(room_id)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(room_id.to_string()))
    }

    /// Run `op` as one atomic unit against the room's session
    async fn mutate<T, F>(&self, room_id: &str, op: F) -> EngineResult<Submission<T>>
    where
        F: FnOnce(&mut Machine<'_, '_>) -> EngineResult<Submission<T>>,
    {
        let handle = self.session(room_id).await?;
        let mut live = handle.lock().await;
        self.apply(&mut *live, op)
    }

    /// [`Self::mutate`], suppressing a redelivery of the same command.
    ///
    /// The fingerprint is read from the live game under the session lock, so
    /// it can carry the ballot or night it belongs to. The same vote cast
    /// again on a later ballot is then a new command.
    async fn mutate_once<T, F>(
        &self,
        key: CommandKey,
        fingerprint: impl FnOnce(&Game) -> String,
        op: F,
    ) -> EngineResult<Submission<T>>
    where
        F: FnOnce(&mut Machine<'_, '_>) -> EngineResult<Submission<T>>,
    {
        let handle = self.session(&key.room_id).await?;
        let mut live = handle.lock().await;
        let fingerprint = fingerprint(&*live);
        if !self.inner.dedup.first_delivery(&key, &fingerprint) {
            debug!(
                room = %key.room_id,
                actor = %key.actor,
                scope = %key.scope,
                "Redelivered command suppressed"
            );
            return Ok(Submission::AlreadyClaimed);
        }
        let result = self.apply(&mut *live, op);
        if result.is_err() {
            self.inner.dedup.forget(&key);
        }
        result
    }

    fn apply<T, F>(&self, live: &mut Game, op: F) -> EngineResult<Submission<T>>
    where
        F: FnOnce(&mut Machine<'_, '_>) -> EngineResult<Submission<T>>,
    {
        let room_id = live.room_id.clone();
        let mut draft = live.clone();
        let mut uow = UnitOfWork::new(&self.inner.store, &room_id);
        let outcome = {
            let mut rng = self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let mut machine = Machine::new(&mut draft, &mut uow, &self.inner.config, &mut *rng);
            op(&mut machine)
        };

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                if err.is_validation() {
                    warn!(room = %room_id, sub_phase = %live.sub_phase, error = %err, "Command rejected");
                } else {
                    error!(room = %room_id, error = %err, "Command failed");
                }
                return Err(err);
            }
        };
        if !result.is_accepted() {
            return Ok(result);
        }

        draft.updated_at = Utc::now();
        let events = uow.commit(&draft).map_err(|err| {
            error!(room = %room_id, error = %err, "Commit failed; session unchanged");
            EngineError::from(err)
        })?;

        let moved = draft.transition_seq != live.transition_seq;
        let was_ended = live.is_ended();
        *live = draft;
        for event in events {
            self.inner.bus.publish(event);
        }
        if live.is_ended() {
            if !was_ended {
                self.arm_eviction(live);
            }
        } else if moved {
            self.arm_timer(live);
        }
        Ok(result)
    }

    /// Arm the timer for the game's live sub-phase
    pub(super) fn arm_timer(&self, game: &Game) {
        let Some(after) = self.inner.config.timeout_for(game.sub_phase) else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let room = game.room_id.clone();
        let seq = game.transition_seq;
        self.inner.timers.arm(
            &game.room_id,
            seq,
            after,
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    SessionManager { inner }.on_timer(&room, seq).await;
                }
            }),
        );
    }

    async fn on_timer(&self, room_id: &str, seq: u64) {
        self.inner.timers.disarm(room_id, seq);
        match self.mutate(room_id, |m| m.expire(seq)).await {
            Ok(_) => {}
            Err(EngineError::SessionNotFound(_)) => {
                debug!(room = room_id, seq, "Timer fired for a closed session")
            }
            Err(err) => {
                error!(room = room_id, seq, error = %err, "Timer handling failed; re-arming");
                if let Some(handle) = self.inner.registry.get(room_id).await {
                    let live = handle.lock().await;
                    if !live.is_ended() && live.transition_seq == seq {
                        self.arm_timer(&live);
                    }
                }
            }
        }
    }

    /// Evict a naturally ended game once its grace period runs out.
    ///
    /// Shares the room's timer slot, so a new game in the room replaces it.
    fn arm_eviction(&self, game: &Game) {
        let weak = Arc::downgrade(&self.inner);
        let room = game.room_id.clone();
        let seq = game.transition_seq;
        self.inner.timers.arm(
            &game.room_id,
            seq,
            self.inner.config.ended_grace(),
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    SessionManager { inner }.evict_ended(&room, seq).await;
                }
            }),
        );
    }

    async fn evict_ended(&self, room_id: &str, seq: u64) {
        self.inner.timers.disarm(room_id, seq);
        let Some(handle) = self.inner.registry.get(room_id).await else {
            return;
        };
        let current = {
            let game = handle.lock().await;
            game.is_ended() && game.transition_seq == seq
        };
        if current && self.inner.registry.remove_handle(room_id, &handle).await {
            self.inner.dedup.forget_room(room_id);
            info!(room = room_id, "Ended game evicted");
        }
    }

    /// Forget a finished session everywhere
    async fn discard(&self, room_id: &str) {
        self.inner.timers.cancel(room_id);
        self.inner.dedup.forget_room(room_id);
        if self.inner.registry.remove(room_id).await.is_some() {
            debug!(room = room_id, "Session removed");
        }
    }
}
