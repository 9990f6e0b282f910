//! Restoring sessions from the store after a restart
//!
//! Each persisted session is checked against the room directory and for
//! internal consistency. Survivors are registered and get a fresh timer for
//! their persisted sub-phase; earlier sub-phases are never replayed. Orphans
//! and inconsistent sessions are purged.

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::game::{Game, RoomId, SubPhase};

use super::manager::SessionManager;

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub restored: Vec<RoomId>,
    /// Rooms that no longer exist on the chat platform
    pub orphaned: Vec<RoomId>,
    pub inconsistent: Vec<EngineError>,
}

impl RecoveryReport {
    pub fn discarded(&self) -> usize {
        self.orphaned.len() + self.inconsistent.len()
    }
}

/// Why a persisted session cannot be resumed
fn check_consistency(game: &Game) -> Result<(), String> {
    if game.is_ended() {
        return Err("ended game left in storage".into());
    }
    if game.players.is_empty() {
        return Err("no player rows".into());
    }
    match game.sub_phase {
        SubPhase::Wake | SubPhase::Closed => {
            return Err(format!("resting in transient step {}", game.sub_phase));
        }
        SubPhase::LastStand => {
            if game.revenge_queue.is_empty() || game.resume.is_none() {
                return Err("last stand without a pending hunter".into());
            }
        }
        sub if !game.plan.contains(sub) => {
            return Err(format!("{} is not part of this game's plan", sub));
        }
        _ => {}
    }
    if let Some(captain) = &game.captain_id {
        if game.player(captain).is_none() {
            return Err(format!("captain {} has no player row", captain));
        }
    }
    Ok(())
}

impl SessionManager {
    /// Reload persisted sessions and re-arm their timers
    pub async fn recover(&self) -> EngineResult<RecoveryReport> {
        let games = self.inner.store.list_games()?;
        let live = join_all(
            games
                .iter()
                .map(|g| self.inner.rooms.room_exists(&g.room_id)),
        )
        .await;

        let mut report = RecoveryReport::default();
        for (game, exists) in games.into_iter().zip(live) {
            let room = game.room_id.clone();

            if !exists {
                warn!(room = %room, "Room no longer exists; discarding session");
                self.inner.store.purge_session(&room)?;
                report.orphaned.push(room);
                continue;
            }

            if let Err(detail) = check_consistency(&game) {
                let err = EngineError::RecoveryInconsistency {
                    room: room.clone(),
                    detail,
                };
                warn!(room = %room, error = %err, "Discarding inconsistent session");
                self.inner.store.purge_session(&room)?;
                report.inconsistent.push(err);
                continue;
            }

            let handle = self.inner.registry.insert(game).await;
            let game = handle.lock().await;
            self.arm_timer(&game);
            info!(
                room = %room,
                sub_phase = %game.sub_phase,
                cycle = game.day_count,
                "Session restored"
            );
            report.restored.push(room);
        }

        info!(
            restored = report.restored.len(),
            discarded = report.discarded(),
            "Recovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::events::EventBus;
    use crate::game::{PhasePlan, Player};
    use crate::roles::Role;
    use crate::rooms::MockRoomDirectory;
    use crate::state::{StateStore, UnitOfWork};

    fn persisted(store: &StateStore, room: &str, mutate: impl FnOnce(&mut Game)) {
        let roles = [Role::Werewolf, Role::Witch, Role::Villager];
        let players = roles
            .iter()
            .enumerate()
            .map(|(i, r)| Player::new(format!("p{}", i), format!("P{}", i), *r))
            .collect();
        let mut game = Game::new(room, players, PhasePlan::for_roles(&roles));
        game.sub_phase = SubPhase::Witch;
        game.transition_seq = 4;
        mutate(&mut game);
        UnitOfWork::new(store, room).commit(&game).unwrap();
    }

    #[test]
    fn test_consistency_rules() {
        let roles = [Role::Werewolf, Role::Villager];
        let players = vec![
            Player::new("a", "A", Role::Werewolf),
            Player::new("b", "B", Role::Villager),
        ];
        let mut game = Game::new("r", players, PhasePlan::for_roles(&roles));
        assert!(check_consistency(&game).is_ok());

        game.sub_phase = SubPhase::Seer;
        assert!(check_consistency(&game).is_err());
        game.sub_phase = SubPhase::Wake;
        assert!(check_consistency(&game).is_err());
        game.sub_phase = SubPhase::LastStand;
        assert!(check_consistency(&game).is_err());
        game.sub_phase = SubPhase::Wolves;
        game.captain_id = Some("ghost".into());
        assert!(check_consistency(&game).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_restores_and_discards() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("db")).unwrap().shared();
        persisted(&store, "live", |_| {});
        persisted(&store, "gone", |_| {});
        persisted(&store, "broken", |g| g.sub_phase = SubPhase::Seer);

        let mut rooms = MockRoomDirectory::new();
        rooms
            .expect_room_exists()
            .returning(|room| room != "gone");

        let manager = SessionManager::new(
            store.clone(),
            EventBus::new().shared(),
            Arc::new(rooms),
            EngineConfig::default(),
        );
        let report = manager.recover().await.unwrap();

        assert_eq!(report.restored, vec!["live".to_string()]);
        assert_eq!(report.orphaned, vec!["gone".to_string()]);
        assert_eq!(report.inconsistent.len(), 1);
        assert_eq!(report.inconsistent[0].code(), "RECOVERY_INCONSISTENCY");

        assert_eq!(manager.armed_timer("live"), Some(4));
        assert_eq!(manager.snapshot("live").await.unwrap().sub_phase, SubPhase::Witch);
        assert!(store.load_game("gone").unwrap().is_none());
        assert!(store.load_game("broken").unwrap().is_none());
    }
}
