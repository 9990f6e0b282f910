//! Shared setup for session integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use moderator::rooms::{AnyRoom, RoomDirectory};
use moderator::{
    ActionKind, ActionReceipt, ActionTarget, EngineConfig, EngineEvent, GameSnapshot,
    LobbyOptions, Role, SessionManager, Submission, VoteKind, VoteReceipt,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const ROOM: &str = "village-square";

pub fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        state_path: dir.path().join("state"),
        rng_seed: Some(11),
        ..EngineConfig::default()
    }
}

/// Route engine logs through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A started game with its dealt roles
pub struct Table {
    pub manager: SessionManager,
    pub roles: BTreeMap<String, Role>,
    pub dir: TempDir,
}

pub async fn start_table(roles: Vec<Role>) -> Table {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    start_table_with(dir, config, Arc::new(AnyRoom), roles).await
}

pub async fn start_table_with(
    dir: TempDir,
    config: EngineConfig,
    rooms: Arc<dyn RoomDirectory>,
    roles: Vec<Role>,
) -> Table {
    init_tracing();
    let manager = SessionManager::open(config, rooms).unwrap();
    let options = LobbyOptions {
        min_players: 3,
        max_players: 12,
    };
    assert!(manager.create_session(ROOM, options).await.unwrap());
    for i in 0..roles.len() {
        manager
            .join_session(ROOM, &format!("p{}", i), &format!("Player {}", i))
            .await
            .unwrap();
    }
    let snapshot = manager.start_session(ROOM, Some(roles)).await.unwrap();

    let mut dealt = BTreeMap::new();
    for player in &snapshot.players {
        let view = manager.private_view(ROOM, &player.id).await.unwrap();
        dealt.insert(player.id.clone(), view.role);
    }
    Table {
        manager,
        roles: dealt,
        dir,
    }
}

impl Table {
    /// Holders of `role`, in id order
    pub fn with_role(&self, role: Role) -> Vec<String> {
        self.roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn one(&self, role: Role) -> String {
        self.with_role(role).remove(0)
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        self.manager.snapshot(ROOM).await.unwrap()
    }

    pub async fn act(&self, actor: &str, kind: ActionKind, target: &str) -> Submission<ActionReceipt> {
        self.manager
            .submit_night_action(ROOM, actor, kind, ActionTarget::Player(target.to_string()))
            .await
            .unwrap()
    }

    pub async fn vote(&self, voter: &str, target: &str, kind: VoteKind) -> Submission<VoteReceipt> {
        self.manager
            .submit_vote(ROOM, voter, target, kind)
            .await
            .unwrap()
    }
}

pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
