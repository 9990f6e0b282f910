//! Restarting the engine over an existing store

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, drain, start_table, ROOM};
use moderator::rooms::InMemoryRooms;
use moderator::{EngineEvent, Phase, Role, SessionManager, SubPhase, VoteKind};

#[tokio::test(start_paused = true)]
async fn restart_mid_witch_rearms_the_witch_timer() {
    let table = start_table(vec![
        Role::Werewolf,
        Role::Witch,
        Role::Villager,
        Role::Villager,
        Role::Villager,
    ])
    .await;
    let wolf = table.one(Role::Werewolf);
    let victim = table.one(Role::Villager);
    table.vote(&wolf, &victim, VoteKind::Pack).await;
    assert_eq!(table.snapshot().await.sub_phase, SubPhase::Witch);
    let seq = table.manager.armed_timer(ROOM).unwrap();

    let common::Table { manager, dir, .. } = table;
    manager.shutdown().await.unwrap();
    drop(manager);

    let restarted =
        SessionManager::open(config(&dir), Arc::new(InMemoryRooms::new([ROOM]))).unwrap();
    let mut events = restarted.subscribe();
    let report = restarted.recover().await.unwrap();
    assert_eq!(report.restored, vec![ROOM.to_string()]);
    assert_eq!(report.discarded(), 0);

    let snapshot = restarted.snapshot(ROOM).await.unwrap();
    assert_eq!(snapshot.phase, Phase::Night);
    assert_eq!(snapshot.sub_phase, SubPhase::Witch);
    assert_eq!(restarted.armed_timer(ROOM), Some(seq));
    // Nothing was replayed
    assert!(drain(&mut events).is_empty());

    // The fresh Witch window runs out and the night resolves
    tokio::time::sleep(Duration::from_secs(91)).await;
    let snapshot = restarted.snapshot(ROOM).await.unwrap();
    assert_eq!(snapshot.sub_phase, SubPhase::Deliberation);
    assert_eq!(snapshot.dead_players, vec![victim]);

    let phases: Vec<SubPhase> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::PhaseChanged { sub_phase, .. } => Some(sub_phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![SubPhase::Wake, SubPhase::Deliberation]);
}

#[tokio::test(start_paused = true)]
async fn sessions_for_vanished_rooms_are_discarded() {
    let table = start_table(vec![
        Role::Werewolf,
        Role::Villager,
        Role::Villager,
        Role::Villager,
    ])
    .await;
    let common::Table { manager, dir, .. } = table;
    manager.shutdown().await.unwrap();
    drop(manager);

    let empty: [&str; 0] = [];
    let restarted =
        SessionManager::open(config(&dir), Arc::new(InMemoryRooms::new(empty))).unwrap();
    let report = restarted.recover().await.unwrap();
    assert!(report.restored.is_empty());
    assert_eq!(report.orphaned, vec![ROOM.to_string()]);
    assert!(restarted.store().load_game(ROOM).unwrap().is_none());
    assert_eq!(restarted.store().row_count(ROOM).unwrap(), 0);
    assert!(restarted.armed_timer(ROOM).is_none());
}
