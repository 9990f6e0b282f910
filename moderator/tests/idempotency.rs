//! Redelivered and concurrent commands apply at most once

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, start_table, start_table_with, ROOM};
use moderator::rooms::AnyRoom;
use moderator::roles::Consumable;
use moderator::{ActionKind, ActionTarget, Role, SubPhase, Submission, VoteKind};

#[tokio::test(start_paused = true)]
async fn duplicate_night_action_keeps_first_target() {
    let table = start_table(vec![
        Role::Guardian,
        Role::Werewolf,
        Role::Villager,
        Role::Villager,
        Role::Villager,
    ])
    .await;
    let guardian = table.one(Role::Guardian);
    let wolf = table.one(Role::Werewolf);
    let villagers = table.with_role(Role::Villager);
    assert_eq!(table.snapshot().await.sub_phase, SubPhase::Guardian);

    let first = table.act(&guardian, ActionKind::Protect, &villagers[0]).await;
    assert!(first.is_accepted());
    let second = table.act(&guardian, ActionKind::Protect, &villagers[1]).await;
    assert_eq!(second, Submission::AlreadyClaimed);

    let claim = table
        .manager
        .store()
        .night_action(ROOM, 1, "protect", &guardian)
        .unwrap()
        .unwrap();
    assert_eq!(claim.target, ActionTarget::Player(villagers[0].clone()));

    // The protected villager survives the pack
    table.vote(&wolf, &villagers[0], VoteKind::Pack).await;
    let snapshot = table.snapshot().await;
    assert_eq!(snapshot.sub_phase, SubPhase::Deliberation);
    assert!(snapshot.dead_players.is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_heals_claim_the_potion_once() {
    let table = start_table(vec![
        Role::Werewolf,
        Role::Witch,
        Role::Villager,
        Role::Villager,
        Role::Villager,
    ])
    .await;
    let wolf = table.one(Role::Werewolf);
    let witch = table.one(Role::Witch);
    let victim = table.one(Role::Villager);

    table.vote(&wolf, &victim, VoteKind::Pack).await;
    assert_eq!(table.snapshot().await.sub_phase, SubPhase::Witch);

    let (a, b) = tokio::join!(
        table.act(&witch, ActionKind::Heal, &victim),
        table.act(&witch, ActionKind::Heal, &victim),
    );
    let accepted = [&a, &b].iter().filter(|s| s.is_accepted()).count();
    assert_eq!(accepted, 1);
    assert!(a == Submission::AlreadyClaimed || b == Submission::AlreadyClaimed);

    let claim = table
        .manager
        .store()
        .consumable(ROOM, Consumable::LifePotion)
        .unwrap()
        .unwrap();
    assert_eq!(claim.claimant, witch);

    // The death potion is still available, so the Witch is still up
    assert_eq!(table.snapshot().await.sub_phase, SubPhase::Witch);
    table
        .manager
        .submit_night_action(ROOM, &witch, ActionKind::Pass, ActionTarget::None)
        .await
        .unwrap();

    let snapshot = table.snapshot().await;
    assert_eq!(snapshot.sub_phase, SubPhase::Deliberation);
    assert!(snapshot.dead_players.is_empty());
}

#[tokio::test(start_paused = true)]
async fn redelivery_within_ttl_is_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let config = moderator::EngineConfig {
        dedup_ttl_ms: 3_000,
        ..config(&dir)
    };
    let table = start_table_with(
        dir,
        config,
        Arc::new(AnyRoom),
        vec![
            Role::Werewolf,
            Role::Villager,
            Role::Villager,
            Role::Villager,
        ],
    )
    .await;
    let wolf = table.one(Role::Werewolf);
    let victim = table.one(Role::Villager);

    let first = table.vote(&wolf, &victim, VoteKind::Pack).await;
    assert!(first.accepted().unwrap().advanced);

    // Same delivery again: answered from the dedup cache, not the machine
    assert_eq!(
        table.vote(&wolf, &victim, VoteKind::Pack).await,
        Submission::AlreadyClaimed
    );

    // Once the fingerprint has expired the command is judged on its merits
    tokio::time::advance(Duration::from_secs(4)).await;
    let err = table
        .manager
        .submit_vote(ROOM, &wolf, &victim, VoteKind::Pack)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WRONG_SUB_PHASE");
}

#[tokio::test(start_paused = true)]
async fn spent_potion_is_rejected_next_night() {
    let table = start_table(vec![
        Role::Werewolf,
        Role::Witch,
        Role::Villager,
        Role::Villager,
        Role::Villager,
        Role::Villager,
    ])
    .await;
    let wolf = table.one(Role::Werewolf);
    let witch = table.one(Role::Witch);
    let villagers = table.with_role(Role::Villager);

    table.vote(&wolf, &villagers[0], VoteKind::Pack).await;
    table.act(&witch, ActionKind::Heal, &villagers[0]).await;
    table
        .manager
        .submit_night_action(ROOM, &witch, ActionKind::Pass, ActionTarget::None)
        .await
        .unwrap();
    assert_eq!(table.snapshot().await.sub_phase, SubPhase::Deliberation);

    // Skip through the day without an elimination
    table.manager.advance(ROOM).await.unwrap();
    table.manager.advance(ROOM).await.unwrap();
    while table.snapshot().await.sub_phase == SubPhase::CaptainVote {
        table.manager.advance(ROOM).await.unwrap();
    }
    let snapshot = table.snapshot().await;
    assert_eq!(snapshot.day_count, 2);
    assert_eq!(snapshot.sub_phase, SubPhase::Wolves);
    assert!(snapshot.dead_players.is_empty());

    table.vote(&wolf, &villagers[1], VoteKind::Pack).await;
    assert_eq!(table.snapshot().await.sub_phase, SubPhase::Witch);
    let err = table
        .manager
        .submit_night_action(
            ROOM,
            &witch,
            ActionKind::Heal,
            ActionTarget::Player(villagers[1].clone()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONSUMABLE_SPENT");
}
