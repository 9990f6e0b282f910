//! Day vote counting: village elimination and captain ballots

use std::collections::BTreeMap;

use rand::Rng;

use crate::consensus::{tally, TieBreak};
use crate::game::{CaptainVoteMode, Game, Player, PlayerId};

/// Weight of the captain's village ballot
pub const CAPTAIN_WEIGHT: u32 = 2;

/// Living players allowed to cast a village ballot
pub fn eligible_voters(game: &Game) -> Vec<&Player> {
    game.alive()
        .filter(|p| p.can_vote && !game.day.silenced.contains(&p.id))
        .collect()
}

pub fn is_eligible(game: &Game, voter: &str) -> bool {
    eligible_voters(game).iter().any(|p| p.id == voter)
}

pub fn vote_weight(game: &Game, voter: &str) -> u32 {
    if game.captain_id.as_deref() == Some(voter) {
        CAPTAIN_WEIGHT
    } else {
        1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VillageTally {
    /// Weighted totals, highest first, ties by id
    pub totals: Vec<(PlayerId, u32)>,
    pub eligible_weight: u32,
    pub ballots_cast: usize,
    pub eligible_count: usize,
}

impl VillageTally {
    pub fn everyone_voted(&self) -> bool {
        self.ballots_cast >= self.eligible_count
    }
}

fn ranked(totals: impl IntoIterator<Item = (PlayerId, u32)>) -> Vec<(PlayerId, u32)> {
    let mut v: Vec<(PlayerId, u32)> = totals.into_iter().filter(|(_, w)| *w > 0).collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v
}

/// Ballot weight per target from eligible voters, optionally with modifiers
fn weigh(game: &Game, with_modifiers: bool) -> VillageTally {
    let eligible = eligible_voters(game);
    let mut totals: BTreeMap<PlayerId, u32> = BTreeMap::new();
    let mut cast = 0;

    for (voter, target) in &game.day.ballots {
        if !eligible.iter().any(|p| &p.id == voter) || !game.is_alive(target) {
            continue;
        }
        cast += 1;
        *totals.entry(target.clone()).or_insert(0) += vote_weight(game, voter);
    }

    if with_modifiers {
        for (target, extra) in &game.day.modifiers {
            if game.is_alive(target) {
                *totals.entry(target.clone()).or_insert(0) += extra;
            }
        }
    }

    VillageTally {
        totals: ranked(totals),
        eligible_weight: eligible.iter().map(|p| vote_weight(game, &p.id)).sum(),
        ballots_cast: cast,
        eligible_count: eligible.len(),
    }
}

/// Ballots plus vote modifiers
pub fn tally_village(game: &Game) -> VillageTally {
    weigh(game, true)
}

/// A target whose ballot weight alone exceeds half the eligible weight
pub fn early_majority(game: &Game) -> Option<PlayerId> {
    let t = weigh(game, false);
    t.totals
        .first()
        .filter(|(_, w)| w * 2 > t.eligible_weight)
        .map(|(id, _)| id.clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayVerdict {
    Eliminate(PlayerId),
    Tie(Vec<PlayerId>),
    NoVotes,
}

/// Verdict when the vote window closes
pub fn close_village(game: &Game) -> DayVerdict {
    let t = tally_village(game);
    let Some((_, top)) = t.totals.first() else {
        return DayVerdict::NoVotes;
    };
    let leaders: Vec<PlayerId> = t
        .totals
        .iter()
        .take_while(|(_, w)| w == top)
        .map(|(id, _)| id.clone())
        .collect();
    if leaders.len() == 1 {
        DayVerdict::Eliminate(leaders[0].clone())
    } else {
        DayVerdict::Tie(leaders)
    }
}

/// Whether everyone who may vote in the captain ballot has voted
pub fn captain_ballot_complete(game: &Game) -> bool {
    match &game.day.captain_mode {
        CaptainVoteMode::Election => game
            .alive()
            .all(|p| game.day.captain_ballots.contains_key(&p.id)),
        CaptainVoteMode::TieBreak { .. } => game
            .living_captain()
            .map(|c| game.day.captain_ballots.contains_key(&c.id))
            .unwrap_or(true),
    }
}

/// Result of the captain ballot: the elected captain (Election) or the
/// player the captain sends out (TieBreak)
pub fn close_captain<R: Rng + ?Sized>(
    game: &Game,
    tie_break: TieBreak,
    rng: &mut R,
) -> Option<PlayerId> {
    match &game.day.captain_mode {
        CaptainVoteMode::Election => {
            let ranked = tally(
                game.day
                    .captain_ballots
                    .iter()
                    .filter(|(voter, target)| game.is_alive(voter) && game.is_alive(target))
                    .map(|(_, target)| target),
            );
            let top = ranked.first()?.1;
            let tied: Vec<PlayerId> = ranked
                .iter()
                .take_while(|(_, c)| *c == top)
                .map(|(id, _)| id.clone())
                .collect();
            tie_break.pick(&tied, rng)
        }
        CaptainVoteMode::TieBreak { candidates } => {
            let captain = game.living_captain()?;
            game.day
                .captain_ballots
                .get(&captain.id)
                .filter(|pick| candidates.contains(*pick))
                .cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PhasePlan;
    use crate::roles::Role;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn game(n: usize) -> Game {
        let mut roles = vec![Role::Werewolf, Role::Werewolf];
        roles.resize(n, Role::Villager);
        let players = roles
            .iter()
            .enumerate()
            .map(|(i, r)| Player::new(format!("p{}", i), format!("P{}", i), *r))
            .collect();
        Game::new("r", players, PhasePlan::for_roles(&roles))
    }

    fn vote(g: &mut Game, voter: &str, target: &str) {
        g.day.ballots.insert(voter.into(), target.into());
    }

    #[test]
    fn test_early_majority_seven_players() {
        let mut g = game(7);
        for v in ["p1", "p2", "p3"] {
            vote(&mut g, v, "p0");
        }
        assert_eq!(early_majority(&g), None);
        vote(&mut g, "p4", "p0");
        assert_eq!(early_majority(&g), Some("p0".into()));
    }

    #[test]
    fn test_captain_weight_and_silence() {
        let mut g = game(5);
        g.captain_id = Some("p2".into());
        g.day.silenced.insert("p4".into());
        vote(&mut g, "p2", "p0");
        vote(&mut g, "p4", "p1");

        let t = tally_village(&g);
        assert_eq!(t.eligible_weight, 5);
        assert_eq!(t.totals, vec![("p0".to_string(), 2)]);
        assert_eq!(t.eligible_count, 4);
        assert!(!is_eligible(&g, "p4"));
    }

    #[test]
    fn test_modifiers_count_at_close() {
        let mut g = game(5);
        vote(&mut g, "p2", "p0");
        vote(&mut g, "p3", "p1");
        assert_eq!(
            close_village(&g),
            DayVerdict::Tie(vec!["p0".into(), "p1".into()])
        );

        g.day.modifiers.insert("p1".into(), 2);
        assert_eq!(close_village(&g), DayVerdict::Eliminate("p1".into()));
        assert_eq!(early_majority(&g), None);
    }

    #[test]
    fn test_no_votes() {
        assert_eq!(close_village(&game(4)), DayVerdict::NoVotes);
    }

    #[test]
    fn test_captain_election_and_tie_break() {
        let mut g = game(4);
        let mut rng = StdRng::seed_from_u64(3);
        g.day.captain_ballots.insert("p0".into(), "p3".into());
        g.day.captain_ballots.insert("p1".into(), "p2".into());
        assert!(!captain_ballot_complete(&g));
        assert_eq!(close_captain(&g, TieBreak::FirstSorted, &mut rng), Some("p2".into()));

        g.captain_id = Some("p3".into());
        g.day.captain_mode = CaptainVoteMode::TieBreak {
            candidates: vec!["p0".into(), "p1".into()],
        };
        g.day.captain_ballots.clear();
        assert!(!captain_ballot_complete(&g));
        g.day.captain_ballots.insert("p3".into(), "p1".into());
        assert!(captain_ballot_complete(&g));
        assert_eq!(close_captain(&g, TieBreak::FirstSorted, &mut rng), Some("p1".into()));
    }
}
