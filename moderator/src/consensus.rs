//! Pack consensus voting
//!
//! Each living pack member votes for a victim. A strict majority of the
//! living pack confirms the victim at once. When every member has voted and
//! nobody holds a majority, the round is run again with fresh ballots; a
//! second failure falls back to the configured [`PackFallback`].

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::game::PlayerId;

/// What happens when two rounds end without a majority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackFallback {
    /// The most-voted target dies
    #[default]
    Plurality,
    /// Nobody dies tonight
    NoKill,
}

/// How a tie among leaders is broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lowest player id
    #[default]
    FirstSorted,
    Random,
}

impl TieBreak {
    /// Pick one of `tied` (any order)
    pub fn pick<R: Rng + ?Sized>(self, tied: &[PlayerId], rng: &mut R) -> Option<PlayerId> {
        match self {
            TieBreak::FirstSorted => tied.iter().min().cloned(),
            TieBreak::Random => {
                let mut sorted = tied.to_vec();
                sorted.sort();
                if sorted.is_empty() {
                    None
                } else {
                    let i = rng.gen_range(0..sorted.len());
                    Some(sorted.swap_remove(i))
                }
            }
        }
    }
}

/// How the pack's decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPath {
    Majority,
    Plurality,
    NoKill,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackOutcome {
    pub target: Option<PlayerId>,
    pub path: ConsensusPath,
    pub round: u8,
}

/// Current round's ballots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackBallot {
    /// 1-based; 0 before the first round opens
    pub round: u8,
    /// voter -> target
    pub votes: BTreeMap<PlayerId, PlayerId>,
    pub outcome: Option<PackOutcome>,
}

impl PackBallot {
    pub fn open() -> Self {
        Self {
            round: 1,
            ..Self::default()
        }
    }

    /// Start the next round with empty ballots
    pub fn rerun(&mut self) {
        self.round += 1;
        self.votes.clear();
    }
}

/// Verdict after a ballot changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundVerdict {
    /// Still waiting for votes
    Pending,
    Confirmed(PlayerId),
    /// Everyone voted, no majority, another round follows
    Rerun,
    /// Final round failed; fallback applied
    Fallback(Option<PlayerId>),
}

/// Strict majority of `voters`: more than half, `n / 2 + 1`.
///
/// Half-or-more (`ceil(n / 2)`) is not enough. With two wolves it is 1, so a
/// 1-1 split would confirm whichever ballot was counted first instead of
/// rerunning. A pack split down the middle must never settle a victim. For odd
/// `n` the two rules agree.
pub fn majority_threshold(voters: usize) -> usize {
    voters / 2 + 1
}

/// Counts per target, most votes first, ties by id
pub fn tally<'a, I>(targets: I) -> Vec<(PlayerId, usize)>
where
    I: IntoIterator<Item = &'a PlayerId>,
{
    let mut counts: BTreeMap<&PlayerId, usize> = BTreeMap::new();
    for target in targets {
        *counts.entry(target).or_insert(0) += 1;
    }
    let mut ranked: Vec<(PlayerId, usize)> =
        counts.into_iter().map(|(t, c)| (t.clone(), c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Pack voting rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusProtocol {
    pub fallback: PackFallback,
    pub tie_break: TieBreak,
    pub max_rounds: u8,
}

impl Default for ConsensusProtocol {
    fn default() -> Self {
        Self {
            fallback: PackFallback::default(),
            tie_break: TieBreak::default(),
            max_rounds: 2,
        }
    }
}

impl ConsensusProtocol {
    pub fn new(fallback: PackFallback, tie_break: TieBreak) -> Self {
        Self {
            fallback,
            tie_break,
            ..Self::default()
        }
    }

    /// Evaluate `ballot` for the current living `voters`.
    ///
    /// Ballots from players no longer in `voters` are ignored.
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        ballot: &PackBallot,
        voters: &[PlayerId],
        rng: &mut R,
    ) -> RoundVerdict {
        if voters.is_empty() {
            return RoundVerdict::Fallback(None);
        }

        let cast: Vec<&PlayerId> = ballot
            .votes
            .iter()
            .filter(|(voter, _)| voters.contains(*voter))
            .map(|(_, target)| target)
            .collect();
        let ranked = tally(cast.iter().copied());
        let threshold = majority_threshold(voters.len());

        if let Some((leader, count)) = ranked.first() {
            if *count >= threshold {
                info!(
                    victim = %leader,
                    votes = count,
                    threshold,
                    round = ballot.round,
                    "Pack majority reached"
                );
                return RoundVerdict::Confirmed(leader.clone());
            }
        }

        if cast.len() < voters.len() {
            return RoundVerdict::Pending;
        }

        if ballot.round < self.max_rounds {
            debug!(round = ballot.round, "Pack split, rerunning");
            return RoundVerdict::Rerun;
        }

        match self.fallback {
            PackFallback::NoKill => RoundVerdict::Fallback(None),
            PackFallback::Plurality => RoundVerdict::Fallback(self.leader(&ranked, rng)),
        }
    }

    /// Timer fired before the pack settled: take the leader among the
    /// ballots cast so far. No ballots, no victim.
    pub fn close_on_timeout<R: Rng + ?Sized>(
        &self,
        ballot: &PackBallot,
        voters: &[PlayerId],
        rng: &mut R,
    ) -> Option<PlayerId> {
        let ranked = tally(
            ballot
                .votes
                .iter()
                .filter(|(voter, _)| voters.contains(*voter))
                .map(|(_, target)| target),
        );
        self.leader(&ranked, rng)
    }

    fn leader<R: Rng + ?Sized>(
        &self,
        ranked: &[(PlayerId, usize)],
        rng: &mut R,
    ) -> Option<PlayerId> {
        let top = ranked.first()?.1;
        let tied: Vec<PlayerId> = ranked
            .iter()
            .take_while(|(_, c)| *c == top)
            .map(|(t, _)| t.clone())
            .collect();
        self.tie_break.pick(&tied, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn voters(n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| format!("w{}", i)).collect()
    }

    fn cast(ballot: &mut PackBallot, voter: &str, target: &str) {
        ballot.votes.insert(voter.to_string(), target.to_string());
    }

    #[test]
    fn test_threshold_is_strict_majority() {
        assert_eq!(majority_threshold(1), 1);
        assert_eq!(majority_threshold(2), 2);
        assert_eq!(majority_threshold(3), 2);
        assert_eq!(majority_threshold(4), 3);
    }

    #[test]
    fn test_three_wolves_confirm_before_third_vote() {
        let protocol = ConsensusProtocol::default();
        let mut rng = StdRng::seed_from_u64(1);
        let pack = voters(3);
        let mut ballot = PackBallot::open();

        cast(&mut ballot, "w0", "A");
        assert_eq!(protocol.evaluate(&ballot, &pack, &mut rng), RoundVerdict::Pending);
        cast(&mut ballot, "w1", "A");
        assert_eq!(
            protocol.evaluate(&ballot, &pack, &mut rng),
            RoundVerdict::Confirmed("A".into())
        );
    }

    #[test]
    fn test_split_pack_reruns_then_falls_back() {
        let protocol = ConsensusProtocol::default();
        let mut rng = StdRng::seed_from_u64(1);
        let pack = voters(4);
        let mut ballot = PackBallot::open();

        for (v, t) in [("w0", "B"), ("w1", "A"), ("w2", "A"), ("w3", "B")] {
            cast(&mut ballot, v, t);
        }
        assert_eq!(protocol.evaluate(&ballot, &pack, &mut rng), RoundVerdict::Rerun);

        ballot.rerun();
        assert_eq!(ballot.round, 2);
        assert!(ballot.votes.is_empty());
        for (v, t) in [("w0", "B"), ("w1", "A"), ("w2", "A"), ("w3", "B")] {
            cast(&mut ballot, v, t);
        }
        assert_eq!(
            protocol.evaluate(&ballot, &pack, &mut rng),
            RoundVerdict::Fallback(Some("A".into()))
        );

        let no_kill = ConsensusProtocol::new(PackFallback::NoKill, TieBreak::FirstSorted);
        assert_eq!(
            no_kill.evaluate(&ballot, &pack, &mut rng),
            RoundVerdict::Fallback(None)
        );
    }

    #[test]
    fn test_dead_voters_ignored() {
        let protocol = ConsensusProtocol::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ballot = PackBallot::open();
        cast(&mut ballot, "w0", "A");
        cast(&mut ballot, "w1", "B");

        let living = vec!["w1".to_string()];
        assert_eq!(
            protocol.evaluate(&ballot, &living, &mut rng),
            RoundVerdict::Confirmed("B".into())
        );
    }

    #[test]
    fn test_timeout_takes_plurality_of_cast() {
        let protocol = ConsensusProtocol::default();
        let mut rng = StdRng::seed_from_u64(1);
        let pack = voters(4);
        let mut ballot = PackBallot::open();
        assert_eq!(protocol.close_on_timeout(&ballot, &pack, &mut rng), None);

        cast(&mut ballot, "w0", "C");
        cast(&mut ballot, "w1", "B");
        assert_eq!(
            protocol.close_on_timeout(&ballot, &pack, &mut rng),
            Some("B".into())
        );
    }

    #[test]
    fn test_random_tie_break_is_seeded() {
        let tied = vec!["B".to_string(), "A".to_string(), "C".to_string()];
        let a = TieBreak::Random.pick(&tied, &mut StdRng::seed_from_u64(9));
        let b = TieBreak::Random.pick(&tied, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
        assert!(tied.contains(&a.unwrap()));
        assert_eq!(
            TieBreak::FirstSorted.pick(&tied, &mut StdRng::seed_from_u64(9)),
            Some("A".into())
        );
    }

    #[test]
    fn test_tally_order() {
        let votes = ["B", "A", "B", "C", "A"].map(String::from);
        let ranked = tally(votes.iter());
        assert_eq!(
            ranked,
            vec![("A".to_string(), 2), ("B".to_string(), 2), ("C".to_string(), 1)]
        );
    }
}
