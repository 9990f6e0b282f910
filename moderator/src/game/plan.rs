//! Phase plan: the ordered step table built once when a game starts.
//!
//! The plan lists every step the dealt roles can ever need, each guarded by a
//! [`StepCondition`]. Walking the plan is a pure lookup: given the current
//! cursor and a [`StepContext`], `next_after` returns the next cursor whose
//! condition holds. Steps for roles that were never dealt are simply absent.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{Phase, SubPhase};
use crate::roles::Role;

/// Where a game currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub phase: Phase,
    pub sub_phase: SubPhase,
}

impl Cursor {
    pub const CLOSED: Cursor = Cursor {
        phase: Phase::Ended,
        sub_phase: SubPhase::Closed,
    };

    pub fn night(sub_phase: SubPhase) -> Self {
        Self {
            phase: Phase::Night,
            sub_phase,
        }
    }

    pub fn day(sub_phase: SubPhase) -> Self {
        Self {
            phase: Phase::Day,
            sub_phase,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.phase, self.sub_phase)
    }
}

/// Guard on a plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    Always,
    FirstNightOnly,
    EvenNightsOnly,
    /// No living captain, or a tied vote the captain must break
    CaptainVoteNeeded,
}

/// Facts a condition is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepContext {
    /// Current cycle (`day_count`)
    pub night_number: u32,
    pub captain_vote_needed: bool,
}

impl StepContext {
    fn holds(&self, condition: StepCondition, night_number: u32) -> bool {
        match condition {
            StepCondition::Always => true,
            StepCondition::FirstNightOnly => night_number == 1,
            StepCondition::EvenNightsOnly => night_number % 2 == 0,
            StepCondition::CaptainVoteNeeded => self.captain_vote_needed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub sub_phase: SubPhase,
    pub condition: StepCondition,
}

impl PlanStep {
    fn new(sub_phase: SubPhase, condition: StepCondition) -> Self {
        Self {
            sub_phase,
            condition,
        }
    }
}

/// Night and day step tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub night: Vec<PlanStep>,
    pub day: Vec<PlanStep>,
}

/// Night role steps in firing order with their guards
const NIGHT_ROLE_STEPS: &[(SubPhase, Role, StepCondition)] = &[
    (SubPhase::Thief, Role::Thief, StepCondition::FirstNightOnly),
    (SubPhase::Cupid, Role::Cupid, StepCondition::FirstNightOnly),
    (SubPhase::Sandman, Role::Sandman, StepCondition::Always),
    (SubPhase::Trickster, Role::Trickster, StepCondition::Always),
    (SubPhase::Guardian, Role::Guardian, StepCondition::Always),
];

const LATE_ROLE_STEPS: &[(SubPhase, Role, StepCondition)] = &[
    (SubPhase::LoneWolf, Role::LoneWolf, StepCondition::EvenNightsOnly),
    (SubPhase::Witch, Role::Witch, StepCondition::Always),
    (SubPhase::Seer, Role::Seer, StepCondition::Always),
    (SubPhase::Raven, Role::Raven, StepCondition::Always),
    (SubPhase::Silencer, Role::Silencer, StepCondition::Always),
];

impl PhasePlan {
    /// Build the plan for a dealt role list
    pub fn for_roles(roles: &[Role]) -> Self {
        let dealt = |role: Role| roles.contains(&role);
        let mut night: Vec<PlanStep> = NIGHT_ROLE_STEPS
            .iter()
            .filter(|(_, role, _)| dealt(*role))
            .map(|(sub, _, cond)| PlanStep::new(*sub, *cond))
            .collect();

        night.push(PlanStep::new(SubPhase::Wolves, StepCondition::Always));

        night.extend(
            LATE_ROLE_STEPS
                .iter()
                .filter(|(_, role, _)| dealt(*role))
                .map(|(sub, _, cond)| PlanStep::new(*sub, *cond)),
        );
        night.push(PlanStep::new(SubPhase::Wake, StepCondition::Always));

        let day = vec![
            PlanStep::new(SubPhase::Deliberation, StepCondition::Always),
            PlanStep::new(SubPhase::Vote, StepCondition::Always),
            PlanStep::new(SubPhase::CaptainVote, StepCondition::CaptainVoteNeeded),
        ];

        Self { night, day }
    }

    /// First cursor of night 1
    pub fn first(&self) -> Cursor {
        let ctx = StepContext {
            night_number: 1,
            captain_vote_needed: false,
        };
        self.first_night_step(&ctx, 1)
    }

    pub fn contains(&self, sub_phase: SubPhase) -> bool {
        self.night
            .iter()
            .chain(self.day.iter())
            .any(|s| s.sub_phase == sub_phase)
    }

    fn first_night_step(&self, ctx: &StepContext, night_number: u32) -> Cursor {
        self.night
            .iter()
            .find(|s| ctx.holds(s.condition, night_number))
            .map(|s| Cursor::night(s.sub_phase))
            // Wake is unconditional, so a night always has a step
            .unwrap_or(Cursor::night(SubPhase::Wake))
    }

    /// Next cursor after `cursor`. Leaving the last day step wraps to the
    /// next night, evaluated for `ctx.night_number + 1`.
    pub fn next_after(&self, cursor: Cursor, ctx: &StepContext) -> Cursor {
        match cursor.phase {
            Phase::Ended => Cursor::CLOSED,
            Phase::Night => {
                let rest = Self::steps_after(&self.night, cursor.sub_phase);
                rest.iter()
                    .find(|s| ctx.holds(s.condition, ctx.night_number))
                    .map(|s| Cursor::night(s.sub_phase))
                    .unwrap_or_else(|| self.first_day_step(ctx))
            }
            Phase::Day => {
                let rest = Self::steps_after(&self.day, cursor.sub_phase);
                rest.iter()
                    .find(|s| ctx.holds(s.condition, ctx.night_number))
                    .map(|s| Cursor::day(s.sub_phase))
                    .unwrap_or_else(|| self.first_night_step(ctx, ctx.night_number + 1))
            }
        }
    }

    fn first_day_step(&self, ctx: &StepContext) -> Cursor {
        self.day
            .iter()
            .find(|s| ctx.holds(s.condition, ctx.night_number))
            .map(|s| Cursor::day(s.sub_phase))
            .unwrap_or(Cursor::day(SubPhase::Deliberation))
    }

    fn steps_after(steps: &[PlanStep], current: SubPhase) -> &[PlanStep] {
        match steps.iter().position(|s| s.sub_phase == current) {
            Some(i) => &steps[i + 1..],
            None => steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(night: u32, captain: bool) -> StepContext {
        StepContext {
            night_number: night,
            captain_vote_needed: captain,
        }
    }

    fn full_plan() -> PhasePlan {
        PhasePlan::for_roles(&[
            Role::Thief,
            Role::Cupid,
            Role::Guardian,
            Role::Werewolf,
            Role::LoneWolf,
            Role::Witch,
            Role::Seer,
            Role::Villager,
        ])
    }

    #[test]
    fn test_undealt_roles_are_absent() {
        let plan = PhasePlan::for_roles(&[Role::Werewolf, Role::Seer, Role::Villager]);
        assert!(!plan.contains(SubPhase::Witch));
        assert!(plan.contains(SubPhase::Seer));
        assert_eq!(plan.first(), Cursor::night(SubPhase::Wolves));
    }

    #[test]
    fn test_first_night_walk() {
        let plan = full_plan();
        let c = ctx(1, true);
        let mut cursor = plan.first();
        let mut walk = vec![cursor.sub_phase];
        while cursor.phase == Phase::Night {
            cursor = plan.next_after(cursor, &c);
            walk.push(cursor.sub_phase);
        }
        assert_eq!(
            walk,
            vec![
                SubPhase::Thief,
                SubPhase::Cupid,
                SubPhase::Guardian,
                SubPhase::Wolves,
                SubPhase::Witch,
                SubPhase::Seer,
                SubPhase::Wake,
                SubPhase::Deliberation,
            ]
        );
    }

    #[test]
    fn test_day_wraps_to_second_night() {
        let plan = full_plan();
        let after_vote = plan.next_after(Cursor::day(SubPhase::Vote), &ctx(1, false));
        // Night 2 skips the first-night steps and is even
        assert_eq!(after_vote, Cursor::night(SubPhase::Guardian));

        let after_wolves = plan.next_after(Cursor::night(SubPhase::Wolves), &ctx(2, false));
        assert_eq!(after_wolves, Cursor::night(SubPhase::LoneWolf));
    }

    #[test]
    fn test_captain_vote_guard() {
        let plan = full_plan();
        assert_eq!(
            plan.next_after(Cursor::day(SubPhase::Vote), &ctx(1, true)),
            Cursor::day(SubPhase::CaptainVote)
        );
        assert_eq!(
            plan.next_after(Cursor::CLOSED, &ctx(1, true)),
            Cursor::CLOSED
        );
    }
}
