use serde::{Deserialize, Serialize};

use super::graph::{CandidateGraph, ExcludedEdge};
use super::locks::LockState;
use super::optimizer::{HungarianOptimizer, Optimizer};
use super::preferences::PreferenceSet;
use super::types::{Assignment, PlayerId, RoleCatalog, RoleId, Roster, RoundKey};
use crate::config::CastingPolicy;
use crate::error::{CastingError, LockConflict, Result};

/// One seated (role, player) pair as seen by staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilledRole {
    pub role: RoleId,
    pub player: PlayerId,
    pub rank: Option<u32>,
    pub first_choice: bool,
    pub forced: bool,
}

/// A player seated in a role they asked to avoid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvoidanceFlag {
    pub player: PlayerId,
    pub role: RoleId,
    pub note: Option<String>,
}

/// Advisory outcome of a trial solve. Nothing here is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub round: RoundKey,
    /// Session revision the result was computed at.
    pub revision: u64,
    /// `None` when forced-in locks conflict.
    pub assignment: Option<Assignment>,
    pub conflicts: Vec<LockConflict>,
    pub filled_roles: Vec<FilledRole>,
    pub unfilled_roles: Vec<RoleId>,
    /// Considered players who received none of their declared preferences.
    pub unsatisfied_players: Vec<PlayerId>,
    pub no_preferences: Vec<PlayerId>,
    pub ineligible_players: Vec<PlayerId>,
    pub avoidance_flags: Vec<AvoidanceFlag>,
    pub excluded_edges: Vec<ExcludedEdge>,
}

impl SimulationResult {
    pub fn is_commit_eligible(&self) -> bool {
        self.conflicts.is_empty() && self.assignment.is_some()
    }

    pub fn at_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Number of seated players who got their first choice.
    pub fn first_choice_count(&self) -> usize {
        self.filled_roles.iter().filter(|f| f.first_choice).count()
    }
}

/// Runs what-if solves over a fixed roster with a swappable optimizer.
pub struct SimulationRunner<'a, O = HungarianOptimizer> {
    policy: &'a CastingPolicy,
    round: &'a RoundKey,
    roster: &'a Roster,
    optimizer: O,
}

impl<'a> SimulationRunner<'a, HungarianOptimizer> {
    pub fn new(policy: &'a CastingPolicy, round: &'a RoundKey, roster: &'a Roster) -> Self {
        Self::with_optimizer(policy, round, roster, HungarianOptimizer)
    }
}

impl<'a, O: Optimizer> SimulationRunner<'a, O> {
    pub fn with_optimizer(
        policy: &'a CastingPolicy,
        round: &'a RoundKey,
        roster: &'a Roster,
        optimizer: O,
    ) -> Self {
        Self {
            policy,
            round,
            roster,
            optimizer,
        }
    }

    /// Rebuilds the candidate graph and solves it. Pure: identical inputs
    /// give an identical result.
    ///
    /// Lock conflicts are part of the result; any other optimizer failure
    /// is returned as an error.
    pub fn simulate(
        &self,
        preferences: &PreferenceSet,
        roles: &RoleCatalog,
        locks: &LockState,
    ) -> Result<SimulationResult> {
        let graph = CandidateGraph::build(self.policy, self.round, self.roster, roles, preferences, locks);

        let no_preferences = self
            .roster
            .iter()
            .filter(|p| self.policy.admits(p) && !preferences.has_preferences(&p.id))
            .map(|p| p.id.clone())
            .collect();
        let ineligible_players = self
            .roster
            .iter()
            .filter(|p| !self.policy.admits(p))
            .map(|p| p.id.clone())
            .collect();

        let mut result = SimulationResult {
            round: self.round.clone(),
            revision: 0,
            assignment: None,
            conflicts: Vec::new(),
            filled_roles: Vec::new(),
            unfilled_roles: Vec::new(),
            unsatisfied_players: Vec::new(),
            no_preferences,
            ineligible_players,
            avoidance_flags: Vec::new(),
            excluded_edges: graph.excluded().to_vec(),
        };

        let assignment = match self.optimizer.solve(&graph, &locks.forced_in()) {
            Ok(assignment) => assignment,
            Err(CastingError::LockConflict(conflicts)) => {
                result.conflicts = conflicts;
                tracing::info!(
                    round = %self.round,
                    conflicts = result.conflicts.len(),
                    "simulation blocked by lock conflicts"
                );
                return Ok(result);
            }
            Err(err) => {
                tracing::error!(round = %self.round, error = %err, "optimizer failed");
                return Err(err);
            }
        };

        for (player, role) in assignment.pairs() {
            let rank = assignment.satisfied_rank.get(player).copied().flatten();
            result.filled_roles.push(FilledRole {
                role: role.clone(),
                player: player.clone(),
                rank,
                first_choice: rank == Some(1),
                forced: locks.forced_in_for(player) == Some(role),
            });

            if let Some(list) = preferences.get(player) {
                if list.avoids(role) {
                    result.avoidance_flags.push(AvoidanceFlag {
                        player: player.clone(),
                        role: role.clone(),
                        note: list.avoidance_note(role).map(str::to_string),
                    });
                }
            }
        }

        result.unsatisfied_players = assignment
            .satisfied_rank
            .iter()
            .filter(|(_, rank)| rank.is_none())
            .map(|(player, _)| player.clone())
            .collect();
        result.unfilled_roles = assignment.unfilled_roles.clone();

        tracing::info!(
            round = %self.round,
            filled = result.filled_roles.len(),
            first_choice = result.first_choice_count(),
            unmatched = assignment.unmatched_players.len(),
            unfilled = result.unfilled_roles.len(),
            total_weight = assignment.total_weight,
            "simulation finished"
        );

        result.assignment = Some(assignment);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casting::preferences::{Avoidance, PreferenceSubmission};
    use crate::casting::types::{CategoryId, LockEntry, Player, Role, TicketTier};
    use crate::config::AvoidanceMode;
    use crate::error::ConflictReason;

    fn player(id: &str, tier: &str) -> Player {
        Player {
            id: PlayerId::from(id),
            name: String::new(),
            ticket_tier: TicketTier::from(tier),
            is_member: true,
            factions: Default::default(),
        }
    }

    fn role(id: &str) -> Role {
        Role {
            id: RoleId::from(id),
            name: String::new(),
            category: CategoryId::from("main"),
            mirror_group: None,
            capacity: 1,
            faction: None,
        }
    }

    fn submission(player: &str, prefs: &[&str]) -> PreferenceSubmission {
        PreferenceSubmission {
            player: PlayerId::from(player),
            category: CategoryId::from("main"),
            preferences: prefs.iter().map(|r| RoleId::from(*r)).collect(),
            avoid: Vec::new(),
        }
    }

    #[test]
    fn reports_everyone_outside_the_assignment() {
        let policy = CastingPolicy {
            eligible_tiers: Some([TicketTier::from("player")].into_iter().collect()),
            ..CastingPolicy::default()
        };
        let round = RoundKey::new("main");
        let roster = Roster::new(vec![
            player("p1", "player"),
            player("p2", "player"),
            player("quiet", "player"),
            player("npc", "staff"),
        ]);
        let catalog = RoleCatalog::new(vec![role("a"), role("b")]);
        let prefs = PreferenceSet::build(
            &round,
            &[
                submission("p1", &["a"]),
                submission("p2", &["a"]),
                submission("npc", &["b"]),
            ],
            &catalog,
            &policy,
        )
        .unwrap();

        let result = SimulationRunner::new(&policy, &round, &roster)
            .simulate(&prefs, &catalog, &LockState::new())
            .unwrap();

        assert!(result.is_commit_eligible());
        assert_eq!(result.filled_roles.len(), 1);
        assert!(result.filled_roles[0].first_choice);
        assert_eq!(result.unsatisfied_players, vec![PlayerId::from("p2")]);
        assert_eq!(result.no_preferences, vec![PlayerId::from("quiet")]);
        assert_eq!(result.ineligible_players, vec![PlayerId::from("npc")]);
        assert_eq!(result.unfilled_roles, vec![RoleId::from("b")]);
    }

    #[test]
    fn soft_avoidance_is_flagged_not_blocked() {
        let policy = CastingPolicy::default();
        let round = RoundKey::new("main");
        let roster = Roster::new(vec![player("p", "player")]);
        let catalog = RoleCatalog::new(vec![role("a"), role("b")]);
        let prefs = PreferenceSet::build(
            &round,
            &[PreferenceSubmission {
                avoid: vec![Avoidance {
                    role: RoleId::from("b"),
                    note: Some("too close to home".to_string()),
                }],
                ..submission("p", &["a"])
            }],
            &catalog,
            &policy,
        )
        .unwrap();

        let mut locks = LockState::new();
        locks.toggle(&PlayerId::from("p"), &RoleId::from("b")).unwrap();

        let result = SimulationRunner::new(&policy, &round, &roster)
            .simulate(&prefs, &catalog, &locks)
            .unwrap();

        assert_eq!(
            result.avoidance_flags,
            vec![AvoidanceFlag {
                player: PlayerId::from("p"),
                role: RoleId::from("b"),
                note: Some("too close to home".to_string()),
            }]
        );
        assert!(result.filled_roles[0].forced);
        assert_eq!(result.unsatisfied_players, vec![PlayerId::from("p")]);
    }

    #[test]
    fn conflicts_leave_no_assignment() {
        let policy = CastingPolicy::default();
        let round = RoundKey::new("main");
        let roster = Roster::new(vec![player("p", "player"), player("q", "player")]);
        let catalog = RoleCatalog::new(vec![role("r")]);
        let prefs = PreferenceSet::build(&round, &[], &catalog, &policy).unwrap();

        let mut locks = LockState::new();
        locks.toggle(&PlayerId::from("p"), &RoleId::from("r")).unwrap();
        locks.toggle(&PlayerId::from("q"), &RoleId::from("r")).unwrap();

        let result = SimulationRunner::new(&policy, &round, &roster)
            .simulate(&prefs, &catalog, &locks)
            .unwrap();

        assert!(!result.is_commit_eligible());
        assert!(result.assignment.is_none());
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn hard_avoidance_blocks_a_forced_in_lock() {
        let round = RoundKey::new("main");
        let roster = Roster::new(vec![player("p", "player")]);
        let catalog = RoleCatalog::new(vec![role("a"), role("b")]);
        let soft = CastingPolicy::default();
        let hard = CastingPolicy {
            avoidance: AvoidanceMode::Hard,
            ..CastingPolicy::default()
        };
        let prefs = PreferenceSet::build(
            &round,
            &[PreferenceSubmission {
                avoid: vec![Avoidance {
                    role: RoleId::from("b"),
                    note: None,
                }],
                ..submission("p", &["a"])
            }],
            &catalog,
            &soft,
        )
        .unwrap();
        let mut locks = LockState::new();
        locks.toggle(&PlayerId::from("p"), &RoleId::from("b")).unwrap();

        let seated = SimulationRunner::new(&soft, &round, &roster)
            .simulate(&prefs, &catalog, &locks)
            .unwrap();
        let blocked = SimulationRunner::new(&hard, &round, &roster)
            .simulate(&prefs, &catalog, &locks)
            .unwrap();

        let assignment = seated.assignment.as_ref().unwrap();
        assert_eq!(assignment.role_of(&PlayerId::from("p")), Some(&RoleId::from("b")));
        assert!(blocked.assignment.is_none());
        assert!(blocked.avoidance_flags.is_empty());
        assert_eq!(
            blocked.conflicts,
            vec![LockConflict {
                reason: ConflictReason::AvoidedRole {
                    role: RoleId::from("b"),
                },
                pairs: vec![(PlayerId::from("p"), RoleId::from("b"))],
            }]
        );
    }

    struct FailingOptimizer;

    impl Optimizer for FailingOptimizer {
        fn solve(&self, graph: &CandidateGraph, _forced_in: &[LockEntry]) -> Result<Assignment> {
            Err(CastingError::RoundTooLarge {
                players: graph.players().len(),
                roles: graph.roles().len(),
            })
        }
    }

    #[test]
    fn solver_failures_are_returned() {
        let policy = CastingPolicy::default();
        let round = RoundKey::new("main");
        let roster = Roster::new(vec![player("p", "player")]);
        let catalog = RoleCatalog::new(vec![role("a")]);
        let prefs = PreferenceSet::build(&round, &[submission("p", &["a"])], &catalog, &policy).unwrap();

        let err = SimulationRunner::with_optimizer(&policy, &round, &roster, FailingOptimizer)
            .simulate(&prefs, &catalog, &LockState::new())
            .unwrap_err();

        assert!(matches!(err, CastingError::RoundTooLarge { players: 1, roles: 1 }));
    }
}
