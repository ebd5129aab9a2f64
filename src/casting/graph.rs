use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::constraints::{ConstraintEvaluator, Legality, Occupancy};
use super::locks::LockState;
use super::preferences::PreferenceSet;
use super::types::{MirrorGroupId, PlayerId, Role, RoleCatalog, RoleId, Roster, RoundKey};
use crate::config::{AvoidanceMode, CastingPolicy};

/// A legal preference edge with its weight. Lower rank, higher weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEdge {
    pub player: PlayerId,
    pub role: RoleId,
    pub rank: u32,
    pub weight: u64,
}

/// A declared preference left out of the graph, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedEdge {
    pub player: PlayerId,
    pub role: RoleId,
    pub rank: u32,
    pub legality: Legality,
}

/// Seats a role offers to the optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSlot {
    pub role: RoleId,
    pub capacity: u32,
    pub mirror_group: Option<MirrorGroupId>,
}

impl From<&Role> for RoleSlot {
    fn from(role: &Role) -> Self {
        Self {
            role: role.id.clone(),
            capacity: role.effective_capacity(),
            mirror_group: role.mirror_group.clone(),
        }
    }
}

/// Bipartite compatibility graph between the round's players and roles.
///
/// Players and roles are kept in ascending id order and edges in
/// (player, role) order; the optimizer's tie-breaking relies on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGraph {
    players: Vec<PlayerId>,
    roles: Vec<RoleSlot>,
    edges: Vec<CandidateEdge>,
    excluded: Vec<ExcludedEdge>,
    ranks: BTreeMap<(PlayerId, RoleId), u32>,
    hard_avoided: BTreeSet<(PlayerId, RoleId)>,
    max_weight: u64,
}

impl CandidateGraph {
    /// Runs every declared preference of an admitted player through the
    /// evaluator and keeps the legal ones.
    pub fn build(
        policy: &CastingPolicy,
        round: &RoundKey,
        roster: &Roster,
        catalog: &RoleCatalog,
        preferences: &PreferenceSet,
        locks: &LockState,
    ) -> Self {
        let tentative = Occupancy::from_locks(locks, catalog);
        let evaluator = ConstraintEvaluator::new(policy, round, preferences, &tentative);

        let roles: Vec<RoleSlot> = catalog.in_category(&round.category).map(RoleSlot::from).collect();

        let mut players = Vec::new();
        let mut edges = Vec::new();
        let mut excluded = Vec::new();
        let mut ranks = BTreeMap::new();

        for player in roster.iter() {
            if !policy.admits(player) || !preferences.has_preferences(&player.id) {
                continue;
            }
            players.push(player.id.clone());

            let Some(list) = preferences.get(&player.id) else {
                continue;
            };
            let mut player_edges = Vec::new();
            for edge in list.edges() {
                ranks.insert((edge.player.clone(), edge.role.clone()), edge.rank);

                let legality = match catalog.get(&edge.role) {
                    Some(role) => evaluator.evaluate(player, role, locks),
                    None => Legality::InvalidPreference,
                };
                if legality.is_legal() {
                    player_edges.push(CandidateEdge {
                        weight: policy.weight_for_rank(edge.rank),
                        player: edge.player,
                        role: edge.role,
                        rank: edge.rank,
                    });
                } else {
                    excluded.push(ExcludedEdge {
                        player: edge.player,
                        role: edge.role,
                        rank: edge.rank,
                        legality,
                    });
                }
            }
            player_edges.sort_by(|a, b| a.role.cmp(&b.role));
            edges.extend(player_edges);
        }

        // Forced-in locks skip the evaluator; hard avoidance still has to see them.
        let hard_avoided: BTreeSet<(PlayerId, RoleId)> = if policy.avoidance == AvoidanceMode::Hard {
            locks
                .forced_in()
                .into_iter()
                .filter(|lock| {
                    preferences
                        .get(&lock.player)
                        .is_some_and(|list| list.avoids(&lock.role))
                })
                .map(|lock| (lock.player, lock.role))
                .collect()
        } else {
            BTreeSet::new()
        };

        tracing::debug!(
            round = %round,
            players = players.len(),
            roles = roles.len(),
            edges = edges.len(),
            excluded = excluded.len(),
            "built candidate graph"
        );

        Self {
            players,
            roles,
            edges,
            excluded,
            ranks,
            hard_avoided,
            max_weight: policy.weight_for_rank(1),
        }
    }

    /// Players considered for organic matching, ascending.
    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    /// Roles of the round, ascending.
    pub fn roles(&self) -> &[RoleSlot] {
        &self.roles
    }

    pub fn role(&self, id: &RoleId) -> Option<&RoleSlot> {
        self.roles
            .binary_search_by(|slot| slot.role.cmp(id))
            .ok()
            .map(|idx| &self.roles[idx])
    }

    pub fn edges(&self) -> &[CandidateEdge] {
        &self.edges
    }

    pub fn excluded(&self) -> &[ExcludedEdge] {
        &self.excluded
    }

    /// Declared rank of a pair, legal or not.
    pub fn rank_of(&self, player: &PlayerId, role: &RoleId) -> Option<u32> {
        self.ranks.get(&(player.clone(), role.clone())).copied()
    }

    /// A forced-in pair the player avoids while avoidance is hard.
    pub fn is_hard_avoided(&self, player: &PlayerId, role: &RoleId) -> bool {
        self.hard_avoided.contains(&(player.clone(), role.clone()))
    }

    /// Weight of a first choice; no listed rank scores higher.
    pub fn max_weight(&self) -> u64 {
        self.max_weight
    }

    /// Weight of a listed rank, never below 1.
    pub fn weight_for(&self, rank: u32) -> u64 {
        (self.max_weight + 1).saturating_sub(u64::from(rank)).max(1)
    }
}
