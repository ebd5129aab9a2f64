use std::collections::{BTreeMap, BTreeSet};

use pathfinding::kuhn_munkres::kuhn_munkres_min;
use pathfinding::matrix::Matrix;

use super::graph::{CandidateEdge, CandidateGraph};
use super::types::{Assignment, LockEntry, LockPolarity, MirrorGroupId, PlayerId, RoleId};
use crate::error::{CastingError, ConflictReason, LockConflict, Result};

/// Solves the assignment problem over a candidate graph.
///
/// Implementations must be deterministic: the same graph and locks always
/// produce the same assignment.
pub trait Optimizer {
    fn solve(&self, graph: &CandidateGraph, forced_in: &[LockEntry]) -> Result<Assignment>;
}

/// Maximum-weight assignment with the Hungarian method.
///
/// Forced-in locks are seated first. The remaining players are the rows of
/// a cost matrix whose columns are one per free seat of a plain role, one
/// per open mirror group (costed at the player's best role in the group),
/// and one "unmatched" column per player.
///
/// Among matchings of equal total weight the larger one wins. Remaining ties
/// go to the matching with the smallest sum of `player_index * roles +
/// role_index`, indices taken in ascending id order.
#[derive(Debug, Clone, Copy, Default)]
pub struct HungarianOptimizer;

// Any positive cost works: a free unmatched column is always cheaper.
const FORBIDDEN: i64 = 1;
const UNMATCHED: i64 = 0;

#[derive(Debug, Clone, Copy)]
enum Column<'g> {
    Seat(usize),
    Group(&'g MirrorGroupId),
    Unmatched,
}

impl Optimizer for HungarianOptimizer {
    fn solve(&self, graph: &CandidateGraph, forced_in: &[LockEntry]) -> Result<Assignment> {
        let forced: Vec<&LockEntry> = forced_in
            .iter()
            .filter(|l| l.polarity == LockPolarity::ForcedIn)
            .collect();

        let conflicts = find_lock_conflicts(graph, &forced);
        if !conflicts.is_empty() {
            tracing::warn!(conflicts = conflicts.len(), "forced-in locks cannot all be honored");
            return Err(CastingError::LockConflict(conflicts));
        }

        // Seat the forced-in players first.
        let mut occupants: BTreeMap<RoleId, Vec<PlayerId>> = BTreeMap::new();
        let mut seats: BTreeMap<&RoleId, u32> = graph
            .roles()
            .iter()
            .map(|slot| (&slot.role, slot.capacity))
            .collect();
        let mut taken_groups: BTreeSet<&MirrorGroupId> = BTreeSet::new();
        let mut pinned: BTreeMap<&PlayerId, &RoleId> = BTreeMap::new();

        for lock in &forced {
            occupants
                .entry(lock.role.clone())
                .or_default()
                .push(lock.player.clone());
            if let Some(free) = seats.get_mut(&lock.role) {
                *free = free.saturating_sub(1);
            }
            if let Some(group) = graph.role(&lock.role).and_then(|s| s.mirror_group.as_ref()) {
                taken_groups.insert(group);
            }
            pinned.insert(&lock.player, &lock.role);
        }

        let players: Vec<&PlayerId> = graph
            .players()
            .iter()
            .filter(|p| !pinned.contains_key(p))
            .collect();
        let player_index: BTreeMap<&PlayerId, usize> =
            players.iter().enumerate().map(|(i, p)| (*p, i)).collect();
        let role_index: BTreeMap<&RoleId, usize> = graph
            .roles()
            .iter()
            .enumerate()
            .map(|(i, s)| (&s.role, i))
            .collect();

        let costs = CostScale::new(players.len(), graph.roles().len(), graph.max_weight()).ok_or(
            CastingError::RoundTooLarge {
                players: players.len(),
                roles: graph.roles().len(),
            },
        )?;

        let mut columns: Vec<Column> = Vec::new();
        for (ri, slot) in graph.roles().iter().enumerate() {
            let free = seats.get(&slot.role).copied().unwrap_or(0);
            if slot.mirror_group.is_none() {
                columns.extend(std::iter::repeat(Column::Seat(ri)).take(free as usize));
            }
        }
        let open_groups: BTreeSet<&MirrorGroupId> = graph
            .roles()
            .iter()
            .filter(|s| seats.get(&s.role).copied().unwrap_or(0) > 0)
            .filter_map(|s| s.mirror_group.as_ref())
            .filter(|g| !taken_groups.contains(g))
            .collect();
        columns.extend(open_groups.iter().map(|g| Column::Group(*g)));
        columns.extend(std::iter::repeat(Column::Unmatched).take(players.len()));

        // Legal edges by (row, role index), and each row's cheapest role per open group.
        let mut edge_at: BTreeMap<(usize, usize), (&CandidateEdge, i64)> = BTreeMap::new();
        let mut best_in_group: BTreeMap<(usize, &MirrorGroupId), (i64, usize)> = BTreeMap::new();
        for edge in graph.edges() {
            let (Some(&pi), Some(&ri)) = (player_index.get(&edge.player), role_index.get(&edge.role))
            else {
                continue;
            };
            let slot = &graph.roles()[ri];
            if seats.get(&slot.role).copied().unwrap_or(0) == 0 {
                continue;
            }
            let cost = costs.edge_cost(edge.weight, pi, ri);
            edge_at.insert((pi, ri), (edge, cost));
            if let Some(group) = slot.mirror_group.as_ref().filter(|g| open_groups.contains(g)) {
                let best = best_in_group.entry((pi, group)).or_insert((cost, ri));
                if cost < best.0 {
                    *best = (cost, ri);
                }
            }
        }

        let cell = |row: usize, column: Column| -> i64 {
            match column {
                Column::Seat(ri) => edge_at
                    .get(&(row, ri))
                    .map(|(_, cost)| *cost)
                    .unwrap_or(FORBIDDEN),
                Column::Group(group) => best_in_group
                    .get(&(row, group))
                    .map(|(cost, _)| *cost)
                    .unwrap_or(FORBIDDEN),
                Column::Unmatched => UNMATCHED,
            }
        };

        let mut matched: BTreeMap<PlayerId, RoleId> = BTreeMap::new();
        let mut total_weight = 0u64;

        if !players.is_empty() {
            let matrix = Matrix::from_fn(players.len(), columns.len(), |(row, col)| {
                cell(row, columns[col])
            });
            let (_, picks) = kuhn_munkres_min(&matrix);

            for (row, col) in picks.into_iter().enumerate() {
                let ri = match columns[col] {
                    Column::Seat(ri) => ri,
                    Column::Group(group) => match best_in_group.get(&(row, group)) {
                        Some((_, ri)) => *ri,
                        None => continue,
                    },
                    Column::Unmatched => continue,
                };
                // a forbidden cell is never part of an optimum, but skip it all the same
                let Some((edge, _)) = edge_at.get(&(row, ri)) else {
                    continue;
                };
                occupants
                    .entry(edge.role.clone())
                    .or_default()
                    .push(edge.player.clone());
                matched.insert(edge.player.clone(), edge.role.clone());
                total_weight += edge.weight;
            }
        }

        for (player, role) in &pinned {
            if let Some(rank) = graph.rank_of(player, role) {
                total_weight += graph.weight_for(rank);
            }
            matched.insert((*player).clone(), (*role).clone());
        }

        for list in occupants.values_mut() {
            list.sort();
        }

        let assignment = assemble(graph, occupants, &matched, &pinned, total_weight);

        tracing::debug!(
            rows = players.len(),
            columns = columns.len(),
            matched = matched.len(),
            forced = pinned.len(),
            total_weight,
            "assignment solved"
        );

        Ok(assignment)
    }
}

fn assemble(
    graph: &CandidateGraph,
    occupants: BTreeMap<RoleId, Vec<PlayerId>>,
    matched: &BTreeMap<PlayerId, RoleId>,
    pinned: &BTreeMap<&PlayerId, &RoleId>,
    total_weight: u64,
) -> Assignment {
    let mut satisfied_rank = BTreeMap::new();
    let mut unmatched_players = Vec::new();

    for player in graph.players() {
        match matched.get(player) {
            Some(role) => {
                satisfied_rank.insert(player.clone(), graph.rank_of(player, role));
            }
            None => {
                satisfied_rank.insert(player.clone(), None);
                unmatched_players.push(player.clone());
            }
        }
    }
    for (player, role) in pinned {
        satisfied_rank.insert((*player).clone(), graph.rank_of(player, role));
    }

    let filled_groups: BTreeSet<&MirrorGroupId> = graph
        .roles()
        .iter()
        .filter(|s| occupants.get(&s.role).map(|o| !o.is_empty()).unwrap_or(false))
        .filter_map(|s| s.mirror_group.as_ref())
        .collect();

    let unfilled_roles = graph
        .roles()
        .iter()
        .filter(|s| occupants.get(&s.role).map(Vec::is_empty).unwrap_or(true))
        .filter(|s| match &s.mirror_group {
            Some(group) => !filled_groups.contains(group),
            None => true,
        })
        .map(|s| s.role.clone())
        .collect();

    Assignment {
        occupants,
        unmatched_players,
        unfilled_roles,
        satisfied_rank,
        total_weight,
    }
}

/// Checks forced-in locks for double bookings, exceeded capacity, several
/// roles of one mirror group being pinned at once, and pins onto a role the
/// player avoids under hard avoidance.
pub fn find_lock_conflicts(graph: &CandidateGraph, forced: &[&LockEntry]) -> Vec<LockConflict> {
    let mut by_role: BTreeMap<&RoleId, Vec<&PlayerId>> = BTreeMap::new();
    for lock in forced {
        by_role.entry(&lock.role).or_default().push(&lock.player);
    }

    let mut conflicts = Vec::new();
    let mut by_group: BTreeMap<&MirrorGroupId, BTreeSet<&RoleId>> = BTreeMap::new();

    for (role, players) in &by_role {
        let slot = graph.role(role);
        let capacity = slot.map(|s| s.capacity).unwrap_or(0);
        if let Some(group) = slot.and_then(|s| s.mirror_group.as_ref()) {
            by_group.entry(group).or_default().insert(*role);
        }
        if (players.len() as u32) <= capacity {
            continue;
        }

        let reason = if capacity == 1 {
            ConflictReason::DoubleBooked {
                role: (*role).clone(),
            }
        } else {
            ConflictReason::CapacityExceeded {
                role: (*role).clone(),
                capacity,
            }
        };
        conflicts.push(LockConflict {
            reason,
            pairs: pairs_on(&by_role, std::iter::once(*role)),
        });
    }

    for (group, roles) in by_group {
        if roles.len() > 1 {
            conflicts.push(LockConflict {
                reason: ConflictReason::MirrorGroup {
                    group: group.clone(),
                },
                pairs: pairs_on(&by_role, roles.into_iter()),
            });
        }
    }

    for lock in forced {
        if graph.is_hard_avoided(&lock.player, &lock.role) {
            conflicts.push(LockConflict {
                reason: ConflictReason::AvoidedRole {
                    role: lock.role.clone(),
                },
                pairs: vec![(lock.player.clone(), lock.role.clone())],
            });
        }
    }

    conflicts
}

fn pairs_on<'a>(
    by_role: &BTreeMap<&'a RoleId, Vec<&'a PlayerId>>,
    roles: impl Iterator<Item = &'a RoleId>,
) -> Vec<(PlayerId, RoleId)> {
    let mut pairs: Vec<(PlayerId, RoleId)> = roles
        .flat_map(|role| {
            by_role
                .get(role)
                .into_iter()
                .flatten()
                .map(move |player| ((*player).clone(), role.clone()))
        })
        .collect();
    pairs.sort();
    pairs
}

/// Integer cost encoding that makes a minimum-cost assignment optimize, in
/// order: total preference weight, number of matched players, then the
/// (player, role) index order.
#[derive(Debug, Clone, Copy)]
struct CostScale {
    cardinality_unit: i64,
    weight_unit: i64,
    roles: i64,
}

impl CostScale {
    /// `None` when the costs of a full matching would not fit in an `i64`.
    fn new(players: usize, roles: usize, max_weight: u64) -> Option<Self> {
        let p = i64::try_from(players.max(1)).ok()?;
        let r = i64::try_from(roles.max(1)).ok()?;
        let tie_span = p.checked_mul(r)?;
        // a matching has at most `p` edges
        let cardinality_unit = p.checked_mul(tie_span)?.checked_add(1)?;
        let weight_unit = p
            .checked_mul(cardinality_unit.checked_add(tie_span)?)?
            .checked_add(1)?;
        let widest = i64::try_from(max_weight)
            .ok()?
            .checked_mul(weight_unit)?
            .checked_add(cardinality_unit)?;
        p.checked_mul(widest)?;
        Some(Self {
            cardinality_unit,
            weight_unit,
            roles: r,
        })
    }

    fn edge_cost(&self, weight: u64, player: usize, role: usize) -> i64 {
        // weights never exceed the max weight checked in `new`
        let weight = weight as i64;
        let tie = player as i64 * self.roles + role as i64;
        -(weight * self.weight_unit) - self.cardinality_unit + tie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casting::locks::LockState;
    use crate::casting::preferences::{PreferenceSet, PreferenceSubmission};
    use crate::casting::types::{CategoryId, Player, Role, RoleCatalog, Roster, RoundKey, TicketTier};
    use crate::config::CastingPolicy;

    fn player(id: &str) -> Player {
        Player {
            id: PlayerId::from(id),
            name: String::new(),
            ticket_tier: TicketTier::from("standard"),
            is_member: true,
            factions: Default::default(),
        }
    }

    fn role(id: &str, mirror: Option<&str>, capacity: u32) -> Role {
        Role {
            id: RoleId::from(id),
            name: String::new(),
            category: CategoryId::from("main"),
            mirror_group: mirror.map(MirrorGroupId::from),
            capacity,
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

    fn solve(
        players: &[&str],
        roles: Vec<Role>,
        subs: &[PreferenceSubmission],
        locks: &LockState,
    ) -> Result<Assignment> {
        let policy = CastingPolicy::default();
        let round = RoundKey::new("main");
        let roster = Roster::new(players.iter().map(|p| player(p)));
        let catalog = RoleCatalog::new(roles);
        let prefs = PreferenceSet::build(&round, subs, &catalog, &policy).unwrap();
        let graph = CandidateGraph::build(&policy, &round, &roster, &catalog, &prefs, locks);
        HungarianOptimizer.solve(&graph, &locks.forced_in())
    }

    fn role_of<'a>(assignment: &'a Assignment, player: &str) -> Option<&'a str> {
        assignment.role_of(&PlayerId::from(player)).map(RoleId::as_str)
    }

    #[test]
    fn reassigns_to_seat_everyone() {
        let assignment = solve(
            &["p1", "p2"],
            vec![role("a", None, 1), role("b", None, 1)],
            &[submission("p1", &["a", "b"]), submission("p2", &["a"])],
            &LockState::new(),
        )
        .unwrap();

        assert_eq!(role_of(&assignment, "p1"), Some("b"));
        assert_eq!(role_of(&assignment, "p2"), Some("a"));
        assert!(assignment.unmatched_players.is_empty());
        assert_eq!(assignment.total_weight, 5 + 4);
    }

    #[test]
    fn ties_go_to_the_lower_player_id() {
        let assignment = solve(
            &["p2", "p1"],
            vec![role("a", None, 1)],
            &[submission("p2", &["a"]), submission("p1", &["a"])],
            &LockState::new(),
        )
        .unwrap();

        assert_eq!(role_of(&assignment, "p1"), Some("a"));
        assert_eq!(assignment.unmatched_players, vec![PlayerId::from("p2")]);
        assert_eq!(assignment.satisfied_rank[&PlayerId::from("p2")], None);
    }

    #[test]
    fn multi_seat_roles_fill_up_to_capacity() {
        let assignment = solve(
            &["p1", "p2", "p3"],
            vec![role("crowd", None, 2)],
            &[
                submission("p1", &["crowd"]),
                submission("p2", &["crowd"]),
                submission("p3", &["crowd"]),
            ],
            &LockState::new(),
        )
        .unwrap();

        assert_eq!(assignment.occupant_count(&RoleId::from("crowd")), 2);
        assert_eq!(assignment.unmatched_players, vec![PlayerId::from("p3")]);
    }

    #[test]
    fn mirror_group_seats_only_one() {
        let assignment = solve(
            &["p1", "p2"],
            vec![role("twin_a", Some("twins"), 1), role("twin_b", Some("twins"), 1)],
            &[submission("p1", &["twin_a"]), submission("p2", &["twin_b"])],
            &LockState::new(),
        )
        .unwrap();

        let filled = assignment.occupants.values().filter(|o| !o.is_empty()).count();
        assert_eq!(filled, 1);
        assert_eq!(role_of(&assignment, "p1"), Some("twin_a"));
        // the empty twin is not reported as unfilled
        assert!(assignment.unfilled_roles.is_empty());
    }

    #[test]
    fn forced_in_wins_over_preference() {
        let mut locks = LockState::new();
        locks
            .toggle(&PlayerId::from("p2"), &RoleId::from("a"))
            .unwrap();

        let assignment = solve(
            &["p1", "p2"],
            vec![role("a", None, 1), role("b", None, 1)],
            &[submission("p1", &["a"]), submission("p2", &["b"])],
            &locks,
        )
        .unwrap();

        assert_eq!(role_of(&assignment, "p2"), Some("a"));
        assert_eq!(assignment.satisfied_rank[&PlayerId::from("p2")], None);
        assert_eq!(assignment.unmatched_players, vec![PlayerId::from("p1")]);
        assert_eq!(assignment.unfilled_roles, vec![RoleId::from("b")]);
    }

    #[test]
    fn double_booked_forced_in_is_a_conflict() {
        let mut locks = LockState::new();
        locks.toggle(&PlayerId::from("p"), &RoleId::from("r")).unwrap();
        locks.toggle(&PlayerId::from("q"), &RoleId::from("r")).unwrap();

        let err = solve(&["p", "q"], vec![role("r", None, 1)], &[], &locks).unwrap_err();

        let CastingError::LockConflict(conflicts) = err else {
            panic!("expected a lock conflict");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].pairs,
            vec![
                (PlayerId::from("p"), RoleId::from("r")),
                (PlayerId::from("q"), RoleId::from("r")),
            ]
        );
    }

    #[test]
    fn forced_in_on_two_mirrored_roles_conflicts() {
        let mut locks = LockState::new();
        locks.toggle(&PlayerId::from("p"), &RoleId::from("r")).unwrap();
        locks.toggle(&PlayerId::from("q"), &RoleId::from("s")).unwrap();

        let err = solve(
            &["p", "q"],
            vec![role("r", Some("m"), 1), role("s", Some("m"), 1)],
            &[],
            &locks,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            CastingError::LockConflict(ref c) if matches!(c[0].reason, ConflictReason::MirrorGroup { .. })
        ));
    }

    #[test]
    fn forced_in_on_foreign_role_exceeds_capacity() {
        let mut locks = LockState::new();
        locks
            .toggle(&PlayerId::from("p"), &RoleId::from("elsewhere"))
            .unwrap();

        let err = solve(&["p"], vec![role("r", None, 1)], &[], &locks).unwrap_err();
        assert!(matches!(
            err,
            CastingError::LockConflict(ref c)
                if c[0].reason == ConflictReason::CapacityExceeded { role: RoleId::from("elsewhere"), capacity: 0 }
        ));
    }

    #[test]
    fn solving_twice_gives_identical_results() {
        let roles = vec![role("a", None, 1), role("b", None, 1), role("c", None, 1)];
        let subs = [
            submission("p1", &["a", "b"]),
            submission("p2", &["a", "b"]),
            submission("p3", &["b", "a"]),
        ];
        let first = solve(&["p1", "p2", "p3"], roles.clone(), &subs, &LockState::new()).unwrap();
        let second = solve(&["p1", "p2", "p3"], roles, &subs, &LockState::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mirror_group_seats_the_players_better_twin() {
        let assignment = solve(
            &["p1"],
            vec![role("twin_a", Some("twins"), 1), role("twin_b", Some("twins"), 1)],
            &[submission("p1", &["twin_b", "twin_a"])],
            &LockState::new(),
        )
        .unwrap();

        assert_eq!(role_of(&assignment, "p1"), Some("twin_b"));
        assert_eq!(assignment.satisfied_rank[&PlayerId::from("p1")], Some(1));
    }

    #[test]
    fn pinned_twin_closes_the_group_for_everyone_else() {
        let mut locks = LockState::new();
        locks.toggle(&PlayerId::from("z"), &RoleId::from("twin_a")).unwrap();

        let assignment = solve(
            &["p1", "z"],
            vec![role("twin_a", Some("twins"), 1), role("twin_b", Some("twins"), 1)],
            &[submission("p1", &["twin_b"])],
            &locks,
        )
        .unwrap();

        assert_eq!(role_of(&assignment, "z"), Some("twin_a"));
        assert_eq!(assignment.unmatched_players, vec![PlayerId::from("p1")]);
    }

    #[test]
    fn oversized_rounds_are_refused_by_the_cost_scale() {
        assert!(CostScale::new(3, 3, 5).is_some());
        assert!(CostScale::new(3_000_000, 3_000_000, 5).is_none());
        assert!(CostScale::new(2, 2, u64::MAX).is_none());
    }
}
