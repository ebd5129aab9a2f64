use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::locks::LockState;
use super::preferences::PreferenceSet;
use super::types::{FactionId, MirrorGroupId, Player, PlayerId, Role, RoleCatalog, RoleId, RoundKey};
use crate::config::{AvoidanceMode, CastingPolicy};

/// Outcome of checking one (player, role) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Legality {
    Legal,
    /// Ticket tier or membership keeps the player out of casting.
    Ineligible,
    /// Role is not part of this round.
    InvalidPreference,
    /// Another role of the mirror group is already taken.
    MirrorBlocked { group: MirrorGroupId, by: PlayerId },
    FactionMismatch { required: FactionId },
    LockedOut,
    /// The player is pinned to another role.
    LockedElsewhere { role: RoleId },
    /// Every seat of the role is taken by someone else.
    AlreadyAssigned,
    /// Hard avoidance policy and the player listed the role as avoided.
    Avoided,
}

impl Legality {
    pub fn is_legal(&self) -> bool {
        matches!(self, Legality::Legal)
    }
}

/// Tentative occupants of roles and mirror groups, derived from forced-in locks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    by_role: BTreeMap<RoleId, BTreeSet<PlayerId>>,
    by_group: BTreeMap<MirrorGroupId, BTreeSet<PlayerId>>,
}

impl Occupancy {
    pub fn from_locks(locks: &LockState, catalog: &RoleCatalog) -> Self {
        let mut occupancy = Self::default();
        for entry in locks.forced_in() {
            if let Some(role) = catalog.get(&entry.role) {
                occupancy.occupy(entry.player, role);
            }
        }
        occupancy
    }

    pub fn occupy(&mut self, player: PlayerId, role: &Role) {
        if let Some(group) = &role.mirror_group {
            self.by_group
                .entry(group.clone())
                .or_default()
                .insert(player.clone());
        }
        self.by_role.entry(role.id.clone()).or_default().insert(player);
    }

    pub fn occupants(&self, role: &RoleId) -> impl Iterator<Item = &PlayerId> {
        self.by_role.get(role).into_iter().flatten()
    }

    pub fn group_occupants(&self, group: &MirrorGroupId) -> impl Iterator<Item = &PlayerId> {
        self.by_group.get(group).into_iter().flatten()
    }
}

/// Pure legality predicate over a snapshot of the round.
pub struct ConstraintEvaluator<'a> {
    policy: &'a CastingPolicy,
    round: &'a RoundKey,
    preferences: &'a PreferenceSet,
    tentative: &'a Occupancy,
}

impl<'a> ConstraintEvaluator<'a> {
    pub fn new(
        policy: &'a CastingPolicy,
        round: &'a RoundKey,
        preferences: &'a PreferenceSet,
        tentative: &'a Occupancy,
    ) -> Self {
        Self {
            policy,
            round,
            preferences,
            tentative,
        }
    }

    pub fn is_legal(&self, player: &Player, role: &Role, locks: &LockState) -> bool {
        self.evaluate(player, role, locks).is_legal()
    }

    /// Applies the rules in order and reports the first one that fails.
    pub fn evaluate(&self, player: &Player, role: &Role, locks: &LockState) -> Legality {
        if !self.policy.admits(player) {
            return Legality::Ineligible;
        }
        if role.category != self.round.category {
            return Legality::InvalidPreference;
        }

        if let Some(group) = &role.mirror_group {
            if let Some(other) = self.tentative.group_occupants(group).find(|p| *p != &player.id) {
                return Legality::MirrorBlocked {
                    group: group.clone(),
                    by: other.clone(),
                };
            }
        }

        if self.policy.faction_filter {
            if let Some(required) = &role.faction {
                if !player.factions.contains(required) {
                    return Legality::FactionMismatch {
                        required: required.clone(),
                    };
                }
            }
        }

        if locks.is_forced_out(&player.id, &role.id) {
            return Legality::LockedOut;
        }

        if let Some(pinned) = locks.forced_in_for(&player.id) {
            if pinned != &role.id {
                return Legality::LockedElsewhere {
                    role: pinned.clone(),
                };
            }
        }

        let others = self
            .tentative
            .occupants(&role.id)
            .filter(|p| *p != &player.id)
            .count();
        if others >= role.effective_capacity() as usize {
            return Legality::AlreadyAssigned;
        }

        if self.policy.avoidance == AvoidanceMode::Hard {
            let avoided = self
                .preferences
                .get(&player.id)
                .map(|list| list.avoids(&role.id))
                .unwrap_or(false);
            if avoided {
                return Legality::Avoided;
            }
        }

        Legality::Legal
    }
}
