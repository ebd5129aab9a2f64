use std::collections::BTreeMap;

use serde::Serialize;

use super::preferences::PreferenceSet;
use super::types::{RoleCatalog, RoleId, RoundKey};

/// How often one role was requested, split by rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolePopularity {
    pub role: RoleId,
    pub name: String,
    /// rank -> number of players listing the role at that rank
    pub by_rank: BTreeMap<u32, usize>,
    pub total: usize,
    pub first_choice: usize,
    pub avoided: usize,
}

/// Demand overview of a round, computed from the submitted lists only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreferenceStats {
    pub round: RoundKey,
    pub players_with_preferences: usize,
    pub roles: BTreeMap<RoleId, RolePopularity>,
}

impl PreferenceStats {
    /// Every role of the round is present, including ones nobody listed.
    pub fn collect(preferences: &PreferenceSet, catalog: &RoleCatalog) -> Self {
        let round = preferences.round().clone();
        let mut roles: BTreeMap<RoleId, RolePopularity> = catalog
            .in_category(&round.category)
            .map(|role| {
                (
                    role.id.clone(),
                    RolePopularity {
                        role: role.id.clone(),
                        name: role.name.clone(),
                        by_rank: BTreeMap::new(),
                        total: 0,
                        first_choice: 0,
                        avoided: 0,
                    },
                )
            })
            .collect();

        for edge in preferences.edges() {
            if let Some(entry) = roles.get_mut(&edge.role) {
                *entry.by_rank.entry(edge.rank).or_insert(0) += 1;
                entry.total += 1;
                if edge.rank == 1 {
                    entry.first_choice += 1;
                }
            }
        }
        for list in preferences.iter() {
            for role in list.avoid.keys() {
                if let Some(entry) = roles.get_mut(role) {
                    entry.avoided += 1;
                }
            }
        }

        let players_with_preferences = preferences
            .iter()
            .filter(|list| !list.is_empty())
            .count();

        Self {
            round,
            players_with_preferences,
            roles,
        }
    }

    /// Most requested first; ties by first choices, then role id.
    pub fn popularity(&self) -> Vec<&RolePopularity> {
        let mut ranked: Vec<&RolePopularity> = self.roles.values().collect();
        ranked.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then(b.first_choice.cmp(&a.first_choice))
                .then(a.role.cmp(&b.role))
        });
        ranked
    }

    /// Roles nobody ranked.
    pub fn unrequested(&self) -> Vec<&RoleId> {
        self.roles
            .values()
            .filter(|r| r.total == 0)
            .map(|r| &r.role)
            .collect()
    }
}
