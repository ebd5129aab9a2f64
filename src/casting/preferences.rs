use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::types::{CategoryId, PlayerId, PreferenceEdge, RoleCatalog, RoleId, RoundKey};
use crate::config::CastingPolicy;
use crate::error::{CastingError, PreferenceViolation, Result};

/// A role the player asked not to be cast in, with an optional free-text note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avoidance {
    pub role: RoleId,
    #[serde(default)]
    pub note: Option<String>,
}

/// Raw preference submission for one category, most-wanted role first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceSubmission {
    pub player: PlayerId,
    pub category: CategoryId,
    #[serde(default)]
    pub preferences: Vec<RoleId>,
    #[serde(default)]
    pub avoid: Vec<Avoidance>,
}

/// A validated ranked list for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceList {
    pub player: PlayerId,
    pub ranked: Vec<RoleId>,
    pub avoid: BTreeMap<RoleId, Option<String>>,
}

impl PreferenceList {
    /// 1-based rank of `role` in this list.
    pub fn rank_of(&self, role: &RoleId) -> Option<u32> {
        self.ranked
            .iter()
            .position(|r| r == role)
            .map(|idx| idx as u32 + 1)
    }

    pub fn edges(&self) -> impl Iterator<Item = PreferenceEdge> + '_ {
        self.ranked.iter().enumerate().map(|(idx, role)| PreferenceEdge {
            player: self.player.clone(),
            role: role.clone(),
            rank: idx as u32 + 1,
        })
    }

    pub fn avoids(&self, role: &RoleId) -> bool {
        self.avoid.contains_key(role)
    }

    pub fn avoidance_note(&self, role: &RoleId) -> Option<&str> {
        self.avoid.get(role).and_then(|n| n.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Normalized preference lists of one casting round.
///
/// Built once per session and treated as an immutable snapshot afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceSet {
    round: RoundKey,
    max_rank: u32,
    lists: BTreeMap<PlayerId, PreferenceList>,
}

impl PreferenceSet {
    /// Validates and normalizes the submissions of `round`'s category.
    ///
    /// Submissions for other categories are ignored. A later submission of
    /// the same player replaces an earlier one. Empty lists count as "no
    /// preferences" and are not subject to the minimum.
    pub fn build(
        round: &RoundKey,
        submissions: &[PreferenceSubmission],
        catalog: &RoleCatalog,
        policy: &CastingPolicy,
    ) -> Result<Self> {
        let mut lists = BTreeMap::new();

        for submission in submissions.iter().filter(|s| s.category == round.category) {
            validate_submission(submission, catalog, policy).map_err(|violation| {
                CastingError::InvalidPreferenceList {
                    player: submission.player.clone(),
                    violation,
                }
            })?;

            if submission.preferences.is_empty() && submission.avoid.is_empty() {
                lists.remove(&submission.player);
                continue;
            }

            let list = PreferenceList {
                player: submission.player.clone(),
                ranked: submission.preferences.clone(),
                avoid: submission
                    .avoid
                    .iter()
                    .map(|a| (a.role.clone(), a.note.clone()))
                    .collect(),
            };
            lists.insert(submission.player.clone(), list);
        }

        tracing::debug!(round = %round, players = lists.len(), "built preference set");

        Ok(Self {
            round: round.clone(),
            max_rank: policy.max_preferences,
            lists,
        })
    }

    pub fn round(&self) -> &RoundKey {
        &self.round
    }

    /// Highest rank a list may carry; used to derive edge weights.
    pub fn max_rank(&self) -> u32 {
        self.max_rank
    }

    pub fn get(&self, player: &PlayerId) -> Option<&PreferenceList> {
        self.lists.get(player)
    }

    /// True when the player ranked at least one role.
    pub fn has_preferences(&self, player: &PlayerId) -> bool {
        self.lists.get(player).map(|l| !l.is_empty()).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PreferenceList> {
        self.lists.values()
    }

    /// Every ranked edge, ordered by player then rank.
    pub fn edges(&self) -> impl Iterator<Item = PreferenceEdge> + '_ {
        self.lists.values().flat_map(PreferenceList::edges)
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

/// Validates a single submission against the catalog and the count bounds.
pub fn validate_submission(
    submission: &PreferenceSubmission,
    catalog: &RoleCatalog,
    policy: &CastingPolicy,
) -> std::result::Result<(), PreferenceViolation> {
    let count = submission.preferences.len();

    if count > 0 && count < policy.min_preferences as usize {
        return Err(PreferenceViolation::TooFew {
            count,
            min: policy.min_preferences,
        });
    }
    if count > policy.max_preferences as usize {
        return Err(PreferenceViolation::TooMany {
            count,
            max: policy.max_preferences,
        });
    }

    let mut seen = BTreeSet::new();
    for role_id in &submission.preferences {
        let role = catalog
            .get(role_id)
            .ok_or_else(|| PreferenceViolation::UnknownRole {
                role: role_id.clone(),
            })?;
        if role.category != submission.category {
            return Err(PreferenceViolation::WrongCategory {
                role: role_id.clone(),
                category: role.category.clone(),
            });
        }
        if !seen.insert(role_id) {
            return Err(PreferenceViolation::Duplicate {
                role: role_id.clone(),
            });
        }
    }

    for avoidance in &submission.avoid {
        if catalog.get(&avoidance.role).is_none() {
            return Err(PreferenceViolation::UnknownRole {
                role: avoidance.role.clone(),
            });
        }
        if seen.contains(&avoidance.role) {
            return Err(PreferenceViolation::AvoidsListedRole {
                role: avoidance.role.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casting::types::Role;

    fn catalog() -> RoleCatalog {
        let role = |id: &str, category: &str| Role {
            id: RoleId::from(id),
            name: String::new(),
            category: CategoryId::from(category),
            mirror_group: None,
            capacity: 1,
            faction: None,
        };
        RoleCatalog::new(vec![
            role("a", "main"),
            role("b", "main"),
            role("c", "main"),
            role("q", "quest"),
        ])
    }

    fn submission(player: &str, prefs: &[&str]) -> PreferenceSubmission {
        PreferenceSubmission {
            player: PlayerId::from(player),
            category: CategoryId::from("main"),
            preferences: prefs.iter().map(|r| RoleId::from(*r)).collect(),
            avoid: Vec::new(),
        }
    }

    fn build(subs: &[PreferenceSubmission], policy: &CastingPolicy) -> Result<PreferenceSet> {
        PreferenceSet::build(&RoundKey::new("main"), subs, &catalog(), policy)
    }

    #[test]
    fn ranks_are_contiguous_from_one() {
        let set = build(&[submission("p", &["b", "a", "c"])], &CastingPolicy::default()).unwrap();
        let ranks: Vec<(String, u32)> = set
            .edges()
            .map(|e| (e.role.to_string(), e.rank))
            .collect();
        assert_eq!(
            ranks,
            vec![("b".into(), 1), ("a".into(), 2), ("c".into(), 3)]
        );
    }

    #[test]
    fn rejects_duplicates() {
        let err = build(&[submission("p", &["a", "a"])], &CastingPolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            CastingError::InvalidPreferenceList {
                violation: PreferenceViolation::Duplicate { .. },
                ..
            }
        ));
    }

    #[test]
    fn rejects_out_of_bound_counts() {
        let policy = CastingPolicy {
            min_preferences: 2,
            max_preferences: 2,
            ..CastingPolicy::default()
        };
        let too_few = build(&[submission("p", &["a"])], &policy).unwrap_err();
        let too_many = build(&[submission("p", &["a", "b", "c"])], &policy).unwrap_err();

        assert!(matches!(
            too_few,
            CastingError::InvalidPreferenceList {
                violation: PreferenceViolation::TooFew { count: 1, min: 2 },
                ..
            }
        ));
        assert!(matches!(
            too_many,
            CastingError::InvalidPreferenceList {
                violation: PreferenceViolation::TooMany { count: 3, max: 2 },
                ..
            }
        ));
    }

    #[test]
    fn empty_list_means_no_preferences() {
        let policy = CastingPolicy {
            min_preferences: 3,
            ..CastingPolicy::default()
        };
        let set = build(&[submission("p", &[])], &policy).unwrap();
        assert!(!set.has_preferences(&PlayerId::from("p")));
    }

    #[test]
    fn rejects_roles_of_other_categories() {
        let err = build(&[submission("p", &["q"])], &CastingPolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            CastingError::InvalidPreferenceList {
                violation: PreferenceViolation::WrongCategory { .. },
                ..
            }
        ));
    }

    #[test]
    fn resubmission_replaces_earlier_list() {
        let set = build(
            &[submission("p", &["a"]), submission("p", &["c", "b"])],
            &CastingPolicy::default(),
        )
        .unwrap();
        let list = set.get(&PlayerId::from("p")).unwrap();
        assert_eq!(list.rank_of(&RoleId::from("c")), Some(1));
        assert_eq!(list.rank_of(&RoleId::from("a")), None);
    }

    #[test]
    fn avoiding_a_ranked_role_is_rejected() {
        let mut sub = submission("p", &["a"]);
        sub.avoid.push(Avoidance {
            role: RoleId::from("a"),
            note: None,
        });
        let err = build(&[sub], &CastingPolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            CastingError::InvalidPreferenceList {
                violation: PreferenceViolation::AvoidsListedRole { .. },
                ..
            }
        ));
    }

    #[test]
    fn keeps_avoidance_notes() {
        let mut sub = submission("p", &["a"]);
        sub.avoid.push(Avoidance {
            role: RoleId::from("b"),
            note: Some("played it last year".to_string()),
        });
        let set = build(&[sub], &CastingPolicy::default()).unwrap();
        let list = set.get(&PlayerId::from("p")).unwrap();

        assert!(list.avoids(&RoleId::from("b")));
        assert_eq!(list.avoidance_note(&RoleId::from("b")), Some("played it last year"));
    }
}
