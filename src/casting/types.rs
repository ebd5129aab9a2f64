use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Roster identifier of a player.
    PlayerId
);
string_id!(
    /// Identifier of an assignable role (character or quest role).
    RoleId
);
string_id!(
    /// Role category, e.g. the main cast or a named quest type.
    CategoryId
);
string_id!(
    /// Roles sharing a mirror group are substitutes: at most one is filled.
    MirrorGroupId
);
string_id!(FactionId);
string_id!(TicketTier);

/// A participant as supplied by the registration side. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    #[serde(default)]
    pub name: String,
    pub ticket_tier: TicketTier,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub factions: BTreeSet<FactionId>,
}

impl Player {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }
}

fn default_capacity() -> u32 {
    1
}

/// An assignable role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    #[serde(default)]
    pub name: String,
    pub category: CategoryId,
    #[serde(default)]
    pub mirror_group: Option<MirrorGroupId>,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub faction: Option<FactionId>,
}

impl Role {
    /// Seats this role can offer on its own. A mirrored role never seats more
    /// than one player since its whole group shares a single seat.
    pub fn effective_capacity(&self) -> u32 {
        if self.mirror_group.is_some() {
            self.capacity.min(1)
        } else {
            self.capacity
        }
    }
}

/// The eligible players for a casting round, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    players: BTreeMap<PlayerId, Player>,
}

impl Roster {
    pub fn new(players: impl IntoIterator<Item = Player>) -> Self {
        Self {
            players: players.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.contains_key(id)
    }

    /// Players in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Catalog of assignable roles across all categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleCatalog {
    roles: BTreeMap<RoleId, Role>,
}

impl RoleCatalog {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    pub fn get(&self, id: &RoleId) -> Option<&Role> {
        self.roles.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Roles of one category in ascending id order.
    pub fn in_category<'a>(&'a self, category: &'a CategoryId) -> impl Iterator<Item = &'a Role> {
        self.roles.values().filter(move |r| &r.category == category)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// One ranked entry of a player's list. Rank 1 is the most wanted role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PreferenceEdge {
    pub player: PlayerId,
    pub role: RoleId,
    pub rank: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolarity {
    ForcedIn,
    ForcedOut,
}

/// A staff pin on a (player, role) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockEntry {
    pub player: PlayerId,
    pub role: RoleId,
    pub polarity: LockPolarity,
}

impl LockEntry {
    pub fn forced_in(player: PlayerId, role: RoleId) -> Self {
        Self {
            player,
            role,
            polarity: LockPolarity::ForcedIn,
        }
    }

    pub fn forced_out(player: PlayerId, role: RoleId) -> Self {
        Self {
            player,
            role,
            polarity: LockPolarity::ForcedOut,
        }
    }
}

/// Identifies a casting round. One round exists per role category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundKey {
    pub category: CategoryId,
}

impl RoundKey {
    pub fn new(category: impl Into<CategoryId>) -> Self {
        Self {
            category: category.into(),
        }
    }
}

impl fmt::Display for RoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "casting round '{}'", self.category)
    }
}

/// Result of one optimizer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// role -> occupants, occupants in ascending id order
    pub occupants: BTreeMap<RoleId, Vec<PlayerId>>,
    pub unmatched_players: Vec<PlayerId>,
    pub unfilled_roles: Vec<RoleId>,
    /// Rank of the role each considered player received, `None` when the
    /// player got nothing from their list.
    pub satisfied_rank: BTreeMap<PlayerId, Option<u32>>,
    /// Sum of preference weights over matched listed pairs.
    pub total_weight: u64,
}

impl Assignment {
    pub fn role_of(&self, player: &PlayerId) -> Option<&RoleId> {
        self.occupants
            .iter()
            .find(|(_, occupants)| occupants.contains(player))
            .map(|(role, _)| role)
    }

    pub fn occupant_count(&self, role: &RoleId) -> usize {
        self.occupants.get(role).map(Vec::len).unwrap_or(0)
    }

    /// All (player, role) pairs ordered by role then player.
    pub fn pairs(&self) -> impl Iterator<Item = (&PlayerId, &RoleId)> {
        self.occupants
            .iter()
            .flat_map(|(role, players)| players.iter().map(move |p| (p, role)))
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn mirrored_roles_seat_at_most_one() {
        assert_eq!(role("a", Some("m"), 3).effective_capacity(), 1);
        assert_eq!(role("a", Some("m"), 0).effective_capacity(), 0);
        assert_eq!(role("a", None, 3).effective_capacity(), 3);
    }

    #[test]
    fn catalog_filters_by_category_in_id_order() {
        let mut quest = role("q1", None, 1);
        quest.category = CategoryId::from("quest");
        let catalog = RoleCatalog::new(vec![role("b", None, 1), quest, role("a", None, 1)]);

        let main = CategoryId::from("main");
        let ids: Vec<&str> = catalog.in_category(&main).map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn role_deserializes_with_default_capacity() {
        let role: Role = serde_json::from_str(r#"{"id":"r","category":"main"}"#).unwrap();
        assert_eq!(role.capacity, 1);
        assert!(role.mirror_group.is_none());
    }

    #[test]
    fn assignment_lookups() {
        let mut assignment = Assignment::default();
        assignment.occupants.insert(
            RoleId::from("r"),
            vec![PlayerId::from("p1"), PlayerId::from("p2")],
        );

        assert_eq!(assignment.role_of(&PlayerId::from("p2")), Some(&RoleId::from("r")));
        assert_eq!(assignment.occupant_count(&RoleId::from("r")), 2);
        assert_eq!(assignment.pairs().count(), 2);
        assert!(!assignment.is_empty());
    }
}
