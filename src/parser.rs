use csv::Reader;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;

use serde::Deserialize;

use crate::casting::preferences::{Avoidance, PreferenceSubmission};
use crate::casting::session::{CastingSnapshot, FinalizedPair};
use crate::casting::types::{
    CategoryId, FactionId, LockEntry, MirrorGroupId, Player, PlayerId, Role, RoleId, TicketTier,
};
use crate::config::parse_bool;

pub const PLAYERS_FILE: &str = "players.csv";
pub const ROLES_FILE: &str = "roles.csv";
pub const PREFERENCES_FILE: &str = "preferences.csv";
pub const LOCKS_FILE: &str = "locks.csv";

#[derive(Debug, Deserialize)]
struct PlayerRow {
    player_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    ticket_tier: String,
    #[serde(default)]
    member: String,
    #[serde(default)]
    factions: String,
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    role_id: String,
    #[serde(default)]
    name: String,
    category: String,
    #[serde(default)]
    mirror_group: String,
    #[serde(default)]
    capacity: String,
    #[serde(default)]
    faction: String,
}

#[derive(Debug, Deserialize)]
struct PreferenceRow {
    player_id: String,
    category: String,
    #[serde(default)]
    preferences: String,
    #[serde(default)]
    avoid: String,
    #[serde(default)]
    avoid_note: String,
}

#[derive(Debug, Deserialize)]
struct LockRow {
    player_id: String,
    role_id: String,
    polarity: String,
}

/// Locks file content: staff locks plus pairs finalized elsewhere.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockFile {
    pub locks: Vec<LockEntry>,
    pub finalized: Vec<FinalizedPair>,
}

/// Splits a `;` separated list column, dropping blanks
fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Empty string means "not set"
fn optional(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Loads the roster. Rows without a player id are skipped.
///
/// Columns: `player_id,name,ticket_tier,member,factions`
pub fn load_players<P: AsRef<Path>>(csv_path: P) -> Result<Vec<Player>, Box<dyn Error>> {
    let mut reader = Reader::from_path(csv_path)?;
    let mut players = Vec::new();

    for result in reader.deserialize() {
        let row: PlayerRow = result?;
        let Some(id) = optional(&row.player_id) else {
            continue;
        };
        players.push(Player {
            id: PlayerId::from(id),
            name: row.name.trim().to_string(),
            ticket_tier: TicketTier::from(row.ticket_tier.trim()),
            is_member: parse_bool(&row.member),
            factions: split_list(&row.factions).map(FactionId::from).collect(),
        });
    }

    Ok(players)
}

/// Loads the role catalog. An empty capacity means 1.
///
/// Columns: `role_id,name,category,mirror_group,capacity,faction`
pub fn load_roles<P: AsRef<Path>>(csv_path: P) -> Result<Vec<Role>, Box<dyn Error>> {
    let mut reader = Reader::from_path(csv_path)?;
    let mut roles = Vec::new();

    for result in reader.deserialize() {
        let row: RoleRow = result?;
        let Some(id) = optional(&row.role_id) else {
            continue;
        };
        let capacity = match optional(&row.capacity) {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|e| format!("role {}: invalid capacity '{}': {}", id, raw, e))?,
            None => 1,
        };
        roles.push(Role {
            id: RoleId::from(id),
            name: row.name.trim().to_string(),
            category: CategoryId::from(row.category.trim()),
            mirror_group: optional(&row.mirror_group).map(MirrorGroupId::from),
            capacity,
            faction: optional(&row.faction).map(FactionId::from),
        });
    }

    Ok(roles)
}

/// Loads preference submissions, keeping only the latest row per player and
/// category (resubmissions replace earlier answers).
///
/// Columns: `player_id,category,preferences,avoid,avoid_note`. `avoid_note`
/// holds one note per avoided role, in the same order.
pub fn load_preferences<P: AsRef<Path>>(
    csv_path: P,
) -> Result<Vec<PreferenceSubmission>, Box<dyn Error>> {
    let mut reader = Reader::from_path(csv_path)?;
    let mut latest: BTreeMap<(PlayerId, CategoryId), PreferenceSubmission> = BTreeMap::new();

    for result in reader.deserialize() {
        let row: PreferenceRow = result?;
        let Some(id) = optional(&row.player_id) else {
            continue;
        };
        let player = PlayerId::from(id);
        let category = CategoryId::from(row.category.trim());

        let notes: Vec<&str> = row.avoid_note.split(';').map(str::trim).collect();
        let avoid = split_list(&row.avoid)
            .enumerate()
            .map(|(idx, role)| Avoidance {
                role: RoleId::from(role),
                note: notes
                    .get(idx)
                    .copied()
                    .and_then(optional)
                    .map(str::to_string),
            })
            .collect();

        let submission = PreferenceSubmission {
            player: player.clone(),
            category: category.clone(),
            preferences: split_list(&row.preferences).map(RoleId::from).collect(),
            avoid,
        };
        if latest.insert((player, category), submission).is_some() {
            tracing::debug!(player = id, "resubmission replaces earlier preferences");
        }
    }

    Ok(latest.into_values().collect())
}

/// Loads locks. Polarity is `in`, `out` or `final`.
///
/// Columns: `player_id,role_id,polarity`
pub fn load_locks<P: AsRef<Path>>(csv_path: P) -> Result<LockFile, Box<dyn Error>> {
    let mut reader = Reader::from_path(csv_path)?;
    let mut file = LockFile::default();

    for result in reader.deserialize() {
        let row: LockRow = result?;
        let player = PlayerId::from(row.player_id.trim());
        let role = RoleId::from(row.role_id.trim());
        match row.polarity.trim().to_lowercase().as_str() {
            "in" => file.locks.push(LockEntry::forced_in(player, role)),
            "out" => file.locks.push(LockEntry::forced_out(player, role)),
            "final" => file.finalized.push(FinalizedPair { player, role }),
            other => {
                return Err(format!("unknown lock polarity '{}' for {} on {}", other, player, role).into())
            }
        }
    }

    Ok(file)
}

/// Loads a whole round from a directory holding the casting CSV files.
/// `locks.csv` is optional.
pub fn load_snapshot<P: AsRef<Path>>(dir: P, category: &str) -> Result<CastingSnapshot, Box<dyn Error>> {
    let dir = dir.as_ref();
    let players = load_players(dir.join(PLAYERS_FILE))?;
    let roles = load_roles(dir.join(ROLES_FILE))?;
    let submissions = load_preferences(dir.join(PREFERENCES_FILE))?;

    let locks_path = dir.join(LOCKS_FILE);
    let lock_file = if locks_path.exists() {
        load_locks(locks_path)?
    } else {
        LockFile::default()
    };

    Ok(CastingSnapshot {
        category: CategoryId::from(category),
        players,
        roles,
        submissions,
        finalized: lock_file.finalized,
        policy: None,
        locks: lock_file.locks,
    })
}
