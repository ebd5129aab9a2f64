use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::casting::types::{Player, TicketTier};
use crate::error::{CastingError, Result};

/// Whether avoided roles only raise a flag or remove the candidate edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvoidanceMode {
    #[default]
    Soft,
    Hard,
}

/// Casting rules configured by the organisers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastingPolicy {
    pub min_preferences: u32,
    pub max_preferences: u32,
    pub faction_filter: bool,
    pub avoidance: AvoidanceMode,
    /// Ticket tiers taking part in casting. `None` admits every tier.
    pub eligible_tiers: Option<BTreeSet<TicketTier>>,
    pub membership_required: bool,
}

impl Default for CastingPolicy {
    fn default() -> Self {
        Self {
            min_preferences: 1,
            max_preferences: 5,
            faction_filter: false,
            avoidance: AvoidanceMode::Soft,
            eligible_tiers: None,
            membership_required: false,
        }
    }
}

impl CastingPolicy {
    /// Reads the policy from `CASTING_*` environment variables, keeping the
    /// default for anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let eligible_tiers = env_string("CASTING_ELIGIBLE_TIERS").and_then(|raw| {
            let tiers: BTreeSet<TicketTier> = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(TicketTier::from)
                .collect();
            if tiers.is_empty() {
                None
            } else {
                Some(tiers)
            }
        });

        let avoidance = match env_string("CASTING_AVOIDANCE").as_deref() {
            Some("hard") => AvoidanceMode::Hard,
            Some("soft") => AvoidanceMode::Soft,
            _ => defaults.avoidance,
        };

        Self {
            min_preferences: env_parse("CASTING_MIN_PREFERENCES").unwrap_or(defaults.min_preferences),
            max_preferences: env_parse("CASTING_MAX_PREFERENCES").unwrap_or(defaults.max_preferences),
            faction_filter: env_string("CASTING_FACTION_FILTER")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.faction_filter),
            avoidance,
            eligible_tiers,
            membership_required: env_string("CASTING_MEMBERSHIP_REQUIRED")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.membership_required),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_preferences == 0 {
            return Err(CastingError::InvalidPolicy(
                "max_preferences must be at least 1".to_string(),
            ));
        }
        if self.min_preferences > self.max_preferences {
            return Err(CastingError::InvalidPolicy(format!(
                "min_preferences ({}) exceeds max_preferences ({})",
                self.min_preferences, self.max_preferences
            )));
        }
        Ok(())
    }

    /// Roster-level eligibility: ticket tier and membership.
    pub fn admits(&self, player: &Player) -> bool {
        if self.membership_required && !player.is_member {
            return false;
        }
        match &self.eligible_tiers {
            Some(tiers) => tiers.contains(&player.ticket_tier),
            None => true,
        }
    }

    /// Preference weight for a rank: `max_preferences - rank + 1`.
    pub fn weight_for_rank(&self, rank: u32) -> u64 {
        u64::from(self.max_preferences.saturating_sub(rank)) + 1
    }
}

/// Settings for the staff console server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub admin_password: String,
    pub store_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("CASTING_PORT").unwrap_or(8080),
            admin_password: env_string("ADMIN_PASSWORD").unwrap_or_else(|| "admin123".to_string()),
            store_dir: env_string("CASTING_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("casting_rounds")),
        }
    }
}

/// Loads `.env` if present. Missing files are not an error.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Parses a boolean value from various string representations
pub fn parse_bool(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower == "yes" || lower == "true" || lower == "1"
}
