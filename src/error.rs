use std::fmt;

use serde::{Deserialize, Serialize};

use crate::casting::types::{CategoryId, MirrorGroupId, PlayerId, RoleId, RoundKey};

pub type Result<T> = std::result::Result<T, CastingError>;

/// Errors raised by the casting engine.
///
/// Everything except `Store` is recoverable inside a staff session: the
/// caller fixes the input or toggles locks and tries again.
#[derive(Debug, thiserror::Error)]
pub enum CastingError {
    #[error("invalid preference list for {player}: {violation}")]
    InvalidPreferenceList {
        player: PlayerId,
        violation: PreferenceViolation,
    },

    #[error("forced-in locks conflict: {}", format_conflicts(.0))]
    LockConflict(Vec<LockConflict>),

    #[error("{0} has already been committed")]
    AlreadyCommitted(RoundKey),

    #[error("commit requires an explicit staff confirmation")]
    NotConfirmed,

    #[error("no simulation has been run for this round")]
    NoSimulation,

    #[error("simulation is stale: computed at revision {simulated}, session is at {current}")]
    StaleSimulation { simulated: u64, current: u64 },

    #[error("unknown player: {0}")]
    UnknownPlayer(PlayerId),

    #[error("unknown role: {0}")]
    UnknownRole(RoleId),

    #[error("role {role} belongs to category {actual}, not {expected}")]
    RoleOutsideCategory {
        role: RoleId,
        expected: CategoryId,
        actual: CategoryId,
    },

    #[error("lock for {player} on {role} is finalized and cannot be changed")]
    FinalizedLock { player: PlayerId, role: RoleId },

    #[error("invalid casting policy: {0}")]
    InvalidPolicy(String),

    #[error("round of {players} players and {roles} roles is too large to solve")]
    RoundTooLarge { players: usize, roles: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a submitted preference list was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreferenceViolation {
    TooFew { count: usize, min: u32 },
    TooMany { count: usize, max: u32 },
    Duplicate { role: RoleId },
    UnknownRole { role: RoleId },
    WrongCategory { role: RoleId, category: CategoryId },
    AvoidsListedRole { role: RoleId },
}

impl fmt::Display for PreferenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceViolation::TooFew { count, min } => {
                write!(f, "{} preferences given, at least {} required", count, min)
            }
            PreferenceViolation::TooMany { count, max } => {
                write!(f, "{} preferences given, at most {} allowed", count, max)
            }
            PreferenceViolation::Duplicate { role } => write!(f, "{} is listed twice", role),
            PreferenceViolation::UnknownRole { role } => write!(f, "{} is not a known role", role),
            PreferenceViolation::WrongCategory { role, category } => {
                write!(f, "{} belongs to category {}", role, category)
            }
            PreferenceViolation::AvoidsListedRole { role } => {
                write!(f, "{} is both ranked and avoided", role)
            }
        }
    }
}

/// A set of forced-in locks that cannot all hold at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConflict {
    pub reason: ConflictReason,
    pub pairs: Vec<(PlayerId, RoleId)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictReason {
    /// Two or more players forced into a single-occupant role.
    DoubleBooked { role: RoleId },
    /// More players forced into a role than it has seats.
    CapacityExceeded { role: RoleId, capacity: u32 },
    /// Forced-in locks on different roles of one mirror group.
    MirrorGroup { group: MirrorGroupId },
    /// A forced-in lock onto a role the player avoids, under hard avoidance.
    AvoidedRole { role: RoleId },
}

impl fmt::Display for LockConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self
            .pairs
            .iter()
            .map(|(player, role)| format!("({}, {})", player, role))
            .collect::<Vec<_>>()
            .join(", ");
        match &self.reason {
            ConflictReason::DoubleBooked { role } => {
                write!(f, "{} double-booked by {}", role, pairs)
            }
            ConflictReason::CapacityExceeded { role, capacity } => {
                write!(f, "{} has {} seat(s) but is forced for {}", role, capacity, pairs)
            }
            ConflictReason::MirrorGroup { group } => {
                write!(f, "mirror group {} forced on several roles by {}", group, pairs)
            }
            ConflictReason::AvoidedRole { role } => {
                write!(f, "{} is avoided under hard avoidance but forced for {}", role, pairs)
            }
        }
    }
}

fn format_conflicts(conflicts: &[LockConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures of the durable commit store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store CSV failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("stored round is corrupt: {0}")]
    Corrupt(String),

    #[error("{0} is already stored")]
    AlreadyStored(RoundKey),
}
