use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::simulation::SimulationResult;
use super::types::{PlayerId, RoleId, RoundKey};
use crate::error::{CastingError, Result, StoreError};

/// Explicit sign-off by a staff member. Commit refuses to run without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffConfirmation {
    confirmed_by: String,
}

impl StaffConfirmation {
    pub fn confirm(confirmed_by: impl Into<String>) -> Result<Self> {
        let confirmed_by: String = confirmed_by.into();
        let confirmed_by = confirmed_by.trim().to_string();
        if confirmed_by.is_empty() {
            return Err(CastingError::NotConfirmed);
        }
        Ok(Self { confirmed_by })
    }

    pub fn confirmed_by(&self) -> &str {
        &self.confirmed_by
    }
}

/// One durable (player, role) pairing. `rank` is `None` when the player got
/// a role they never listed (forced-in by staff).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub player: PlayerId,
    pub role: RoleId,
    pub rank: Option<u32>,
}

/// The authoritative assignment of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub round: RoundKey,
    /// Ordered by role then player.
    pub records: Vec<CommitRecord>,
    pub committed_by: String,
    pub committed_at: DateTime<Utc>,
    pub revision: u64,
}

impl CommitOutcome {
    pub fn role_of(&self, player: &PlayerId) -> Option<&RoleId> {
        self.records
            .iter()
            .find(|r| &r.player == player)
            .map(|r| &r.role)
    }
}

/// Durable storage of committed rounds.
///
/// `persist` is all-or-nothing: after an error, readers still see exactly
/// what was stored before the call. It refuses a round that is already
/// stored with `StoreError::AlreadyStored`.
pub trait CastingStore {
    fn is_committed(&self, round: &RoundKey) -> std::result::Result<bool, StoreError>;
    fn persist(&mut self, outcome: &CommitOutcome) -> std::result::Result<(), StoreError>;
    fn load(&self, round: &RoundKey) -> std::result::Result<Option<CommitOutcome>, StoreError>;
    /// Re-opens a round. Only called by administrative tooling.
    fn reset(&mut self, round: &RoundKey) -> std::result::Result<bool, StoreError>;
}

/// In-process store, used by tests and by embedders without a filesystem.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rounds: BTreeMap<RoundKey, CommitOutcome>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CastingStore for MemoryStore {
    fn is_committed(&self, round: &RoundKey) -> std::result::Result<bool, StoreError> {
        Ok(self.rounds.contains_key(round))
    }

    fn persist(&mut self, outcome: &CommitOutcome) -> std::result::Result<(), StoreError> {
        if self.rounds.contains_key(&outcome.round) {
            return Err(StoreError::AlreadyStored(outcome.round.clone()));
        }
        self.rounds.insert(outcome.round.clone(), outcome.clone());
        Ok(())
    }

    fn load(&self, round: &RoundKey) -> std::result::Result<Option<CommitOutcome>, StoreError> {
        Ok(self.rounds.get(round).cloned())
    }

    fn reset(&mut self, round: &RoundKey) -> std::result::Result<bool, StoreError> {
        Ok(self.rounds.remove(round).is_some())
    }
}

/// Turns an eligible simulation into the authoritative assignment.
pub struct CommitManager<S> {
    store: S,
}

impl<S: CastingStore> CommitManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn is_committed(&self, round: &RoundKey) -> Result<bool> {
        Ok(self.store.is_committed(round)?)
    }

    /// Persists the assignment of `result` as final for its round.
    pub fn commit(
        &mut self,
        result: &SimulationResult,
        confirmation: &StaffConfirmation,
    ) -> Result<CommitOutcome> {
        if self.store.is_committed(&result.round)? {
            tracing::warn!(round = %result.round, "commit attempted on a committed round");
            return Err(CastingError::AlreadyCommitted(result.round.clone()));
        }
        if !result.conflicts.is_empty() {
            return Err(CastingError::LockConflict(result.conflicts.clone()));
        }
        let Some(assignment) = &result.assignment else {
            return Err(CastingError::NoSimulation);
        };

        let records = assignment
            .pairs()
            .map(|(player, role)| CommitRecord {
                player: player.clone(),
                role: role.clone(),
                rank: assignment.satisfied_rank.get(player).copied().flatten(),
            })
            .collect::<Vec<_>>();

        let outcome = CommitOutcome {
            round: result.round.clone(),
            records,
            committed_by: confirmation.confirmed_by().to_string(),
            committed_at: Utc::now(),
            revision: result.revision,
        };

        match self.store.persist(&outcome) {
            Ok(()) => {}
            // another writer got there between the check and the write
            Err(StoreError::AlreadyStored(round)) => {
                return Err(CastingError::AlreadyCommitted(round));
            }
            Err(err) => {
                tracing::error!(round = %outcome.round, error = %err, "commit could not be stored");
                return Err(err.into());
            }
        }
        tracing::info!(
            round = %outcome.round,
            records = outcome.records.len(),
            committed_by = %outcome.committed_by,
            "casting round committed"
        );
        Ok(outcome)
    }
}
