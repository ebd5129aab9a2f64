use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::types::{LockEntry, LockPolarity, PlayerId, RoleId};
use crate::error::{CastingError, Result};

/// What a toggle did to the (player, role) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "lock", rename_all = "snake_case")]
pub enum ToggleOutcome {
    Locked(LockEntry),
    Removed(LockEntry),
}

/// Staff pins for one casting round.
///
/// A player holds at most one forced-in lock; forced-out locks are unbounded.
/// No pair is ever forced-in and forced-out at the same time. Finalized
/// pairs are forced-in locks carried over from an earlier decision and are
/// never changed by the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    forced_in: BTreeMap<PlayerId, RoleId>,
    forced_out: BTreeSet<(PlayerId, RoleId)>,
    finalized: BTreeSet<PlayerId>,
}

impl LockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles the forced-in lock of a pair.
    ///
    /// `forced-in -> unlocked`, otherwise `-> forced-in`. A forced-out lock
    /// on the pair, and a forced-in lock of the player on another role, are
    /// cleared first.
    pub fn toggle(&mut self, player: &PlayerId, role: &RoleId) -> Result<ToggleOutcome> {
        self.ensure_not_finalized(player, role)?;

        if self.forced_in.get(player) == Some(role) {
            self.forced_in.remove(player);
            tracing::debug!(%player, %role, "forced-in lock removed");
            return Ok(ToggleOutcome::Removed(LockEntry::forced_in(
                player.clone(),
                role.clone(),
            )));
        }

        if self.forced_out.remove(&(player.clone(), role.clone())) {
            tracing::warn!(%player, %role, "forced-out lock overridden by forced-in");
        }
        if let Some(previous) = self.forced_in.insert(player.clone(), role.clone()) {
            tracing::warn!(%player, %previous, %role, "forced-in lock moved to another role");
        }

        Ok(ToggleOutcome::Locked(LockEntry::forced_in(
            player.clone(),
            role.clone(),
        )))
    }

    /// Sets a forced-out lock, clearing a forced-in lock on the same pair.
    pub fn exclude(&mut self, player: &PlayerId, role: &RoleId) -> Result<LockEntry> {
        self.ensure_not_finalized(player, role)?;

        if self.forced_in.get(player) == Some(role) {
            self.forced_in.remove(player);
            tracing::warn!(%player, %role, "forced-in lock overridden by forced-out");
        }
        self.forced_out.insert((player.clone(), role.clone()));
        Ok(LockEntry::forced_out(player.clone(), role.clone()))
    }

    /// Removes a forced-out lock. Returns whether one existed.
    pub fn include(&mut self, player: &PlayerId, role: &RoleId) -> bool {
        self.forced_out.remove(&(player.clone(), role.clone()))
    }

    /// Records a pairing decided outside this session as a permanent forced-in lock.
    pub fn pin_finalized(&mut self, player: &PlayerId, role: &RoleId) {
        self.forced_out.remove(&(player.clone(), role.clone()));
        self.forced_in.insert(player.clone(), role.clone());
        self.finalized.insert(player.clone());
    }

    pub fn forced_in_for(&self, player: &PlayerId) -> Option<&RoleId> {
        self.forced_in.get(player)
    }

    pub fn is_forced_out(&self, player: &PlayerId, role: &RoleId) -> bool {
        self.forced_out.contains(&(player.clone(), role.clone()))
    }

    pub fn is_finalized(&self, player: &PlayerId) -> bool {
        self.finalized.contains(player)
    }

    /// Forced-in locks ordered by player.
    pub fn forced_in(&self) -> Vec<LockEntry> {
        self.forced_in
            .iter()
            .map(|(p, r)| LockEntry::forced_in(p.clone(), r.clone()))
            .collect()
    }

    /// Every lock, forced-in first, each group ordered by player then role.
    pub fn entries(&self) -> Vec<LockEntry> {
        let mut entries = self.forced_in();
        entries.extend(
            self.forced_out
                .iter()
                .map(|(p, r)| LockEntry::forced_out(p.clone(), r.clone())),
        );
        entries
    }

    /// Applies a batch of locks, e.g. when restoring a saved session.
    pub fn apply(&mut self, entries: &[LockEntry]) -> Result<()> {
        for entry in entries {
            match entry.polarity {
                LockPolarity::ForcedIn => {
                    if self.forced_in_for(&entry.player) != Some(&entry.role) {
                        self.toggle(&entry.player, &entry.role)?;
                    }
                }
                LockPolarity::ForcedOut => {
                    self.exclude(&entry.player, &entry.role)?;
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.forced_in.is_empty() && self.forced_out.is_empty()
    }

    fn ensure_not_finalized(&self, player: &PlayerId, role: &RoleId) -> Result<()> {
        if !self.finalized.contains(player) {
            return Ok(());
        }
        Err(CastingError::FinalizedLock {
            player: player.clone(),
            role: self.forced_in.get(player).cloned().unwrap_or_else(|| role.clone()),
        })
    }
}
