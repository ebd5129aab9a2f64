use serde::{Deserialize, Serialize};

use super::commit::{CastingStore, CommitManager, CommitOutcome, StaffConfirmation};
use super::locks::{LockState, ToggleOutcome};
use super::preferences::{PreferenceSet, PreferenceSubmission};
use super::simulation::{SimulationResult, SimulationRunner};
use super::stats::PreferenceStats;
use super::types::{CategoryId, LockEntry, LockPolarity, Player, PlayerId, Role, RoleCatalog, RoleId, Roster, RoundKey};
use crate::config::CastingPolicy;
use crate::error::{CastingError, Result};

/// A pairing decided before this session started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedPair {
    pub player: PlayerId,
    pub role: RoleId,
}

/// Everything a session needs, as handed over by the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastingSnapshot {
    pub category: CategoryId,
    pub players: Vec<Player>,
    pub roles: Vec<Role>,
    #[serde(default)]
    pub submissions: Vec<PreferenceSubmission>,
    #[serde(default)]
    pub finalized: Vec<FinalizedPair>,
    /// Overrides the configured policy for this round.
    #[serde(default)]
    pub policy: Option<CastingPolicy>,
    /// Locks to restore, e.g. from a previous session.
    #[serde(default)]
    pub locks: Vec<LockEntry>,
}

/// One staff member's casting session for one round.
///
/// Owns the immutable inputs, the lock state and the last simulation. Every
/// change to locks or policy bumps `revision`; a commit must use a
/// simulation taken at the current revision.
#[derive(Debug)]
pub struct CastingSession {
    round: RoundKey,
    policy: CastingPolicy,
    roster: Roster,
    catalog: RoleCatalog,
    submissions: Vec<PreferenceSubmission>,
    preferences: PreferenceSet,
    locks: LockState,
    revision: u64,
    last_simulation: Option<SimulationResult>,
    committed: bool,
}

impl CastingSession {
    pub fn new(snapshot: CastingSnapshot, default_policy: CastingPolicy) -> Result<Self> {
        let policy = snapshot.policy.unwrap_or(default_policy);
        policy.validate()?;

        let round = RoundKey::new(snapshot.category);
        let roster = Roster::new(snapshot.players);
        let catalog = RoleCatalog::new(snapshot.roles);
        let preferences = PreferenceSet::build(&round, &snapshot.submissions, &catalog, &policy)?;

        let mut session = Self {
            round,
            policy,
            roster,
            catalog,
            submissions: snapshot.submissions,
            preferences,
            locks: LockState::new(),
            revision: 0,
            last_simulation: None,
            committed: false,
        };

        for pair in &snapshot.finalized {
            session.check_ids(&pair.player, &pair.role)?;
            if !session.in_round(&pair.role) {
                // decided in another category, irrelevant here
                continue;
            }
            session.locks.pin_finalized(&pair.player, &pair.role);
        }

        for entry in &snapshot.locks {
            session.check_pair(&entry.player, &entry.role)?;
        }
        session.locks.apply(&snapshot.locks)?;

        tracing::info!(
            round = %session.round,
            players = session.roster.len(),
            roles = session.catalog.in_category(&session.round.category).count(),
            preferences = session.preferences.len(),
            locks = session.locks.entries().len(),
            "casting session opened"
        );
        Ok(session)
    }

    pub fn round(&self) -> &RoundKey {
        &self.round
    }

    pub fn policy(&self) -> &CastingPolicy {
        &self.policy
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }

    pub fn preferences(&self) -> &PreferenceSet {
        &self.preferences
    }

    pub fn locks(&self) -> &LockState {
        &self.locks
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_simulation(&self) -> Option<&SimulationResult> {
        self.last_simulation.as_ref()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Replaces the filters (tiers, membership, factions, avoidance) and
    /// re-validates the submissions against the new bounds.
    pub fn update_policy(&mut self, policy: CastingPolicy) -> Result<()> {
        self.ensure_open()?;
        policy.validate()?;
        let preferences = PreferenceSet::build(&self.round, &self.submissions, &self.catalog, &policy)?;
        self.policy = policy;
        self.preferences = preferences;
        self.bump();
        Ok(())
    }

    pub fn toggle_lock(&mut self, player: &PlayerId, role: &RoleId) -> Result<ToggleOutcome> {
        self.ensure_open()?;
        self.check_pair(player, role)?;
        let outcome = self.locks.toggle(player, role)?;
        if let ToggleOutcome::Locked(entry) = &outcome {
            self.warn_faction_override(entry);
        }
        self.bump();
        Ok(outcome)
    }

    pub fn exclude(&mut self, player: &PlayerId, role: &RoleId) -> Result<LockEntry> {
        self.ensure_open()?;
        self.check_pair(player, role)?;
        let entry = self.locks.exclude(player, role)?;
        self.bump();
        Ok(entry)
    }

    /// Lifts a forced-out lock. Returns whether there was one.
    pub fn include(&mut self, player: &PlayerId, role: &RoleId) -> Result<bool> {
        self.ensure_open()?;
        self.check_pair(player, role)?;
        let removed = self.locks.include(player, role);
        if removed {
            self.bump();
        }
        Ok(removed)
    }

    /// Runs a trial solve at the current revision and keeps it for commit.
    pub fn simulate(&mut self) -> Result<&SimulationResult> {
        self.ensure_open()?;
        let runner = SimulationRunner::new(&self.policy, &self.round, &self.roster);
        let result = runner
            .simulate(&self.preferences, &self.catalog, &self.locks)?
            .at_revision(self.revision);
        Ok(self.last_simulation.insert(result))
    }

    /// Commits the last simulation. It must be current and conflict free.
    pub fn commit<S: CastingStore>(
        &mut self,
        manager: &mut CommitManager<S>,
        confirmation: &StaffConfirmation,
    ) -> Result<CommitOutcome> {
        self.ensure_open()?;
        let Some(result) = &self.last_simulation else {
            return Err(CastingError::NoSimulation);
        };
        if result.revision != self.revision {
            return Err(CastingError::StaleSimulation {
                simulated: result.revision,
                current: self.revision,
            });
        }

        let outcome = manager.commit(result, confirmation)?;
        self.committed = true;
        Ok(outcome)
    }

    pub fn stats(&self) -> PreferenceStats {
        PreferenceStats::collect(&self.preferences, &self.catalog)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            return Err(CastingError::AlreadyCommitted(self.round.clone()));
        }
        Ok(())
    }

    fn bump(&mut self) {
        self.revision += 1;
        tracing::debug!(round = %self.round, revision = self.revision, "session revision");
    }

    fn check_ids(&self, player: &PlayerId, role: &RoleId) -> Result<()> {
        if !self.roster.contains(player) {
            return Err(CastingError::UnknownPlayer(player.clone()));
        }
        if self.catalog.get(role).is_none() {
            return Err(CastingError::UnknownRole(role.clone()));
        }
        Ok(())
    }

    /// Known player, known role, and the role belongs to this round.
    fn check_pair(&self, player: &PlayerId, role: &RoleId) -> Result<()> {
        self.check_ids(player, role)?;
        match self.catalog.get(role) {
            Some(r) if r.category != self.round.category => Err(CastingError::RoleOutsideCategory {
                role: role.clone(),
                expected: self.round.category.clone(),
                actual: r.category.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn in_round(&self, role: &RoleId) -> bool {
        self.catalog
            .get(role)
            .map(|r| r.category == self.round.category)
            .unwrap_or(false)
    }

    fn warn_faction_override(&self, entry: &LockEntry) {
        if !self.policy.faction_filter || entry.polarity != LockPolarity::ForcedIn {
            return;
        }
        let (Some(player), Some(role)) = (self.roster.get(&entry.player), self.catalog.get(&entry.role)) else {
            return;
        };
        if let Some(required) = &role.faction {
            if !player.factions.contains(required) {
                tracing::warn!(
                    player = %entry.player,
                    role = %entry.role,
                    faction = %required,
                    "forced-in lock bypasses the faction filter"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casting::commit::MemoryStore;
    use crate::casting::types::TicketTier;

    fn player(id: &str) -> Player {
        Player {
            id: PlayerId::from(id),
            name: String::new(),
            ticket_tier: TicketTier::from("standard"),
            is_member: true,
            factions: Default::default(),
        }
    }

    fn role(id: &str, category: &str) -> Role {
        Role {
            id: RoleId::from(id),
            name: String::new(),
            category: CategoryId::from(category),
            mirror_group: None,
            capacity: 1,
            faction: None,
        }
    }

    fn snapshot() -> CastingSnapshot {
        CastingSnapshot {
            category: CategoryId::from("main"),
            players: vec![player("p"), player("q")],
            roles: vec![role("a", "main"), role("b", "main"), role("x", "quest")],
            submissions: vec![
                PreferenceSubmission {
                    player: PlayerId::from("p"),
                    category: CategoryId::from("main"),
                    preferences: vec![RoleId::from("a"), RoleId::from("b")],
                    avoid: Vec::new(),
                },
                PreferenceSubmission {
                    player: PlayerId::from("q"),
                    category: CategoryId::from("main"),
                    preferences: vec![RoleId::from("a")],
                    avoid: Vec::new(),
                },
            ],
            finalized: Vec::new(),
            policy: None,
            locks: Vec::new(),
        }
    }

    fn session() -> CastingSession {
        CastingSession::new(snapshot(), CastingPolicy::default()).unwrap()
    }

    #[test]
    fn lock_changes_make_old_simulations_stale() {
        let mut session = session();
        let mut manager = CommitManager::new(MemoryStore::new());
        let staff = StaffConfirmation::confirm("ada").unwrap();

        session.simulate().unwrap();
        session
            .toggle_lock(&PlayerId::from("p"), &RoleId::from("a"))
            .unwrap();

        assert!(matches!(
            session.commit(&mut manager, &staff),
            Err(CastingError::StaleSimulation {
                simulated: 0,
                current: 1
            })
        ));

        session.simulate().unwrap();
        let outcome = session.commit(&mut manager, &staff).unwrap();
        assert_eq!(outcome.role_of(&PlayerId::from("p")), Some(&RoleId::from("a")));
        assert_eq!(outcome.role_of(&PlayerId::from("q")), None);
    }

    #[test]
    fn commit_without_simulation_is_rejected() {
        let mut session = session();
        let mut manager = CommitManager::new(MemoryStore::new());
        let staff = StaffConfirmation::confirm("ada").unwrap();

        assert!(matches!(
            session.commit(&mut manager, &staff),
            Err(CastingError::NoSimulation)
        ));
    }

    #[test]
    fn committed_session_is_frozen() {
        let mut session = session();
        let mut manager = CommitManager::new(MemoryStore::new());
        let staff = StaffConfirmation::confirm("ada").unwrap();
        session.simulate().unwrap();
        session.commit(&mut manager, &staff).unwrap();

        assert!(matches!(session.simulate(), Err(CastingError::AlreadyCommitted(_))));
        assert!(matches!(
            session.toggle_lock(&PlayerId::from("q"), &RoleId::from("b")),
            Err(CastingError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn rejects_unknown_and_foreign_ids() {
        let mut session = session();

        assert!(matches!(
            session.toggle_lock(&PlayerId::from("nobody"), &RoleId::from("a")),
            Err(CastingError::UnknownPlayer(_))
        ));
        assert!(matches!(
            session.exclude(&PlayerId::from("p"), &RoleId::from("zz")),
            Err(CastingError::UnknownRole(_))
        ));
        assert!(matches!(
            session.toggle_lock(&PlayerId::from("p"), &RoleId::from("x")),
            Err(CastingError::RoleOutsideCategory { .. })
        ));
        assert_eq!(session.revision(), 0);
    }

    #[test]
    fn finalized_pairs_are_seated_and_frozen() {
        let mut snap = snapshot();
        snap.finalized = vec![
            FinalizedPair {
                player: PlayerId::from("q"),
                role: RoleId::from("a"),
            },
            FinalizedPair {
                player: PlayerId::from("p"),
                role: RoleId::from("x"),
            },
        ];
        let mut session = CastingSession::new(snap, CastingPolicy::default()).unwrap();

        assert!(matches!(
            session.exclude(&PlayerId::from("q"), &RoleId::from("a")),
            Err(CastingError::FinalizedLock { .. })
        ));

        let result = session.simulate().unwrap();
        let assignment = result.assignment.as_ref().unwrap();
        assert_eq!(assignment.role_of(&PlayerId::from("q")), Some(&RoleId::from("a")));
        assert_eq!(assignment.role_of(&PlayerId::from("p")), Some(&RoleId::from("b")));
    }

    #[test]
    fn include_without_forced_out_keeps_revision() {
        let mut session = session();
        let (p, a) = (PlayerId::from("p"), RoleId::from("a"));

        assert!(!session.include(&p, &a).unwrap());
        assert_eq!(session.revision(), 0);

        session.exclude(&p, &a).unwrap();
        assert!(session.include(&p, &a).unwrap());
        assert_eq!(session.revision(), 2);
    }

    #[test]
    fn policy_update_revalidates_lists() {
        let mut session = session();
        let strict = CastingPolicy {
            min_preferences: 2,
            ..CastingPolicy::default()
        };

        assert!(matches!(
            session.update_policy(strict),
            Err(CastingError::InvalidPreferenceList { .. })
        ));
        assert_eq!(session.policy(), &CastingPolicy::default());
    }
}
