pub mod commit;
pub mod constraints;
pub mod graph;
pub mod locks;
pub mod optimizer;
pub mod preferences;
pub mod session;
pub mod simulation;
pub mod stats;
pub mod types;

pub use commit::{CastingStore, CommitManager, CommitOutcome, CommitRecord, MemoryStore, StaffConfirmation};
pub use constraints::{ConstraintEvaluator, Legality, Occupancy};
pub use graph::{CandidateEdge, CandidateGraph, ExcludedEdge};
pub use locks::{LockState, ToggleOutcome};
pub use optimizer::{HungarianOptimizer, Optimizer};
pub use preferences::{Avoidance, PreferenceList, PreferenceSet, PreferenceSubmission};
pub use session::{CastingSession, CastingSnapshot, FinalizedPair};
pub use simulation::{AvoidanceFlag, FilledRole, SimulationResult, SimulationRunner};
pub use stats::{PreferenceStats, RolePopularity};
pub use types::*;
