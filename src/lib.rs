//! Casting assignment engine: matches players to roles from ranked
//! preference lists, lets staff pin or exclude pairings between trial
//! solves, and commits the final assignment once confirmed.

pub mod casting;
pub mod config;
pub mod display;
pub mod error;
pub mod parser;
pub mod store;
pub mod web;

pub use casting::{
    CastingSession, CastingSnapshot, CommitManager, CommitOutcome, HungarianOptimizer, LockState, Optimizer,
    PreferenceSet, SimulationResult, SimulationRunner, StaffConfirmation,
};
pub use config::{CastingPolicy, ServerConfig};
pub use error::{CastingError, Result};
