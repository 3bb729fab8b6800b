//! Season Engine
//!
//! Reconciles clan telemetry observed from the external game API and turns it
//! into per-season player scores: guarded merges, baselines for counters the
//! game resets itself, tiered leaderboards, penalties and season resets.

pub mod baseline;
pub mod config;
pub mod error;
pub mod guard;
pub mod leaderboard;
pub mod memory;
pub mod models;
pub mod penalties;
pub mod postgres;
pub mod rules;
pub mod scoring;
pub mod season;
pub mod snapshot;
pub mod store;
pub mod views;

#[cfg(test)]
mod scenario_tests;

pub use baseline::{BaselinePolicy, BaselineTracker, FirstSightBaseline, RawCounters};
pub use config::EngineConfig;
pub use error::{Result, SeasonError};
pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;
pub use rules::RuleSet;
pub use scoring::{ScoringEngine, ScoringReport};
pub use season::{DeparturePolicy, DepartureReport, ResetFailure, ResetReport, SeasonLifecycle};
pub use snapshot::SeasonSnapshot;
pub use store::{PurgeCounts, SeasonStore};
