//! Clash Fetcher
//!
//! Pulls clan telemetry from the Clash of Clans API into the season store and
//! keeps scores current: roster reconciliation, player profiles, regular
//! wars, capital raid weekends and CWL rounds, on a paced schedule.

pub mod client;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod scheduler;
pub mod timestamps;

pub use client::{ClanDataSource, ClashApiClient};
pub use config::FetcherConfig;
pub use error::{FetchError, Result};
pub use ingest::{IngestionReport, Ingestor};
pub use models::*;
pub use scheduler::{FetcherScheduler, UpdatePipeline, UpdateReport};
