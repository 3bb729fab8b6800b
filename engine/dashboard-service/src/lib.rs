//! Clan Dashboard Service
//!
//! Serves season scoreboards and category aggregates over REST, accepts
//! administrative corrections and season resets, and runs the periodic
//! clan update in the background.

pub mod config;
pub mod error;
pub mod logging;
pub mod rest_api;
pub mod service;
pub mod signals;

pub use config::{load_config, ServiceConfig};
pub use error::{ErrorResponse, ServiceError};
pub use logging::{initialize_logging, initialize_logging_with_config};
pub use rest_api::create_routes;
pub use service::DashboardService;
pub use signals::setup_signal_handlers;
