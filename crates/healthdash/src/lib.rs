//! `healthdash` - A personal health dashboard for Health Connect data
//!
//! This library pulls records from an HCGateway server into a local `SQLite`
//! database and analyzes them: statistics, trends, correlations and a health
//! report with an overall score.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod analytics;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod export;
pub mod gateway;
pub mod logging;
pub mod record;
pub mod storage;

pub use collector::{Collector, CollectorHandle};
pub use config::Config;
pub use error::{Error, Result};
pub use gateway::{GatewayClient, HealthSource};
pub use logging::init_logging;
pub use record::HealthRecord;
pub use storage::{Storage, StorageStats};
