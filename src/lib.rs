//! Maintenance of a weighted risk score under changing definitions.
//!
//! Four strategies ([`strategy`]) keep a top-k view of the score current as
//! weights or the rolling window change. The [`harness`] measures what each
//! one pays to absorb a change and to serve reads afterwards, and [`cost`]
//! turns those measurements into a recommendation.

pub mod config;
pub mod cost;
pub mod db;
pub mod error;
pub mod harness;
pub mod ingest;
pub mod models;
pub mod report;
pub mod risk;
pub mod store;
pub mod strategy;

pub use error::{MaintenanceError, Result};
pub use models::{DerivedScore, Dimension, MetricDefinition, Record, RefreshResult, Weights};
pub use strategy::{MaintenanceStrategy, StrategyKind};
