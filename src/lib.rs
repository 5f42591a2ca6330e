//! Results tallying for school elections.
//!
//! Ranks candidates per position, detects and records tie-breaks at the
//! winner cutoff, derives turnout and abstention figures, and keeps live
//! dashboards refreshed. Every screen, report and export reads results through
//! [`results::ResultsService`], which ranks with [`voting::rank_position`].

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod results;
pub mod tasks;
pub mod voting;

pub use error::{ElectionError, Result};
