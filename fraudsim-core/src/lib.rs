//! # fraudsim-core
//!
//! Session tracking and live monitoring for a fraud-awareness checkout
//! simulation.
//!
//! This library provides:
//! - Participant-side session lifecycle with a local fallback cache
//! - A queued field-capture pipeline with sensitivity classification
//! - A SQLite store with change notifications
//! - Operator-side queries, liveness sweeps, interventions and a
//!   continuously refreshed dashboard
//! - Configuration, logging and error types
//!
//! ## Architecture
//!
//! Participant writes flow one way:
//! [`SessionManager`] and [`CapturePipeline`] write to the [`SessionStore`]
//! (or the [`FallbackCache`] when it is unreachable). The store announces
//! every write on the [`ChangeFeed`], which prompts the
//! [`AdminDashboardController`] to re-query through [`SessionQueryService`].
//!
//! Operator actions flow back through [`InterventionController`] into the
//! store and reach the participant via [`SessionManager::fetch_guidance`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use fraudsim_core::{Config, Database, SessionQueryService};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let query = SessionQueryService::new(Arc::new(db), config.tracking.clone());
//! for view in query.list_participant_sessions(20) {
//!     println!("{} at step {}", view.session.id, view.session.current_step);
//! }
//! ```

// Re-export commonly used items at the crate root
pub use capture::{CapturePipeline, FieldCapture};
pub use cleanup::{CleanupHandle, CleanupScheduler};
pub use config::Config;
pub use dashboard::{
    AdminDashboardController, AllowListCheck, DashboardHandle, DashboardSnapshot, OperatorCheck,
};
pub use db::Database;
pub use error::{Error, Result};
pub use fallback::FallbackCache;
pub use feed::{ChangeFeed, Notification, Subscription, Topic};
pub use intervention::InterventionController;
pub use query::{SessionDetail, SessionQueryService};
pub use risk::{RiskAssessment, RiskLevel};
pub use session::{
    Participant, RiskInputs, SessionHandle, SessionInit, SessionManager, SyncReport,
};
pub use store::SessionStore;
pub use types::*;

// Public modules
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod fallback;
pub mod feed;
pub mod format;
pub mod intervention;
pub mod logging;
pub mod query;
pub mod risk;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;
