//! Database layer for fraudsim
//!
//! This module provides the durable store using SQLite with:
//! - Schema migrations
//! - Repository implementation of `SessionStore`
//! - Change notifications from the SQLite update hook

pub mod repo;
pub mod schema;

pub use repo::Database;
