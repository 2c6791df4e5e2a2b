//! SQLite storage module for historical race data
//!
//! Races are written wholesale: a race and its entries are replaced together
//! inside one transaction, never patched field by field.

pub mod repository;
pub mod schema;

pub use repository::{RaceFilter, RaceRepository, UpsertOutcome};
pub use schema::create_tables;
