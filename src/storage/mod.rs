//! Durable state: the message store and the coverage tracker, both backed by
//! one SQLite database.

pub mod coverage;
pub mod sqlite;
