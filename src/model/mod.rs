//! Domain model shared by storage, coverage tracking and sync.

pub mod types;
