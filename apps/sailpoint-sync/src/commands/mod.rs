//! Subcommands of the sailpoint-sync binary.

pub mod export;
pub mod sync;
