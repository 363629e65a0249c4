//! Subcommand implementations.

pub mod init_db;
pub mod results_cache;
pub mod simulate;
