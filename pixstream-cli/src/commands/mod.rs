//! CLI subcommands.

pub mod cache;
pub mod fetch;
