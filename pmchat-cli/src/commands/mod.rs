//! CLI subcommands.

pub mod chat;
