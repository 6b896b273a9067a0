//! Data handlers behind the CLI commands.

pub mod chat;
