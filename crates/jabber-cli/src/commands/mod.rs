//! Offline subcommands that do not start the server

pub mod directory;
