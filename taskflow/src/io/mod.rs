//! I/O helpers for taskflow commands.

pub mod config;
pub mod gateway_client;
pub mod init;
pub mod lock;
pub mod personas;
pub mod process;
pub mod prompt;
pub mod provider;
pub mod run_log;
pub mod schema;
pub mod store;
pub mod watch;
