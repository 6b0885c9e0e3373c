//! Directory-backed task orchestration for autonomous agent personas.
//!
//! Tasks move through a fixed lifecycle (`Pending -> Assigned -> InProgress ->
//! Review -> Done`, or `Failed`) persisted one record per file. The crate keeps
//! the same split as its predecessor:
//!
//! - **[`core`]**: Pure, deterministic logic (stages, scheduling, validation,
//!   retry policy, the restricted expression evaluator). No I/O.
//! - **[`io`]**: Side effects (task store, persona catalog, config, processes,
//!   reasoning provider, gateway client, run logs).
//!
//! [`tools`] holds the capability registry, [`agents`] the executor and
//! reviewer loops. Orchestration modules ([`driver`], [`select`], [`operator`])
//! coordinate core logic with I/O to implement CLI commands. File mutations
//! leave the process only through the `taskflow-gateway` binary.

pub mod agents;
pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod operator;
pub mod persona;
pub mod project;
pub mod select;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
