//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod cancel;
pub mod expr;
pub mod invariants;
pub mod retry;
pub mod scheduler;
pub mod stage;
pub mod state_update;
pub mod types;
