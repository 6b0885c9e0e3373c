//! Sandboxed file-operation gateway.
//!
//! The gateway is the only path through which agents touch the filesystem. A
//! command line moves through a small state machine:
//!
//! ```text
//! Received -> Validated -> Executing -> Succeeded | RuntimeFailed
//! Received -> Rejected
//! ```
//!
//! - [`tokenize`]: quote-aware splitting; no shell is ever involved.
//! - [`verbs`]: the fixed whitelist of file-operation verbs.
//! - [`command`]: verb + operands parsed into a typed [`command::FileCommand`].
//! - [`containment`]: every operand path must resolve inside the workspace root.
//! - [`ops`]: filesystem effects for a validated command.
//! - [`identity`]: optional least-privilege principal check for the binary.

pub mod command;
pub mod config;
pub mod containment;
pub mod error;
pub mod exit_codes;
pub mod gateway;
pub mod identity;
pub mod logging;
pub mod ops;
pub mod tokenize;
pub mod verbs;

pub use config::GatewayConfig;
pub use error::SecurityError;
pub use gateway::{GatewayOutput, GatewayReport, GatewayState, execute};
