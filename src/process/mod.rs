//! External transcoder processes
//!
//! - Argument template for the transcoder executable
//! - Process handle: spawn, wait, graceful terminate with kill escalation
//! - Stderr capture for failure reports

pub mod command;
pub mod handle;
pub mod stderr;

pub use command::MANIFEST_NAME;
pub use handle::{ExitOutcome, ProcessHandle};
