//! Command-line interface for relayd.
//!
//! One binary, three processes: the HTTP gateway, the worker pool and
//! the reconciler. Any number of worker and reconciler processes can
//! run side by side against the same Redis.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
