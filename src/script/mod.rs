//! YAML scenario files
//!
//! Reads scenario files and binds their shell commands to a
//! [`ShellTarget`](crate::target::ShellTarget), producing a runnable
//! [`Script`](crate::runtime::Script).

mod config;
mod loader;

pub use config::*;
pub use loader::{build_script, load_script, parse_scenario, read_scenario, render};
