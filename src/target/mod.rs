//! Execution targets shipped with the crate

mod shell;

pub use shell::{CommandOutput, ShellTarget};
