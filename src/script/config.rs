//! Scenario file types
//!
//! Defines the data structures for deserializing YAML scenario files.
//!
//! ```yaml
//! name: checkout
//! settings:
//!   loop_count: 3
//!   wait_timeout_secs: 10
//! test_data:
//!   - { user: alice }
//!   - { user: bob }
//! circular: true
//! hooks:
//!   before_all:
//!     - run: ./reset-db.sh
//!       wait_timeout_secs: 30
//! steps:
//!   - name: login
//!     run: ./login.sh {{user}}
//!     expect:
//!       output_contains: welcome
//!   - name: search
//!     run: ./search.sh
//!     options:
//!       repeat: 3
//! recovery:
//!   login:
//!     tries: 2
//!     steps:
//!       - name: relogin
//!         run: ./logout.sh && ./login.sh {{user}}
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::runtime::TestSettings;

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    /// Name of the scenario (used unless `settings.name` is set)
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    #[serde(default)]
    pub settings: TestSettings,
    /// Records fed one per iteration
    pub test_data: Option<Vec<Value>>,
    /// Wrap around instead of running out of records
    #[serde(default)]
    pub circular: bool,
    #[serde(default)]
    pub hooks: HooksSpec,
    /// The sequence of steps to execute
    pub steps: Vec<StepSpec>,
    /// Recovery sequences keyed by step name
    #[serde(default)]
    pub recovery: BTreeMap<String, RecoverySpec>,
}

/// Lifecycle hooks, each list run in order
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct HooksSpec {
    #[serde(default)]
    pub before_all: Vec<HookSpec>,
    #[serde(default)]
    pub after_all: Vec<HookSpec>,
    #[serde(default)]
    pub before_each: Vec<HookSpec>,
    #[serde(default)]
    pub after_each: Vec<HookSpec>,
}

/// A hook command
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    /// Shell command to execute
    pub run: String,
    /// Deadline for the hook (defaults to the scenario's wait timeout)
    pub wait_timeout_secs: Option<f64>,
}

/// A single step
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Unique step name
    pub name: String,
    /// Shell command to execute
    pub run: String,
    /// Optional expectations for the command result
    pub expect: Option<CommandExpectation>,
    #[serde(default)]
    pub options: StepOptionsSpec,
}

/// Expectations for a command result
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct CommandExpectation {
    /// Whether the command should exit successfully (default: true)
    pub success: Option<bool>,
    /// Substring that should be in stdout or stderr
    pub output_contains: Option<String>,
}

/// Step gating and overrides
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct StepOptionsSpec {
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub pending: bool,
    /// Run on the first iteration only
    #[serde(default)]
    pub once: bool,
    /// Repetitions per iteration
    pub repeat: Option<u32>,
    /// Command whose failure silently bypasses the step
    pub predicate: Option<String>,
    /// Command that must succeed for the step to run (otherwise SKIPPED)
    #[serde(rename = "if")]
    pub if_command: Option<String>,
    /// Command that must fail for the step to run (otherwise SKIPPED)
    pub unless: Option<String>,
    /// Settings in effect while the step runs
    #[serde(default)]
    pub settings: TestSettings,
}

/// Recovery sequence for one step
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RecoverySpec {
    /// Attempts before giving up (defaults to the `tries` setting)
    pub tries: Option<u32>,
    pub steps: Vec<StepSpec>,
}
