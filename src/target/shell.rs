//! Process-driven execution target
//!
//! Every action is a `sh -c` command. The command runs with the target's
//! current `wait_timeout` as its deadline and is followed by `action_delay`.
//! Iteration directives are exported to the command as environment
//! variables:
//!
//! | Directive | Variable |
//! |-----------|----------|
//! | clear cache | `SCENARIO_CACHE_CLEARED=1` |
//! | clear cookies | `SCENARIO_COOKIES_CLEARED=1` |
//! | emulate device | `SCENARIO_DEVICE` |
//! | user agent | `SCENARIO_USER_AGENT` |
//! | disable cache | `SCENARIO_CACHE_DISABLED=1` |
//! | extra headers | `SCENARIO_HEADER_<NAME>` |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command as TokioCommand;

use crate::runtime::{ConcreteSettings, CurrentStep, ExecutionTarget};

/// Captured result of one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Default)]
struct ShellState {
    settings: ConcreteSettings,
    current: Option<CurrentStep>,
    markers: BTreeMap<String, String>,
    last_output: Option<CommandOutput>,
}

/// Execution target that runs shell commands
#[derive(Default)]
pub struct ShellTarget {
    state: Mutex<ShellState>,
    workdir: Option<PathBuf>,
}

impl ShellTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir`
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Environment a command would get right now
    pub fn env(&self) -> BTreeMap<String, String> {
        let state = self.lock();
        let mut env = state.markers.clone();
        if let Some(user_agent) = &state.settings.user_agent {
            env.insert("SCENARIO_USER_AGENT".to_string(), user_agent.clone());
        }
        for (name, value) in &state.settings.extra_headers {
            env.insert(header_var(name), value.clone());
        }
        env
    }

    /// Output of the most recent action
    pub fn last_output(&self) -> Option<CommandOutput> {
        self.lock().last_output.clone()
    }

    /// Run `command` as an action of the current step
    pub async fn run(&self, command: &str) -> anyhow::Result<CommandOutput> {
        self.run_with_env(command, &BTreeMap::new()).await
    }

    /// Run `command` with `vars` exported on top of the directive variables
    pub async fn run_with_env(
        &self,
        command: &str,
        vars: &BTreeMap<String, String>,
    ) -> anyhow::Result<CommandOutput> {
        let (settings, current) = {
            let state = self.lock();
            (state.settings.clone(), state.current.clone())
        };
        let mut env = self.env();
        env.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(current) = &current {
            current.before_action(command).await;
        }
        let output = self.execute(command, &env, &settings).await;
        if let Some(current) = &current {
            current.after_action(command).await;
        }

        if !settings.action_delay.is_zero() {
            tokio::time::sleep(settings.action_delay).await;
        }

        if let Ok(output) = &output {
            self.lock().last_output = Some(output.clone());
        }
        output
    }

    /// Run `command` silently and report whether it exited successfully
    ///
    /// Used for predicates and conditions; no action notifications are sent.
    pub async fn succeeds(&self, command: &str) -> anyhow::Result<bool> {
        let settings = self.lock().settings.clone();
        let env = self.env();
        Ok(self.execute(command, &env, &settings).await?.success)
    }

    async fn execute(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        settings: &ConcreteSettings,
    ) -> anyhow::Result<CommandOutput> {
        let mut cmd = TokioCommand::new("sh");
        cmd.arg("-c")
            .arg(command)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command, timeout = ?settings.wait_timeout, "Running command");
        let output = tokio::time::timeout(settings.wait_timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Command '{}' timed out after {:.1}s",
                    command,
                    settings.wait_timeout.as_secs_f64()
                )
            })?
            .with_context(|| format!("Failed to execute '{command}'"))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn set_marker(&self, name: &str, value: impl Into<String>) {
        self.lock().markers.insert(name.to_string(), value.into());
    }
}

/// `x-trace-id` -> `SCENARIO_HEADER_X_TRACE_ID`
fn header_var(name: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SCENARIO_HEADER_{normalized}")
}

#[async_trait]
impl ExecutionTarget for ShellTarget {
    fn settings(&self) -> ConcreteSettings {
        self.lock().settings.clone()
    }

    fn apply_settings(&self, settings: ConcreteSettings) {
        self.lock().settings = settings;
    }

    fn set_current_step(&self, step: Option<CurrentStep>) {
        self.lock().current = step;
    }

    async fn clear_cache(&self) -> anyhow::Result<()> {
        self.set_marker("SCENARIO_CACHE_CLEARED", "1");
        Ok(())
    }

    async fn clear_cookies(&self) -> anyhow::Result<()> {
        self.set_marker("SCENARIO_COOKIES_CLEARED", "1");
        Ok(())
    }

    async fn emulate_device(&self, device: &str) -> anyhow::Result<()> {
        self.set_marker("SCENARIO_DEVICE", device);
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> anyhow::Result<()> {
        self.set_marker("SCENARIO_USER_AGENT", user_agent);
        Ok(())
    }

    async fn set_cache_disabled(&self, disabled: bool) -> anyhow::Result<()> {
        if disabled {
            self.set_marker("SCENARIO_CACHE_DISABLED", "1");
        } else {
            self.lock().markers.remove("SCENARIO_CACHE_DISABLED");
        }
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> anyhow::Result<()> {
        for (name, value) in headers {
            self.set_marker(&header_var(name), value.clone());
        }
        Ok(())
    }
}
