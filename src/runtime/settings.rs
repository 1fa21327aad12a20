//! Test settings
//!
//! [`TestSettings`] is the partial, deserializable form used by the config
//! file, scenario files, per-step overrides and CLI overrides.
//! [`ConcreteSettings`] is the fully resolved form the engine and the
//! execution target work with.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Partial settings; `None` means "inherit"
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestSettings {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Number of iterations; `<= 0` runs until the duration expires or the run is stopped
    pub loop_count: Option<i64>,
    /// Wall-clock bound in seconds; `<= 0` means no bound
    pub duration_secs: Option<f64>,
    /// Delay after each passed step
    pub step_delay_secs: Option<f64>,
    /// Delay after each target action
    pub action_delay_secs: Option<f64>,
    /// Timeout applied by the target to each action
    pub wait_timeout_secs: Option<f64>,
    /// Recovery attempts per failed step
    pub tries: Option<u32>,
    pub clear_cache: Option<bool>,
    pub clear_cookies: Option<bool>,
    pub disable_cache: Option<bool>,
    pub device: Option<String>,
    pub user_agent: Option<String>,
    pub extra_headers: Option<BTreeMap<String, String>>,
    /// Stop looping after the first failed iteration
    pub fail_fast: Option<bool>,
}

impl TestSettings {
    /// Layer `over` on top of `self`; fields set in `over` win
    pub fn merge(&self, over: &TestSettings) -> TestSettings {
        TestSettings {
            name: over.name.clone().or_else(|| self.name.clone()),
            description: over.description.clone().or_else(|| self.description.clone()),
            loop_count: over.loop_count.or(self.loop_count),
            duration_secs: over.duration_secs.or(self.duration_secs),
            step_delay_secs: over.step_delay_secs.or(self.step_delay_secs),
            action_delay_secs: over.action_delay_secs.or(self.action_delay_secs),
            wait_timeout_secs: over.wait_timeout_secs.or(self.wait_timeout_secs),
            tries: over.tries.or(self.tries),
            clear_cache: over.clear_cache.or(self.clear_cache),
            clear_cookies: over.clear_cookies.or(self.clear_cookies),
            disable_cache: over.disable_cache.or(self.disable_cache),
            device: over.device.clone().or_else(|| self.device.clone()),
            user_agent: over.user_agent.clone().or_else(|| self.user_agent.clone()),
            extra_headers: over
                .extra_headers
                .clone()
                .or_else(|| self.extra_headers.clone()),
            fail_fast: over.fail_fast.or(self.fail_fast),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == TestSettings::default()
    }

    /// The fields a single step may override; iteration-level fields are dropped
    pub fn per_step(&self) -> TestSettings {
        TestSettings {
            step_delay_secs: self.step_delay_secs,
            action_delay_secs: self.action_delay_secs,
            wait_timeout_secs: self.wait_timeout_secs,
            tries: self.tries,
            user_agent: self.user_agent.clone(),
            extra_headers: self.extra_headers.clone(),
            ..Default::default()
        }
    }

    /// Every seconds field must be representable as a duration
    pub fn validate(&self) -> Result<()> {
        check_secs("duration_secs", self.duration_secs)?;
        check_secs("step_delay_secs", self.step_delay_secs)?;
        check_secs("action_delay_secs", self.action_delay_secs)?;
        check_secs("wait_timeout_secs", self.wait_timeout_secs)
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq)]
pub struct ConcreteSettings {
    pub name: String,
    pub description: Option<String>,
    pub loop_count: i64,
    pub duration: Option<Duration>,
    pub step_delay: Duration,
    pub action_delay: Duration,
    pub wait_timeout: Duration,
    pub tries: u32,
    pub clear_cache: bool,
    pub clear_cookies: bool,
    pub disable_cache: bool,
    pub device: Option<String>,
    pub user_agent: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
    pub fail_fast: bool,
}

impl Default for ConcreteSettings {
    fn default() -> Self {
        Self {
            name: "scenario".to_string(),
            description: None,
            loop_count: 1,
            duration: None,
            step_delay: Duration::ZERO,
            action_delay: Duration::ZERO,
            wait_timeout: Duration::from_secs(30),
            tries: 1,
            clear_cache: false,
            clear_cookies: false,
            disable_cache: false,
            device: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
            fail_fast: false,
        }
    }
}

impl ConcreteSettings {
    /// Return a copy with `overrides` applied
    pub fn apply(&self, overrides: &TestSettings) -> ConcreteSettings {
        let mut merged = self.clone();
        if let Some(name) = &overrides.name {
            merged.name = name.clone();
        }
        if let Some(description) = &overrides.description {
            merged.description = Some(description.clone());
        }
        if let Some(loop_count) = overrides.loop_count {
            merged.loop_count = loop_count;
        }
        if let Some(secs) = overrides.duration_secs {
            merged.duration = secs_to_duration(secs);
        }
        if let Some(secs) = overrides.step_delay_secs {
            merged.step_delay = secs_to_duration(secs).unwrap_or(Duration::ZERO);
        }
        if let Some(secs) = overrides.action_delay_secs {
            merged.action_delay = secs_to_duration(secs).unwrap_or(Duration::ZERO);
        }
        if let Some(timeout) = overrides.wait_timeout_secs.and_then(secs_to_duration) {
            merged.wait_timeout = timeout;
        }
        if let Some(tries) = overrides.tries {
            merged.tries = tries.max(1);
        }
        if let Some(clear_cache) = overrides.clear_cache {
            merged.clear_cache = clear_cache;
        }
        if let Some(clear_cookies) = overrides.clear_cookies {
            merged.clear_cookies = clear_cookies;
        }
        if let Some(disable_cache) = overrides.disable_cache {
            merged.disable_cache = disable_cache;
        }
        if let Some(device) = &overrides.device {
            merged.device = Some(device.clone());
        }
        if let Some(user_agent) = &overrides.user_agent {
            merged.user_agent = Some(user_agent.clone());
        }
        if let Some(headers) = &overrides.extra_headers {
            merged.extra_headers.extend(headers.clone());
        }
        if let Some(fail_fast) = overrides.fail_fast {
            merged.fail_fast = fail_fast;
        }
        merged
    }

    /// Copy with a different wait timeout (used while a hook runs)
    pub fn with_wait_timeout(&self, wait_timeout: Duration) -> ConcreteSettings {
        ConcreteSettings {
            wait_timeout,
            ..self.clone()
        }
    }
}

/// Largest seconds value accepted anywhere (100 years)
pub const MAX_SECS: f64 = 100.0 * 365.0 * 24.0 * 3600.0;

/// Seconds to a duration; non-positive or non-finite values mean "unset".
/// Values past [`MAX_SECS`] are capped.
pub fn secs_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs.min(MAX_SECS)).ok()
    } else {
        None
    }
}

/// Reject a seconds value that cannot be turned into a duration
pub fn check_secs(field: &str, secs: Option<f64>) -> Result<()> {
    match secs {
        Some(secs) if secs.is_nan() || secs > MAX_SECS => Err(Error::Config(format!(
            "{field} must be at most {MAX_SECS} seconds, got {secs}"
        ))),
        _ => Ok(()),
    }
}
