//! Common utilities shared by the CLI and the runtime

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

use crate::runtime::settings::MAX_SECS;

/// Parse a seconds value given on the command line or in a file.
///
/// Accepts plain numbers (`1.5`) and an optional `s` suffix (`2s`).
pub fn parse_secs(value: &str) -> std::result::Result<f64, String> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix('s').unwrap_or(trimmed).trim();
    let secs: f64 = number
        .parse()
        .map_err(|_| format!("invalid number of seconds: '{value}'"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("seconds must be a non-negative number: '{value}'"));
    }
    if secs > MAX_SECS {
        return Err(format!("seconds must be at most {MAX_SECS}: '{value}'"));
    }
    Ok(secs)
}
