//! Runtime tuning for the interpreter and scheduler.

use crate::utils::log::Level;
use crate::warn;
use std::env;

/// Default number of opcodes a single `advance()` may execute.
pub const DEFAULT_OPCODE_BUDGET: u32 = 4096;

/// Default `wait` decrement per frame, in milliseconds (~60 Hz host loop).
pub const DEFAULT_TICK_MS: i32 = 16;

pub const ENV_OPCODE_BUDGET: &str = "HITVM_OPCODE_BUDGET";
pub const ENV_TICK_MS: &str = "HITVM_TICK_MS";
pub const ENV_LOG: &str = "HITVM_LOG";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Opcodes one subroutine may execute per frame before it is parked.
    pub opcode_budget: u32,
    /// Milliseconds removed from a pending `wait` on every frame.
    pub tick_ms: i32,
    /// Minimum level passed to the logger.
    pub log_level: Level,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            opcode_budget: DEFAULT_OPCODE_BUDGET,
            tick_ms: DEFAULT_TICK_MS,
            log_level: Level::Info,
        }
    }
}

impl VmConfig {
    /// Builds a config from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    ///
    /// Unparseable or non-positive values are ignored with a warning.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_OPCODE_BUDGET) {
            match raw.trim().parse::<u32>() {
                Ok(v) if v > 0 => config.opcode_budget = v,
                _ => warn!("ignoring {ENV_OPCODE_BUDGET}={raw}: expected a positive integer"),
            }
        }

        if let Some(raw) = lookup(ENV_TICK_MS) {
            match raw.trim().parse::<i32>() {
                Ok(v) if v > 0 => config.tick_ms = v,
                _ => warn!("ignoring {ENV_TICK_MS}={raw}: expected a positive integer"),
            }
        }

        if let Some(raw) = lookup(ENV_LOG) {
            match Level::parse(&raw) {
                Some(level) => config.log_level = level,
                None => warn!("ignoring {ENV_LOG}={raw}: expected debug, info, warn or error"),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_assume_sixty_hertz() {
        let config = VmConfig::default();
        assert_eq!(config.tick_ms, 16);
        assert_eq!(config.opcode_budget, DEFAULT_OPCODE_BUDGET);
        assert_eq!(config.log_level, Level::Info);
    }

    #[test]
    fn overrides_are_applied() {
        let config = VmConfig::from_lookup(lookup_from(&[
            (ENV_OPCODE_BUDGET, "64"),
            (ENV_TICK_MS, "33"),
            (ENV_LOG, "debug"),
        ]));
        assert_eq!(config.opcode_budget, 64);
        assert_eq!(config.tick_ms, 33);
        assert_eq!(config.log_level, Level::Debug);
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let config = VmConfig::from_lookup(lookup_from(&[
            (ENV_OPCODE_BUDGET, "0"),
            (ENV_TICK_MS, "fast"),
            (ENV_LOG, "chatty"),
        ]));
        assert_eq!(config, VmConfig::default());
    }
}
