//! Scheduler configuration (`wisp.toml`)
//!
//! Values can come from TOML, from `WISP_*` environment variables, or be
//! built in code. Every field has a default so an empty document is valid.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default usable stack size per task (256 KiB)
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack a task may be given
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Top-level configuration for a [`crate::Runtime`] or a single [`crate::Engine`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WispConfig {
    /// Pool name; carrier threads are named `{name}-carrier-{index}`
    pub name: String,

    /// Number of carriers (0 = one per CPU)
    pub carrier_count: usize,

    /// Usable stack bytes per task (rounded up to whole pages)
    pub stack_size: usize,

    /// Stacks kept for reuse per size class
    pub stack_cache_size: usize,

    /// Upper bound on a single idle poll of the I/O readiness integrator
    pub io_poll_max_wait_ms: u64,

    /// Upper bound on a single idle park of a carrier thread
    pub idle_park_ms: u64,

    /// Hand-off behaviour around blocking sections
    pub handoff: HandOffConfig,

    /// Preemption of long-running tasks
    pub preempt: PreemptConfig,

    /// Which threads are converted into tasks
    pub threads: ThreadPolicyConfig,
}

impl Default for WispConfig {
    fn default() -> Self {
        Self {
            name: "wisp".to_string(),
            carrier_count: 0,
            stack_size: DEFAULT_STACK_SIZE,
            stack_cache_size: 64,
            io_poll_max_wait_ms: 10,
            idle_park_ms: 50,
            handoff: HandOffConfig::default(),
            preempt: PreemptConfig::default(),
            threads: ThreadPolicyConfig::default(),
        }
    }
}

/// When a carrier gives its queue to another OS thread before a blocking call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandOffPolicy {
    /// Never hand off; the whole carrier blocks with the task
    None,
    /// Always hand off before the blocking call
    Force,
    /// Hand off when blocking calls tend to be long and work is pending
    Adaptive,
}

impl FromStr for HandOffPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(HandOffPolicy::None),
            "force" => Ok(HandOffPolicy::Force),
            "adaptive" => Ok(HandOffPolicy::Adaptive),
            other => Err(ConfigError::invalid(
                "handoff.policy",
                format!("expected none, force or adaptive, got '{}'", other),
            )),
        }
    }
}

/// Hand-off settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HandOffConfig {
    /// Hand-off policy
    pub policy: HandOffPolicy,

    /// Blocking duration after which an adaptive carrier is handed off
    pub threshold_us: u64,

    /// Cap on OS threads started for hand-off on top of the carriers
    pub max_spare_threads: usize,
}

impl Default for HandOffConfig {
    fn default() -> Self {
        Self {
            policy: HandOffPolicy::Adaptive,
            threshold_us: 2_000,
            max_spare_threads: 256,
        }
    }
}

impl HandOffConfig {
    /// Adaptive threshold as a [`Duration`].
    pub fn threshold(&self) -> Duration {
        Duration::from_micros(self.threshold_us)
    }
}

/// Preemption settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreemptConfig {
    /// Request preemption of tasks that exceed `threshold_ms`
    pub enabled: bool,

    /// Wall-clock run budget per scheduling slice
    pub threshold_ms: u64,

    /// How often the monitor thread samples carriers
    pub monitor_interval_ms: u64,
}

impl Default for PreemptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ms: 10,
            monitor_interval_ms: 1,
        }
    }
}

/// Thread-conversion rules, compiled by [`crate::policy::ConversionPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ThreadPolicyConfig {
    /// Convert every thread unless blacklisted
    pub convert_all: bool,

    /// Comma-separated rules, e.g. `name:io-*, package:app.legacy`
    pub blacklist: String,

    /// Comma-separated rules; when set, whitelist mode is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<String>,
}

impl WispConfig {
    /// Parse configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WispConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `WISP_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(std::env::vars())
    }

    /// Apply `WISP_*` overrides from an explicit set of variables.
    pub fn apply_env_from<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                "WISP_CARRIER_COUNT" => self.carrier_count = parse_env("carrier_count", value)?,
                "WISP_STACK_SIZE" => self.stack_size = parse_env("stack_size", value)?,
                "WISP_HANDOFF_POLICY" => self.handoff.policy = value.parse()?,
                "WISP_HANDOFF_THRESHOLD_US" => {
                    self.handoff.threshold_us = parse_env("handoff.threshold_us", value)?
                }
                "WISP_PREEMPT" => self.preempt.enabled = parse_bool("preempt.enabled", value)?,
                "WISP_PREEMPT_THRESHOLD_MS" => {
                    self.preempt.threshold_ms = parse_env("preempt.threshold_ms", value)?
                }
                "WISP_CONVERT_ALL_THREADS" => {
                    self.threads.convert_all = parse_bool("threads.convert_all", value)?
                }
                "WISP_THREAD_BLACKLIST" => self.threads.blacklist = value.to_string(),
                "WISP_THREAD_WHITELIST" => self.threads.whitelist = Some(value.to_string()),
                _ => {}
            }
        }
        self.validate()
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::invalid(
                "stack_size",
                format!("must be at least {} bytes", MIN_STACK_SIZE),
            ));
        }
        if self.preempt.enabled && self.preempt.threshold_ms == 0 {
            return Err(ConfigError::invalid("preempt.threshold_ms", "must be positive"));
        }
        if self.preempt.monitor_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "preempt.monitor_interval_ms",
                "must be positive",
            ));
        }
        if self.idle_park_ms == 0 {
            return Err(ConfigError::invalid("idle_park_ms", "must be positive"));
        }
        Ok(())
    }

    /// Carrier count with 0 resolved to the CPU count.
    pub fn resolved_carrier_count(&self) -> usize {
        if self.carrier_count == 0 {
            num_cpus::get()
        } else {
            self.carrier_count
        }
    }

    pub(crate) fn io_poll_max_wait(&self) -> Duration {
        Duration::from_millis(self.io_poll_max_wait_ms)
    }

    pub(crate) fn idle_park(&self) -> Duration {
        Duration::from_millis(self.idle_park_ms)
    }
}

fn parse_env<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("cannot parse '{}'", value)))
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(field, format!("expected a boolean, got '{}'", value))),
    }
}
