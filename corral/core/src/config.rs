// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Corral configuration

use std::collections::HashMap;
use std::fmt::Display;
use std::result;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{CorralError, Result};

/// Number of CPU cores reserved for each scheduled task.
pub const CORRAL_TASK_CPUS: &str = "corral.task.cpus";
/// Number of failures of a single task before its task set is aborted.
pub const CORRAL_TASK_MAX_FAILURES: &str = "corral.task.max_failures";
/// Default wait (milliseconds) before relaxing a task to a looser locality level.
pub const CORRAL_LOCALITY_WAIT: &str = "corral.locality.wait";
/// Wait (milliseconds) spent at the process-local level. Inherits `corral.locality.wait`.
pub const CORRAL_LOCALITY_WAIT_PROCESS: &str = "corral.locality.wait.process";
/// Wait (milliseconds) spent at the node-local level. Inherits `corral.locality.wait`.
pub const CORRAL_LOCALITY_WAIT_NODE: &str = "corral.locality.wait.node";
/// Wait (milliseconds) spent at the rack-local level. Inherits `corral.locality.wait`.
pub const CORRAL_LOCALITY_WAIT_RACK: &str = "corral.locality.wait.rack";
/// Ordering of task sets within a scheduling round.
pub const CORRAL_SCHEDULER_MODE: &str = "corral.scheduler.mode";

/// Result of parsing a single configuration value.
pub type ParseResult<T> = result::Result<T, String>;

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(CORRAL_TASK_CPUS.to_string(),
                         "Number of cores to allocate for each task".to_string(),
                         ConfigValueType::UInt, Some("1".to_string())),
        ConfigEntry::new(CORRAL_TASK_MAX_FAILURES.to_string(),
                         "Number of failures of any particular task before giving up on the task set".to_string(),
                         ConfigValueType::UInt, Some("4".to_string())),
        ConfigEntry::new(CORRAL_LOCALITY_WAIT.to_string(),
                         "How long to wait (ms) to launch a data-local task before giving up and launching it on a less-local executor".to_string(),
                         ConfigValueType::UInt, Some("3000".to_string())),
        ConfigEntry::new(CORRAL_LOCALITY_WAIT_PROCESS.to_string(),
                         "Locality wait (ms) for process locality".to_string(),
                         ConfigValueType::UInt, None),
        ConfigEntry::new(CORRAL_LOCALITY_WAIT_NODE.to_string(),
                         "Locality wait (ms) for node locality".to_string(),
                         ConfigValueType::UInt, None),
        ConfigEntry::new(CORRAL_LOCALITY_WAIT_RACK.to_string(),
                         "Locality wait (ms) for rack locality".to_string(),
                         ConfigValueType::UInt, None),
        ConfigEntry::new(CORRAL_SCHEDULER_MODE.to_string(),
                         "Ordering of task sets when offering resources, possible values: fifo, fair".to_string(),
                         ConfigValueType::Utf8, Some("fifo".to_string())),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Value type of a configuration entry, used to validate user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValueType {
    /// Non-negative integer.
    UInt,
    /// Free-form string.
    Utf8,
}

impl Display for ConfigValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValueType::UInt => f.write_str("uint"),
            ConfigValueType::Utf8 => f.write_str("utf8"),
        }
    }
}

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    description: String,
    value_type: ConfigValueType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        value_type: ConfigValueType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            value_type,
            default_value,
        }
    }

    /// Name of the setting.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human readable description of the setting.
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Corral configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorralConfig {
    /// Settings stored in map for easy serde
    settings: HashMap<String, String>,
}

impl CorralConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        for name in settings.keys() {
            if !Self::valid_entries().contains_key(name) {
                return Err(CorralError::Configuration(format!(
                    "configuration key `{name}` does not exist"
                )));
            }
        }
        let supported_entries = CorralConfig::valid_entries();
        for (name, entry) in supported_entries {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::parse_value(v.as_str(), entry.value_type).map_err(|e| CorralError::Configuration(format!("Failed to parse user-supplied value '{v}' for configuration setting '{name}': {e}")))?;
            } else if let Some(v) = entry.default_value.clone() {
                Self::parse_value(v.as_str(), entry.value_type).map_err(|e| CorralError::Configuration(format!("Failed to parse default value '{v}' for configuration setting '{name}': {e}")))?;
            }
        }

        Ok(Self { settings })
    }

    /// Validates that `val` can be parsed as `value_type`.
    pub fn parse_value(val: &str, value_type: ConfigValueType) -> ParseResult<()> {
        match value_type {
            ConfigValueType::UInt => {
                val.parse::<u64>().map_err(|e| format!("{e:?}"))?;
            }
            ConfigValueType::Utf8 => {}
        }

        Ok(())
    }

    /// All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    /// Explicitly set values, without defaults.
    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    /// Sets a single value, validating the key and the value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let entry = Self::valid_entries().get(key).ok_or_else(|| {
            CorralError::Configuration(format!("configuration key `{key}` does not exist"))
        })?;
        Self::parse_value(value, entry.value_type).map_err(|e| {
            CorralError::Configuration(format!(
                "Failed to parse value '{value}' for configuration setting '{key}': {e}"
            ))
        })?;
        self.settings.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    /// Cores each task occupies.
    pub fn cpus_per_task(&self) -> usize {
        self.get_u64_setting(CORRAL_TASK_CPUS).unwrap_or(1) as usize
    }

    /// Failures of one task after which its task set is aborted.
    pub fn max_task_failures(&self) -> usize {
        self.get_u64_setting(CORRAL_TASK_MAX_FAILURES).unwrap_or(4) as usize
    }

    /// Wait before relaxing a locality level, unless overridden per level.
    pub fn locality_wait(&self) -> Duration {
        Duration::from_millis(self.get_u64_setting(CORRAL_LOCALITY_WAIT).unwrap_or(3000))
    }

    /// Wait at the process local level.
    pub fn locality_wait_process(&self) -> Duration {
        self.get_u64_setting(CORRAL_LOCALITY_WAIT_PROCESS)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.locality_wait())
    }

    /// Wait at the node local level.
    pub fn locality_wait_node(&self) -> Duration {
        self.get_u64_setting(CORRAL_LOCALITY_WAIT_NODE)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.locality_wait())
    }

    /// Wait at the rack local level.
    pub fn locality_wait_rack(&self) -> Duration {
        self.get_u64_setting(CORRAL_LOCALITY_WAIT_RACK)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.locality_wait())
    }

    /// Ordering of task sets, `fifo` or `fair`.
    pub fn scheduler_mode(&self) -> String {
        self.get_string_setting(CORRAL_SCHEDULER_MODE)
            .unwrap_or_else(|| "fifo".to_string())
    }

    // values were validated when they were stored, so a parse failure here
    // can only come from an entry without a default
    fn get_u64_setting(&self, key: &str) -> Option<u64> {
        self.get_string_setting(key).and_then(|v| v.parse().ok())
    }

    fn get_string_setting(&self, key: &str) -> Option<String> {
        if let Some(v) = self.settings.get(key) {
            Some(v.to_string())
        } else {
            Self::valid_entries()
                .get(key)
                .and_then(|entry| entry.default_value.clone())
        }
    }
}

/// How often the log file of a binary is rolled.
#[derive(Clone, Copy, Debug, serde::Deserialize, Default)]
#[cfg_attr(feature = "build-binary", derive(clap::ValueEnum))]
pub enum LogRotationPolicy {
    /// A new file every minute.
    Minutely,
    /// A new file every hour.
    Hourly,
    /// A new file every day.
    Daily,
    /// A single file.
    #[default]
    Never,
}

impl Display for LogRotationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogRotationPolicy::Minutely => f.write_str("minutely"),
            LogRotationPolicy::Hourly => f.write_str("hourly"),
            LogRotationPolicy::Daily => f.write_str("daily"),
            LogRotationPolicy::Never => f.write_str("never"),
        }
    }
}

#[cfg(feature = "build-binary")]
impl std::str::FromStr for LogRotationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        clap::ValueEnum::from_str(s, true)
    }
}
