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

//! Corral scheduler specific configuration

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use corral_core::config::CorralConfig;
use corral_core::error::CorralError;

use crate::policy::{FairOrder, FifoOrder, SchedulingOrder};
use crate::state::executor_topology::{NoRackResolver, RackResolver};
use crate::state::task_set_manager::LocalityWaits;

/// Configuration of the local demo application
#[cfg(feature = "build-binary")]
#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(
        long,
        default_value_t = 4,
        help = "Number of cores of the in-process executor. Default: 4"
    )]
    pub cores: usize,
    #[arg(
        long,
        default_value_t = 3,
        help = "Number of stages to run one after another. Default: 3"
    )]
    pub stages: usize,
    #[arg(
        long,
        default_value_t = 16,
        help = "Number of tasks in each stage. Default: 16"
    )]
    pub tasks: usize,
    #[arg(
        long,
        default_value_t = 50,
        help = "Simulated duration of each task in milliseconds. Default: 50"
    )]
    pub task_duration_ms: u64,
    #[arg(
        long,
        default_value_t = 0,
        help = "Fail the first attempt of every n-th task. Zero disables failure injection"
    )]
    pub fail_every: usize,
    #[arg(
        long,
        default_value_t = 1,
        help = "Number of cores reserved for each task. Default: 1"
    )]
    pub cpus_per_task: usize,
    #[arg(
        long,
        default_value_t = 4,
        help = "Number of failures of a task before its stage is aborted. Default: 4"
    )]
    pub max_task_failures: usize,
    #[arg(
        long,
        default_value_t = 3000,
        help = "Locality wait in milliseconds for every locality level. Default: 3000"
    )]
    pub locality_wait_ms: u64,
    #[arg(
        long,
        default_value_t = SchedulingMode::Fifo,
        help = "Ordering of task sets within a round, possible values: fifo, fair. Default: fifo"
    )]
    pub scheduling_mode: SchedulingMode,
    #[arg(
        long,
        default_value_t = 10000,
        help = "Event loop buffer size. Default: 10000"
    )]
    pub event_loop_buffer_size: u32,
    #[arg(
        long,
        help = "Log dir: a path to save log. This will create a new storage directory at the specified path if it does not already exist."
    )]
    pub log_dir: Option<String>,
    #[arg(
        long,
        default_value_t = true,
        help = "Enable print thread ids and names in log file."
    )]
    pub print_thread_info: bool,
    #[arg(
        long,
        default_value_t = String::from("INFO"),
        help = "Special log level for sub mod. For example INFO,corral_scheduler=DEBUG"
    )]
    pub log_level_setting: String,
    #[arg(
        long,
        default_value_t = corral_core::config::LogRotationPolicy::Daily,
        help = "Tracing log rotation policy, possible values: minutely, hourly, daily, never. Default: daily"
    )]
    pub log_rotation_policy: corral_core::config::LogRotationPolicy,
}

/// Configurations for scheduling task sets onto executors
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Cores reserved for every launched task
    pub cpus_per_task: usize,
    /// Failures of a single task after which its task set is aborted
    pub max_task_failures: usize,
    /// Wait at the process-local level before relaxing
    pub locality_wait_process: Duration,
    /// Wait at the node-local level before relaxing
    pub locality_wait_node: Duration,
    /// Wait at the rack-local level before relaxing
    pub locality_wait_rack: Duration,
    /// Ordering of task sets within a scheduling round
    pub scheduling_policy: SchedulingPolicy,
    /// Buffer size of backend event loops
    pub event_loop_buffer_size: u32,
    /// [RackResolver] used to place hosts onto racks
    pub rack_resolver: Arc<dyn RackResolver>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpus_per_task: 1,
            max_task_failures: 4,
            locality_wait_process: Duration::from_secs(3),
            locality_wait_node: Duration::from_secs(3),
            locality_wait_rack: Duration::from_secs(3),
            scheduling_policy: SchedulingPolicy::default(),
            event_loop_buffer_size: 10000,
            rack_resolver: Arc::new(NoRackResolver),
        }
    }
}

impl SchedulerConfig {
    pub fn locality_waits(&self) -> LocalityWaits {
        LocalityWaits {
            process: self.locality_wait_process,
            node: self.locality_wait_node,
            rack: self.locality_wait_rack,
        }
    }

    /// A task always occupies at least one core.
    pub fn with_cpus_per_task(mut self, cpus_per_task: usize) -> Self {
        self.cpus_per_task = cpus_per_task.max(1);
        self
    }

    pub fn with_max_task_failures(mut self, max_task_failures: usize) -> Self {
        self.max_task_failures = max_task_failures;
        self
    }

    /// Set the wait of every locality level.
    pub fn with_locality_wait(mut self, wait: Duration) -> Self {
        self.locality_wait_process = wait;
        self.locality_wait_node = wait;
        self.locality_wait_rack = wait;
        self
    }

    pub fn with_locality_wait_process(mut self, wait: Duration) -> Self {
        self.locality_wait_process = wait;
        self
    }

    pub fn with_locality_wait_node(mut self, wait: Duration) -> Self {
        self.locality_wait_node = wait;
        self
    }

    pub fn with_locality_wait_rack(mut self, wait: Duration) -> Self {
        self.locality_wait_rack = wait;
        self
    }

    pub fn with_scheduling_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.scheduling_policy = policy;
        self
    }

    pub fn with_event_loop_buffer_size(mut self, buffer_size: u32) -> Self {
        self.event_loop_buffer_size = buffer_size;
        self
    }

    pub fn with_rack_resolver(mut self, rack_resolver: Arc<dyn RackResolver>) -> Self {
        self.rack_resolver = rack_resolver;
        self
    }
}

/// Ordering of task sets within a scheduling round
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[cfg_attr(feature = "build-binary", derive(clap::ValueEnum))]
pub enum SchedulingMode {
    /// By priority, then by stage
    Fifo,
    /// Task sets with fewer running tasks first
    Fair,
}

impl Display for SchedulingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingMode::Fifo => f.write_str("fifo"),
            SchedulingMode::Fair => f.write_str("fair"),
        }
    }
}

impl std::str::FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(SchedulingMode::Fifo),
            "fair" => Ok(SchedulingMode::Fair),
            other => Err(format!("Unknown scheduling mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum SchedulingPolicy {
    #[default]
    Fifo,
    Fair,
    /// User provided ordering
    Custom(Arc<dyn SchedulingOrder>),
}

impl SchedulingPolicy {
    pub fn order(&self) -> Arc<dyn SchedulingOrder> {
        match self {
            SchedulingPolicy::Fifo => Arc::new(FifoOrder),
            SchedulingPolicy::Fair => Arc::new(FairOrder),
            SchedulingPolicy::Custom(order) => order.clone(),
        }
    }
}

impl From<SchedulingMode> for SchedulingPolicy {
    fn from(mode: SchedulingMode) -> Self {
        match mode {
            SchedulingMode::Fifo => SchedulingPolicy::Fifo,
            SchedulingMode::Fair => SchedulingPolicy::Fair,
        }
    }
}

impl TryFrom<&CorralConfig> for SchedulerConfig {
    type Error = CorralError;

    fn try_from(config: &CorralConfig) -> Result<Self, Self::Error> {
        let mode: SchedulingMode = config
            .scheduler_mode()
            .parse()
            .map_err(CorralError::Configuration)?;
        if config.cpus_per_task() == 0 {
            return Err(CorralError::Configuration(
                "corral.task.cpus must be at least 1".to_owned(),
            ));
        }
        if config.max_task_failures() == 0 {
            return Err(CorralError::Configuration(
                "corral.task.max_failures must be at least 1".to_owned(),
            ));
        }

        Ok(SchedulerConfig::default()
            .with_cpus_per_task(config.cpus_per_task())
            .with_max_task_failures(config.max_task_failures())
            .with_locality_wait_process(config.locality_wait_process())
            .with_locality_wait_node(config.locality_wait_node())
            .with_locality_wait_rack(config.locality_wait_rack())
            .with_scheduling_policy(mode.into()))
    }
}

#[cfg(feature = "build-binary")]
impl TryFrom<&Config> for SchedulerConfig {
    type Error = CorralError;

    fn try_from(opt: &Config) -> Result<Self, Self::Error> {
        if opt.cpus_per_task == 0 || opt.cpus_per_task > opt.cores {
            return Err(CorralError::Configuration(format!(
                "cpus-per-task must be between 1 and {}",
                opt.cores
            )));
        }

        Ok(SchedulerConfig::default()
            .with_cpus_per_task(opt.cpus_per_task)
            .with_max_task_failures(opt.max_task_failures.max(1))
            .with_locality_wait(Duration::from_millis(opt.locality_wait_ms))
            .with_scheduling_policy(opt.scheduling_mode.into())
            .with_event_loop_buffer_size(opt.event_loop_buffer_size))
    }
}
