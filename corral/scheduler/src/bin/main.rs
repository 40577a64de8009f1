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

//! Corral local runner binary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use std::{env, io};

use clap::Parser;
use corral_core::config::LogRotationPolicy;
use corral_core::error::{CorralError, Result};
use corral_core::print_version;
use corral_scheduler::backend::local::{LocalBackend, SimulatedTaskRunner};
use corral_scheduler::callback::JobCallback;
use corral_scheduler::config::{Config, SchedulerConfig};
use corral_scheduler::scheduler_server::event::LossCause;
use corral_scheduler::state::locality::TaskLocation;
use corral_scheduler::state::task::{
    JsonPayload, Task, TaskInfo, TaskOutcome, TaskSet, TaskSetId,
};
use corral_scheduler::ClusterTaskScheduler;
use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

const LOCAL_HOST: &str = "localhost";

#[derive(Default)]
struct Progress {
    succeeded: HashMap<TaskSetId, HashSet<usize>>,
    failures: HashMap<TaskSetId, String>,
}

/// Tracks stage completion for the runner.
struct StageTracker {
    tasks_per_stage: usize,
    progress: Mutex<Progress>,
    done: Notify,
}

impl StageTracker {
    fn new(tasks_per_stage: usize) -> Self {
        Self {
            tasks_per_stage,
            progress: Mutex::new(Progress::default()),
            done: Notify::new(),
        }
    }

    fn failure(&self, id: TaskSetId) -> Option<String> {
        self.progress.lock().failures.get(&id).cloned()
    }
}

impl JobCallback for StageTracker {
    fn task_started(&self, task_set_id: TaskSetId, task: &Task, info: &TaskInfo) {
        info!(
            "Started task {} of stage {task_set_id} on {} ({})",
            task.index, info.executor_id, info.locality
        );
    }

    fn task_ended(
        &self,
        task_set_id: TaskSetId,
        task: &Task,
        outcome: &TaskOutcome,
        info: &TaskInfo,
    ) {
        let TaskOutcome::Failed(reason) = outcome else {
            let mut progress = self.progress.lock();
            let succeeded = progress.succeeded.entry(task_set_id).or_default();
            succeeded.insert(task.index);
            if succeeded.len() == self.tasks_per_stage {
                self.done.notify_one();
            }
            return;
        };
        warn!(
            "Task {} attempt {} of stage {task_set_id} failed: {reason}",
            task.index, info.attempt_number
        );
    }

    fn executor_added(&self, executor_id: &str, host: &str) {
        info!("Executor {executor_id} registered on {host}");
    }

    fn executor_lost(&self, executor_id: &str, cause: &LossCause) {
        warn!("Executor {executor_id} lost: {cause}");
    }

    fn task_set_failed(&self, task_set: &TaskSet, reason: &str, _exception: Option<&str>) {
        error!("Stage {} aborted: {reason}", task_set.id());
        self.progress
            .lock()
            .failures
            .insert(task_set.id(), reason.to_owned());
        self.done.notify_one();
    }
}

fn stage(stage_id: usize, num_tasks: usize) -> TaskSet {
    let tasks = (0..num_tasks)
        .map(|index| {
            // Half of the tasks prefer the local host to exercise the locality levels
            let preferred_locations = if index % 2 == 0 {
                vec![TaskLocation::NodeLocal(LOCAL_HOST.to_owned())]
            } else {
                vec![]
            };
            Task::new(
                index,
                preferred_locations,
                Arc::new(JsonPayload(format!("stage {stage_id} task {index}"))),
            )
        })
        .collect();
    TaskSet::new(stage_id, 0, stage_id, tasks).with_property("runner", "corral-local")
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;

    runtime.block_on(inner())
}

async fn inner() -> Result<()> {
    // parse options
    let opt = Config::parse();

    let rust_log = env::var(EnvFilter::DEFAULT_ENV);
    let log_filter = EnvFilter::new(rust_log.unwrap_or(opt.log_level_setting.clone()));

    let tracing = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_thread_names(opt.print_thread_info)
        .with_thread_ids(opt.print_thread_info)
        .with_writer(io::stdout)
        .with_env_filter(log_filter);

    // File layer
    if let Some(log_dir) = &opt.log_dir {
        let log_file_name_prefix = format!("corral_local_{}", opt.cores);

        let log_file = match opt.log_rotation_policy {
            LogRotationPolicy::Minutely => {
                tracing_appender::rolling::minutely(log_dir, &log_file_name_prefix)
            }
            LogRotationPolicy::Hourly => {
                tracing_appender::rolling::hourly(log_dir, &log_file_name_prefix)
            }
            LogRotationPolicy::Daily => {
                tracing_appender::rolling::daily(log_dir, &log_file_name_prefix)
            }
            LogRotationPolicy::Never => {
                tracing_appender::rolling::never(log_dir, &log_file_name_prefix)
            }
        };

        tracing.with_writer(log_file).init();
    } else {
        tracing.init();
    }
    print_version();

    let config: SchedulerConfig = (&opt).try_into()?;
    let tracker = Arc::new(StageTracker::new(opt.tasks));
    let scheduler = Arc::new(ClusterTaskScheduler::new(
        Arc::new(config),
        tracker.clone(),
    ));
    let runner = SimulatedTaskRunner {
        duration: Duration::from_millis(opt.task_duration_ms),
        fail_every: opt.fail_every,
    };
    let backend = Arc::new(LocalBackend::new(
        &scheduler,
        "local-executor",
        LOCAL_HOST,
        opt.cores,
        Arc::new(runner),
    ));
    scheduler.initialize(backend)?;
    scheduler.start()?;
    info!(
        "Running {} stages of {} tasks with parallelism {}",
        opt.stages,
        opt.tasks,
        scheduler.default_parallelism()?
    );

    let mut result = Ok(());
    for stage_id in 0..opt.stages {
        if opt.tasks == 0 {
            break;
        }
        scheduler.submit_tasks(stage(stage_id, opt.tasks))?;
        tracker.done.notified().await;

        let id = TaskSetId::new(stage_id, 0);
        if let Some(reason) = tracker.failure(id) {
            result = Err(CorralError::General(format!(
                "Stage {stage_id} failed: {reason}"
            )));
            break;
        }
        info!("Stage {stage_id} finished");
    }

    scheduler.stop()?;
    result
}
