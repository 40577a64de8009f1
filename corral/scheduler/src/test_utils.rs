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

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corral_core::error::{CorralError, Result};
use corral_core::utils::ManualClock;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backend::SchedulerBackend;
use crate::callback::JobCallback;
use crate::config::SchedulerConfig;
use crate::scheduler_server::event::LossCause;
use crate::scheduler_server::ClusterTaskScheduler;
use crate::state::locality::TaskLocation;
use crate::state::task::{
    BytesPayload, Task, TaskInfo, TaskOutcome, TaskPayload, TaskSet, TaskSetId,
};

pub const TEST_SEED: u64 = 42;

/// Payload which can never be serialized.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingPayload;

impl TaskPayload for FailingPayload {
    fn encode(&self) -> Result<Vec<u8>> {
        Err(CorralError::General(
            "payload holds a handle which cannot be shipped".to_owned(),
        ))
    }
}

pub fn no_pref_task_set(stage_id: usize, stage_attempt_id: usize, num_tasks: usize) -> TaskSet {
    task_set_with_preferences(stage_id, stage_attempt_id, vec![vec![]; num_tasks])
}

pub fn task_set_with_preferences(
    stage_id: usize,
    stage_attempt_id: usize,
    preferences: Vec<Vec<TaskLocation>>,
) -> TaskSet {
    let tasks = preferences
        .into_iter()
        .enumerate()
        .map(|(index, preferred_locations)| {
            Task::new(
                index,
                preferred_locations,
                Arc::new(BytesPayload(format!("{stage_id}-{index}").into_bytes())),
            )
        })
        .collect();
    TaskSet::new(stage_id, stage_attempt_id, 0, tasks)
}

pub fn failing_task_set(stage_id: usize, stage_attempt_id: usize, num_tasks: usize) -> TaskSet {
    let tasks = (0..num_tasks)
        .map(|index| Task::new(index, vec![], Arc::new(FailingPayload)))
        .collect();
    TaskSet::new(stage_id, stage_attempt_id, 0, tasks)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRecord {
    TaskStarted {
        task_set_id: TaskSetId,
        index: usize,
        task_id: u64,
        executor_id: String,
    },
    TaskEnded {
        task_set_id: TaskSetId,
        index: usize,
        task_id: u64,
        success: bool,
    },
    ExecutorAdded {
        executor_id: String,
        host: String,
    },
    ExecutorLost {
        executor_id: String,
        message: String,
    },
    TaskSetFailed {
        task_set_id: TaskSetId,
        reason: String,
        exception: Option<String>,
    },
}

/// [JobCallback] which remembers every call.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    records: Mutex<Vec<CallbackRecord>>,
}

impl RecordingCallback {
    pub fn records(&self) -> Vec<CallbackRecord> {
        self.records.lock().clone()
    }

    pub fn failed_task_sets(&self) -> Vec<(TaskSetId, String, Option<String>)> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                CallbackRecord::TaskSetFailed {
                    task_set_id,
                    reason,
                    exception,
                } => Some((*task_set_id, reason.clone(), exception.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn ended_tasks(&self) -> Vec<(u64, bool)> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                CallbackRecord::TaskEnded {
                    task_id, success, ..
                } => Some((*task_id, *success)),
                _ => None,
            })
            .collect()
    }

    pub fn added_executors(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                CallbackRecord::ExecutorAdded { executor_id, host } => {
                    Some((executor_id.clone(), host.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn lost_executors(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                CallbackRecord::ExecutorLost { executor_id, .. } => Some(executor_id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl JobCallback for RecordingCallback {
    fn task_started(&self, task_set_id: TaskSetId, task: &Task, info: &TaskInfo) {
        self.records.lock().push(CallbackRecord::TaskStarted {
            task_set_id,
            index: task.index,
            task_id: info.task_id,
            executor_id: info.executor_id.clone(),
        });
    }

    fn task_ended(
        &self,
        task_set_id: TaskSetId,
        task: &Task,
        outcome: &TaskOutcome,
        info: &TaskInfo,
    ) {
        self.records.lock().push(CallbackRecord::TaskEnded {
            task_set_id,
            index: task.index,
            task_id: info.task_id,
            success: outcome.is_success(),
        });
    }

    fn executor_added(&self, executor_id: &str, host: &str) {
        self.records.lock().push(CallbackRecord::ExecutorAdded {
            executor_id: executor_id.to_owned(),
            host: host.to_owned(),
        });
    }

    fn executor_lost(&self, executor_id: &str, cause: &LossCause) {
        self.records.lock().push(CallbackRecord::ExecutorLost {
            executor_id: executor_id.to_owned(),
            message: cause.message.clone(),
        });
    }

    fn task_set_failed(&self, task_set: &TaskSet, reason: &str, exception: Option<&str>) {
        self.records.lock().push(CallbackRecord::TaskSetFailed {
            task_set_id: task_set.id(),
            reason: reason.to_owned(),
            exception: exception.map(str::to_owned),
        });
    }
}

/// [SchedulerBackend] which only records requests.
#[derive(Debug)]
pub struct RecordingBackend {
    revives: AtomicUsize,
    kills: Mutex<Vec<(u64, String, bool)>>,
    parallelism: usize,
}

impl RecordingBackend {
    pub fn new(parallelism: usize) -> Self {
        Self {
            revives: AtomicUsize::new(0),
            kills: Mutex::new(vec![]),
            parallelism,
        }
    }

    pub fn revive_count(&self) -> usize {
        self.revives.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> Vec<(u64, String, bool)> {
        self.kills.lock().clone()
    }
}

impl SchedulerBackend for RecordingBackend {
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn revive_offers(&self) {
        self.revives.fetch_add(1, Ordering::SeqCst);
    }

    fn default_parallelism(&self) -> usize {
        self.parallelism
    }

    fn kill_task(&self, task_id: u64, executor_id: &str, interrupt: bool, _reason: &str) {
        self.kills
            .lock()
            .push((task_id, executor_id.to_owned(), interrupt));
    }
}

pub struct TestScheduler {
    pub scheduler: Arc<ClusterTaskScheduler>,
    pub callback: Arc<RecordingCallback>,
    pub backend: Arc<RecordingBackend>,
    pub clock: Arc<ManualClock>,
}

/// Scheduler with a recording callback and backend, a manual clock and a
/// seeded random source.
pub fn test_scheduler(config: SchedulerConfig) -> TestScheduler {
    let callback = Arc::new(RecordingCallback::default());
    let backend = Arc::new(RecordingBackend::new(8));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let scheduler = Arc::new(ClusterTaskScheduler::new_with_components(
        Arc::new(config),
        callback.clone(),
        clock.clone(),
        Box::new(StdRng::seed_from_u64(TEST_SEED)),
    ));
    scheduler.initialize(backend.clone()).unwrap();

    TestScheduler {
        scheduler,
        callback,
        backend,
        clock,
    }
}

/// Poll `cond` every `interval` until it holds or `iterations` ran out.
pub async fn await_condition<Fut: Future<Output = Result<bool>>, F: Fn() -> Fut>(
    interval: Duration,
    iterations: usize,
    cond: F,
) -> Result<bool> {
    let mut iteration = 0;

    while iteration < iterations {
        let check = cond().await?;

        if check {
            return Ok(true);
        } else {
            iteration += 1;
            tokio::time::sleep(interval).await;
        }
    }

    Ok(false)
}
