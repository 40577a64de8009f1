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

//! Tasks, task sets and the records exchanged with backends.

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use corral_core::error::{CorralError, Result};
use serde::Serialize;

use crate::state::locality::{TaskLocality, TaskLocation};

/// Opaque unit of work which is serialized when a task is launched.
pub trait TaskPayload: Send + Sync + Debug {
    /// Serialize the payload for shipment to an executor.
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Payload which is already serialized.
#[derive(Debug, Clone, Default)]
pub struct BytesPayload(pub Vec<u8>);

impl TaskPayload for BytesPayload {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Payload serialized as JSON at launch time.
#[derive(Debug, Clone)]
pub struct JsonPayload<T>(pub T);

impl<T> TaskPayload for JsonPayload<T>
where
    T: Serialize + Send + Sync + Debug,
{
    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(|e| {
            CorralError::General(format!("Failed to encode task payload: {e}"))
        })
    }
}

/// A single unit of work within a [`TaskSet`].
#[derive(Debug, Clone)]
pub struct Task {
    /// Position of the task within its task set.
    pub index: usize,
    /// Preferred locations, tightest constraints usually first.
    pub preferred_locations: Vec<TaskLocation>,
    /// Work to ship.
    pub payload: Arc<dyn TaskPayload>,
}

impl Task {
    pub fn new(
        index: usize,
        preferred_locations: Vec<TaskLocation>,
        payload: Arc<dyn TaskPayload>,
    ) -> Self {
        Self {
            index,
            preferred_locations,
            payload,
        }
    }
}

/// Identifies one attempt of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskSetId {
    pub stage_id: usize,
    pub stage_attempt_id: usize,
}

impl TaskSetId {
    pub fn new(stage_id: usize, stage_attempt_id: usize) -> Self {
        Self {
            stage_id,
            stage_attempt_id,
        }
    }
}

impl Display for TaskSetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.stage_id, self.stage_attempt_id)
    }
}

/// All tasks of one attempt of one stage.
#[derive(Debug, Clone)]
pub struct TaskSet {
    pub stage_id: usize,
    pub stage_attempt_id: usize,
    /// Lower values are scheduled first. Usually the job id.
    pub priority: usize,
    pub tasks: Vec<Task>,
    /// Free-form properties handed through to scheduling policies.
    pub properties: HashMap<String, String>,
}

impl TaskSet {
    pub fn new(
        stage_id: usize,
        stage_attempt_id: usize,
        priority: usize,
        tasks: Vec<Task>,
    ) -> Self {
        Self {
            stage_id,
            stage_attempt_id,
            priority,
            tasks,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> TaskSetId {
        TaskSetId::new(self.stage_id, self.stage_attempt_id)
    }
}

/// Free cores on one executor, offered for scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOffer {
    pub executor_id: String,
    pub host: String,
    pub free_cores: usize,
}

impl WorkerOffer {
    pub fn new(
        executor_id: impl Into<String>,
        host: impl Into<String>,
        free_cores: usize,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            host: host.into(),
            free_cores,
        }
    }
}

/// A launched task, ready to hand to a backend.
#[derive(Clone)]
pub struct TaskDescription {
    /// Globally unique id, monotonically assigned.
    pub task_id: u64,
    pub task_set_id: TaskSetId,
    pub index: usize,
    /// Number of earlier launches of the same task index.
    pub attempt_number: usize,
    pub executor_id: String,
    pub name: String,
    pub payload: Vec<u8>,
}

impl Debug for TaskDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TaskDescription[task_id: {}, name: {}, executor: {}, payload: {} bytes]",
            self.task_id,
            self.name,
            self.executor_id,
            self.payload.len()
        )
    }
}

/// Bookkeeping for a single launch of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub task_id: u64,
    pub index: usize,
    pub attempt_number: usize,
    /// Launch time in milliseconds since epoch.
    pub launch_time: u64,
    /// Finish time in milliseconds since epoch, zero while running.
    pub finish_time: u64,
    pub executor_id: String,
    pub host: String,
    pub locality: TaskLocality,
    pub successful: bool,
    pub failed: bool,
}

impl TaskInfo {
    pub fn is_finished(&self) -> bool {
        self.finish_time != 0
    }

    pub(crate) fn mark_finished(&mut self, successful: bool, time: u64) {
        // The finish time must differ from the running marker
        self.finish_time = time.max(1);
        self.successful = successful;
        self.failed = !successful;
    }
}

/// Why a launched task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailureReason {
    /// The task itself raised an error.
    Exception { message: String },
    /// The executor running the task went away.
    ExecutorLost {
        executor_id: String,
        message: String,
        caused_by_app: bool,
    },
    /// The task was killed on request.
    Killed { reason: String },
}

impl TaskFailureReason {
    /// Returns true if this failure counts towards the task's failure limit.
    pub fn counts_towards_task_failures(&self) -> bool {
        match self {
            TaskFailureReason::Exception { .. } => true,
            TaskFailureReason::ExecutorLost { caused_by_app, .. } => *caused_by_app,
            TaskFailureReason::Killed { .. } => false,
        }
    }
}

impl Display for TaskFailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailureReason::Exception { message } => write!(f, "{message}"),
            TaskFailureReason::ExecutorLost {
                executor_id,
                message,
                caused_by_app,
            } => write!(
                f,
                "Executor {executor_id} lost (caused by app: {caused_by_app}): {message}"
            ),
            TaskFailureReason::Killed { reason } => write!(f, "Task killed: {reason}"),
        }
    }
}

/// Final outcome of a task launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { result: Vec<u8> },
    Failed(TaskFailureReason),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// State reported by a backend for a running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Finished(Vec<u8>),
    Failed(String),
    Killed(String),
    /// The process running the task went away.
    Lost(String),
}

impl TaskState {
    /// Returns true for states after which the task will not report again.
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}
