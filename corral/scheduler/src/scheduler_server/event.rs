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

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use crate::state::task::{TaskInfo, TaskOutcome, TaskSet};

/// Why an executor went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossCause {
    pub message: String,
    /// The loss was caused by the running application, e.g. it crashed the
    /// executor process. Such losses count towards task failure limits.
    pub caused_by_app: bool,
}

impl LossCause {
    pub fn new(message: impl Into<String>, caused_by_app: bool) -> Self {
        Self {
            message: message.into(),
            caused_by_app,
        }
    }
}

impl Display for LossCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Reason passed to [`ClusterTaskScheduler::executor_lost`](crate::scheduler_server::ClusterTaskScheduler::executor_lost).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorLossReason {
    /// The executor is gone but the reason is not known yet.
    Pending,
    Concrete(LossCause),
}

/// Side effects collected while holding the scheduler lock and dispatched
/// after it was released.
#[derive(Clone)]
pub(crate) enum SchedulerEvent {
    TaskStarted {
        task_set: Arc<TaskSet>,
        info: TaskInfo,
    },
    TaskEnded {
        task_set: Arc<TaskSet>,
        outcome: TaskOutcome,
        info: TaskInfo,
    },
    ExecutorAdded {
        executor_id: String,
        host: String,
    },
    ExecutorLost {
        executor_id: String,
        cause: LossCause,
    },
    TaskSetFailed {
        task_set: Arc<TaskSet>,
        reason: String,
        exception: Option<String>,
    },
    ReviveOffers,
    KillTask {
        task_id: u64,
        executor_id: String,
        interrupt: bool,
        reason: String,
    },
}

impl Debug for SchedulerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerEvent::TaskStarted { task_set, info } => {
                write!(
                    f,
                    "TaskStarted : task_set={}, index={}, task_id={}.",
                    task_set.id(),
                    info.index,
                    info.task_id
                )
            }
            SchedulerEvent::TaskEnded {
                task_set,
                outcome,
                info,
            } => {
                write!(
                    f,
                    "TaskEnded : task_set={}, index={}, task_id={}, success={}.",
                    task_set.id(),
                    info.index,
                    info.task_id,
                    outcome.is_success()
                )
            }
            SchedulerEvent::ExecutorAdded { executor_id, host } => {
                write!(f, "ExecutorAdded : executor_id={executor_id}, host={host}.")
            }
            SchedulerEvent::ExecutorLost { executor_id, cause } => {
                write!(f, "ExecutorLost : executor_id={executor_id}, cause={cause}.")
            }
            SchedulerEvent::TaskSetFailed {
                task_set, reason, ..
            } => {
                write!(f, "TaskSetFailed : task_set={}, reason={reason}.", task_set.id())
            }
            SchedulerEvent::ReviveOffers => {
                write!(f, "ReviveOffers.")
            }
            SchedulerEvent::KillTask {
                task_id,
                executor_id,
                interrupt,
                reason,
            } => {
                write!(
                    f,
                    "KillTask : task_id={task_id}, executor_id={executor_id}, interrupt={interrupt}, reason={reason}."
                )
            }
        }
    }
}
