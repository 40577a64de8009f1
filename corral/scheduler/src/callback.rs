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

use log::debug;

use crate::scheduler_server::event::LossCause;
use crate::state::task::{Task, TaskInfo, TaskOutcome, TaskSet, TaskSetId};

/// Receives scheduling events on behalf of the job layer.
///
/// Callbacks are invoked after the scheduler released its lock, so an
/// implementation may call back into the scheduler, e.g. to submit the next
/// stage from [`JobCallback::task_ended`].
pub trait JobCallback: Send + Sync {
    fn task_started(&self, task_set_id: TaskSetId, task: &Task, info: &TaskInfo);

    fn task_ended(
        &self,
        task_set_id: TaskSetId,
        task: &Task,
        outcome: &TaskOutcome,
        info: &TaskInfo,
    );

    fn executor_added(&self, executor_id: &str, host: &str);

    fn executor_lost(&self, executor_id: &str, cause: &LossCause);

    /// The attempt was aborted and will not schedule further tasks.
    fn task_set_failed(&self, task_set: &TaskSet, reason: &str, exception: Option<&str>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJobCallback {}

impl JobCallback for NoopJobCallback {
    fn task_started(&self, _task_set_id: TaskSetId, _task: &Task, _info: &TaskInfo) {}

    fn task_ended(
        &self,
        _task_set_id: TaskSetId,
        _task: &Task,
        _outcome: &TaskOutcome,
        _info: &TaskInfo,
    ) {
    }

    fn executor_added(&self, _executor_id: &str, _host: &str) {}

    fn executor_lost(&self, _executor_id: &str, _cause: &LossCause) {}

    fn task_set_failed(&self, task_set: &TaskSet, reason: &str, _exception: Option<&str>) {
        debug!("Task set {} failed: {reason}", task_set.id());
    }
}
