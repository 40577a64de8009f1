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

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use corral_core::error::{CorralError, Result};
use log::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::state::executor_topology::ExecutorTopology;
use crate::state::locality::{TaskLocality, TaskLocation};
use crate::state::task::{
    Task, TaskDescription, TaskInfo, TaskOutcome, TaskSet, TaskSetId,
};

/// Scheduling status of one task index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running { task_id: u64, executor_id: String },
    Success,
    /// Failed too often, the attempt was aborted because of it.
    Failed,
}

/// How long to wait at each tier before relaxing to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalityWaits {
    pub process: Duration,
    pub node: Duration,
    pub rack: Duration,
}

impl LocalityWaits {
    fn wait_millis(&self, level: TaskLocality) -> u64 {
        let wait = match level {
            TaskLocality::ProcessLocal => self.process,
            TaskLocality::NodeLocal => self.node,
            TaskLocality::RackLocal => self.rack,
            TaskLocality::NoPreference | TaskLocality::Any => Duration::ZERO,
        };
        wait.as_millis() as u64
    }
}

/// What happened as a result of [`TaskSetManager::handle_task_completion`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    /// Final info of the launch, `None` if the task id was not running here.
    pub info: Option<TaskInfo>,
    /// The task was put back into the pending lists.
    pub requeued: bool,
    /// The attempt was aborted with this reason.
    pub abort: Option<String>,
}

/// Point-in-time view of a task set attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSetSnapshot {
    pub id: TaskSetId,
    pub is_zombie: bool,
    pub pending: usize,
    pub running: usize,
    pub successful: usize,
    pub locality_levels: Vec<TaskLocality>,
    pub failure_reason: Option<String>,
}

/// Indices of pending tasks, bucketed by preference.
///
/// Entries are dropped lazily: an index whose task is no longer pending is
/// skipped and removed when encountered. Lists are used as stacks and tasks
/// are added in reverse order so lower indices are launched first.
#[derive(Debug, Default)]
struct PendingTasks {
    for_executor: HashMap<String, Vec<usize>>,
    for_host: HashMap<String, Vec<usize>>,
    for_rack: HashMap<String, Vec<usize>>,
    no_prefs: Vec<usize>,
    all: Vec<usize>,
    /// Failed tasks which may run at any locality without delay.
    retries: Vec<usize>,
}

/// Scheduling state of one attempt of one stage.
pub struct TaskSetManager {
    task_set: Arc<TaskSet>,
    /// Position in submission order, used to break priority ties.
    submission_seq: u64,
    max_task_failures: usize,
    locality_waits: LocalityWaits,
    statuses: Vec<TaskStatus>,
    failure_counts: Vec<usize>,
    launch_counts: Vec<usize>,
    /// Running task id to task index.
    running: HashMap<u64, usize>,
    task_infos: HashMap<u64, TaskInfo>,
    successful: usize,
    is_zombie: bool,
    failure_reason: Option<String>,
    pending: PendingTasks,
    locality_levels: Vec<TaskLocality>,
    current_locality_index: usize,
    /// Time of the last launch or of the last relaxation of the allowed level.
    last_launch_time: u64,
}

impl Debug for TaskSetManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TaskSetManager[{}, tasks: {}, running: {}, successful: {}, zombie: {}]",
            self.id(),
            self.statuses.len(),
            self.running.len(),
            self.successful,
            self.is_zombie
        )
    }
}

impl TaskSetManager {
    pub fn new(
        task_set: Arc<TaskSet>,
        config: &SchedulerConfig,
        topology: &ExecutorTopology,
        now: u64,
    ) -> Self {
        let num_tasks = task_set.tasks.len();
        let mut manager = Self {
            task_set,
            submission_seq: 0,
            max_task_failures: config.max_task_failures,
            locality_waits: config.locality_waits(),
            statuses: vec![TaskStatus::Pending; num_tasks],
            failure_counts: vec![0; num_tasks],
            launch_counts: vec![0; num_tasks],
            running: HashMap::new(),
            task_infos: HashMap::new(),
            successful: 0,
            is_zombie: num_tasks == 0,
            failure_reason: None,
            pending: PendingTasks::default(),
            locality_levels: vec![],
            current_locality_index: 0,
            last_launch_time: now,
        };
        for index in (0..num_tasks).rev() {
            manager.add_pending_task(index, topology, false);
        }
        manager.locality_levels = manager.compute_valid_locality_levels(topology);
        debug!(
            "Valid locality levels for task set {}: {:?}",
            manager.id(),
            manager.locality_levels
        );
        manager
    }

    pub fn with_submission_seq(mut self, submission_seq: u64) -> Self {
        self.submission_seq = submission_seq;
        self
    }

    pub fn id(&self) -> TaskSetId {
        self.task_set.id()
    }

    pub fn submission_seq(&self) -> u64 {
        self.submission_seq
    }

    pub fn task_set(&self) -> &Arc<TaskSet> {
        &self.task_set
    }

    pub fn task(&self, index: usize) -> Option<&Task> {
        self.task_set.tasks.get(index)
    }

    pub fn task_status(&self, index: usize) -> Option<&TaskStatus> {
        self.statuses.get(index)
    }

    pub fn is_zombie(&self) -> bool {
        self.is_zombie
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn running_tasks(&self) -> usize {
        self.running.len()
    }

    pub fn running_task_ids(&self) -> Vec<u64> {
        self.running.keys().copied().collect()
    }

    pub fn task_info(&self, task_id: u64) -> Option<&TaskInfo> {
        self.task_infos.get(&task_id)
    }

    pub fn locality_levels(&self) -> &[TaskLocality] {
        &self.locality_levels
    }

    pub fn snapshot(&self) -> TaskSetSnapshot {
        TaskSetSnapshot {
            id: self.id(),
            is_zombie: self.is_zombie,
            pending: self
                .statuses
                .iter()
                .filter(|status| **status == TaskStatus::Pending)
                .count(),
            running: self.running.len(),
            successful: self.successful,
            locality_levels: self.locality_levels.clone(),
            failure_reason: self.failure_reason.clone(),
        }
    }

    /// Offer one executor slot to this attempt.
    ///
    /// Returns `Ok(None)` if no task may run there at `max_locality` right
    /// now, and [`CorralError::TaskSerialization`] if the chosen task could
    /// not be serialized, in which case the whole attempt should be aborted.
    pub fn resource_offer(
        &mut self,
        executor_id: &str,
        host: &str,
        rack: Option<&str>,
        max_locality: TaskLocality,
        now: u64,
        next_task_id: &mut u64,
    ) -> Result<Option<TaskDescription>> {
        if self.is_zombie {
            return Ok(None);
        }

        let allowed_locality = if max_locality == TaskLocality::NoPreference {
            max_locality
        } else {
            self.get_allowed_locality_level(now).min(max_locality)
        };

        let retried = if max_locality == TaskLocality::Any {
            self.dequeue_retry()
        } else {
            None
        };
        let is_retry = retried.is_some();
        let Some((index, locality)) = retried
            .map(|index| (index, TaskLocality::Any))
            .or_else(|| self.dequeue_task(executor_id, host, rack, allowed_locality))
        else {
            return Ok(None);
        };

        let payload = match self.task_set.tasks[index].payload.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "Failed to serialize task {index} of task set {}: {e}",
                    self.id()
                );
                return Err(CorralError::TaskSerialization(index, e.to_string()));
            }
        };

        let task_id = *next_task_id;
        *next_task_id += 1;
        let attempt_number = self.launch_counts[index];
        self.launch_counts[index] += 1;

        self.statuses[index] = TaskStatus::Running {
            task_id,
            executor_id: executor_id.to_owned(),
        };
        self.running.insert(task_id, index);
        self.task_infos.insert(
            task_id,
            TaskInfo {
                task_id,
                index,
                attempt_number,
                launch_time: now,
                finish_time: 0,
                executor_id: executor_id.to_owned(),
                host: host.to_owned(),
                locality,
                successful: false,
                failed: false,
            },
        );

        // Neither retries nor tasks without preferences relax the delay
        if max_locality != TaskLocality::NoPreference && !is_retry {
            let reset_to = if locality == TaskLocality::NoPreference {
                TaskLocality::ProcessLocal
            } else {
                locality
            };
            self.current_locality_index = self.locality_index(reset_to);
            self.last_launch_time = now;
        }

        let name = format!("task {index}.{attempt_number} in stage {}", self.id());
        info!(
            "Starting {name} (TID {task_id}, {host}, executor {executor_id}, {locality}, {} bytes)",
            payload.len()
        );

        Ok(Some(TaskDescription {
            task_id,
            task_set_id: self.id(),
            index,
            attempt_number,
            executor_id: executor_id.to_owned(),
            name,
            payload,
        }))
    }

    /// Record the outcome of a launched task.
    pub fn handle_task_completion(
        &mut self,
        task_id: u64,
        outcome: &TaskOutcome,
        topology: &ExecutorTopology,
        now: u64,
    ) -> CompletionReport {
        let Some(index) = self.running.remove(&task_id) else {
            debug!(
                "Ignoring completion of task {task_id} which is not running in task set {}",
                self.id()
            );
            return CompletionReport::default();
        };
        let mut report = CompletionReport::default();
        let mut info = match self.task_infos.remove(&task_id) {
            Some(info) => info,
            None => return report,
        };
        info.mark_finished(outcome.is_success(), now);

        match outcome {
            TaskOutcome::Success { .. } => {
                self.statuses[index] = TaskStatus::Success;
                self.successful += 1;
                info!(
                    "Finished task {index}.{} in stage {} (TID {task_id}) in {} ms on {} ({}/{})",
                    info.attempt_number,
                    self.id(),
                    info.finish_time.saturating_sub(info.launch_time),
                    info.host,
                    self.successful,
                    self.statuses.len()
                );
                if self.successful == self.statuses.len() {
                    info!("All tasks of task set {} have finished", self.id());
                    self.is_zombie = true;
                }
            }
            TaskOutcome::Failed(reason) => {
                warn!(
                    "Lost task {index}.{} in stage {} (TID {task_id}) ({}, executor {}): {reason}",
                    info.attempt_number,
                    self.id(),
                    info.host,
                    info.executor_id
                );
                self.statuses[index] = TaskStatus::Pending;

                if reason.counts_towards_task_failures() {
                    self.failure_counts[index] += 1;
                    let failures = self.failure_counts[index];
                    if failures >= self.max_task_failures {
                        self.statuses[index] = TaskStatus::Failed;
                        if !self.is_zombie {
                            let message = format!(
                                "Task {index} in stage {} failed {failures} times, most recent failure: {reason}",
                                self.id()
                            );
                            self.abort(message.clone());
                            report.abort = Some(message);
                        }
                        report.info = Some(info);
                        return report;
                    }
                }

                if !self.is_zombie {
                    self.add_pending_task(index, topology, true);
                    report.requeued = true;
                }
            }
        }

        report.info = Some(info);
        report
    }

    /// Forget launches made earlier in an offer round which never reached a
    /// backend. Only meaningful for an attempt which is being aborted.
    pub fn discard_launches(&mut self, task_ids: &[u64]) {
        for task_id in task_ids {
            if let Some(index) = self.running.remove(task_id) {
                self.task_infos.remove(task_id);
                self.statuses[index] = TaskStatus::Pending;
                self.launch_counts[index] = self.launch_counts[index].saturating_sub(1);
            }
        }
    }

    /// Stop scheduling this attempt because of an unrecoverable failure.
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Aborting task set {}: {reason}", self.id());
        if self.failure_reason.is_none() {
            self.failure_reason = Some(reason);
        }
        self.is_zombie = true;
    }

    /// Stop scheduling this attempt without marking it as failed.
    pub fn mark_zombie(&mut self) {
        if !self.is_zombie {
            info!("Task set {} marked as zombie", self.id());
            self.is_zombie = true;
        }
    }

    /// Recompute the valid locality levels after the set of live executors
    /// changed, keeping the current level where possible.
    pub fn recompute_locality_levels(&mut self, topology: &ExecutorTopology) {
        let previous = self
            .locality_levels
            .get(self.current_locality_index)
            .copied()
            .unwrap_or(TaskLocality::ProcessLocal);
        let levels = self.compute_valid_locality_levels(topology);
        if levels != self.locality_levels {
            debug!(
                "Locality levels of task set {} changed from {:?} to {:?}",
                self.id(),
                self.locality_levels,
                levels
            );
        }
        self.locality_levels = levels;
        self.current_locality_index = self.locality_index(previous);
    }

    fn add_pending_task(&mut self, index: usize, topology: &ExecutorTopology, retry: bool) {
        let pending = &mut self.pending;
        let task = &self.task_set.tasks[index];

        for location in &task.preferred_locations {
            match location {
                TaskLocation::ProcessLocal(executor_id) => {
                    pending
                        .for_executor
                        .entry(executor_id.clone())
                        .or_default()
                        .push(index);
                }
                TaskLocation::NodeLocal(host) => {
                    pending.for_host.entry(host.clone()).or_default().push(index);
                    if let Some(rack) = topology.rack_for_host(host) {
                        pending.for_rack.entry(rack).or_default().push(index);
                    }
                }
                TaskLocation::RackLocal(rack) => {
                    pending.for_rack.entry(rack.clone()).or_default().push(index);
                }
                TaskLocation::NoPreference | TaskLocation::Any => {}
            }
        }

        if !task.preferred_locations.iter().any(TaskLocation::is_constraint) {
            pending.no_prefs.push(index);
        }
        if retry {
            pending.retries.push(index);
        }
        pending.all.push(index);
    }

    fn compute_valid_locality_levels(&mut self, topology: &ExecutorTopology) -> Vec<TaskLocality> {
        let statuses = &self.statuses;
        let pending = &mut self.pending;
        let mut levels = vec![];

        prune_lists(&mut pending.for_executor, statuses);
        if pending
            .for_executor
            .keys()
            .any(|executor_id| topology.is_executor_alive(executor_id))
        {
            levels.push(TaskLocality::ProcessLocal);
        }
        prune_lists(&mut pending.for_host, statuses);
        if pending
            .for_host
            .keys()
            .any(|host| topology.has_executors_alive_on_host(host))
        {
            levels.push(TaskLocality::NodeLocal);
        }
        prune_lists(&mut pending.for_rack, statuses);
        if pending
            .for_rack
            .keys()
            .any(|rack| topology.has_host_alive_on_rack(rack))
        {
            levels.push(TaskLocality::RackLocal);
        }
        if prune_list(&mut pending.no_prefs, statuses) {
            levels.push(TaskLocality::NoPreference);
        }
        levels.push(TaskLocality::Any);
        levels
    }

    /// Tightest level tasks may currently be launched at, relaxing levels
    /// whose wait expired or which have nothing left to run.
    fn get_allowed_locality_level(&mut self, now: u64) -> TaskLocality {
        while self.current_locality_index + 1 < self.locality_levels.len() {
            let level = self.locality_levels[self.current_locality_index];
            let statuses = &self.statuses;
            let pending = &mut self.pending;
            let more_tasks = match level {
                TaskLocality::ProcessLocal => prune_lists(&mut pending.for_executor, statuses),
                TaskLocality::NodeLocal => prune_lists(&mut pending.for_host, statuses),
                TaskLocality::RackLocal => prune_lists(&mut pending.for_rack, statuses),
                TaskLocality::NoPreference => prune_list(&mut pending.no_prefs, statuses),
                TaskLocality::Any => true,
            };
            let wait = self.locality_waits.wait_millis(level);

            if !more_tasks {
                self.last_launch_time = now;
                self.current_locality_index += 1;
                debug!(
                    "No tasks for locality level {level} in task set {}, moving to {}",
                    self.id(),
                    self.locality_levels[self.current_locality_index]
                );
            } else if now.saturating_sub(self.last_launch_time) >= wait {
                self.last_launch_time += wait;
                self.current_locality_index += 1;
                debug!(
                    "Moving to {} after waiting for {wait}ms in task set {}",
                    self.locality_levels[self.current_locality_index],
                    self.id()
                );
            } else {
                return level;
            }
        }
        self.locality_levels
            .get(self.current_locality_index)
            .copied()
            .unwrap_or(TaskLocality::Any)
    }

    fn locality_index(&self, locality: TaskLocality) -> usize {
        self.locality_levels
            .iter()
            .position(|level| *level >= locality)
            .unwrap_or(self.locality_levels.len().saturating_sub(1))
    }

    fn dequeue_retry(&mut self) -> Option<usize> {
        pop_pending(&mut self.pending.retries, &self.statuses)
    }

    fn dequeue_task(
        &mut self,
        executor_id: &str,
        host: &str,
        rack: Option<&str>,
        max_locality: TaskLocality,
    ) -> Option<(usize, TaskLocality)> {
        let statuses = &self.statuses;
        let pending = &mut self.pending;

        if let Some(index) = pending
            .for_executor
            .get_mut(executor_id)
            .and_then(|list| pop_pending(list, statuses))
        {
            return Some((index, TaskLocality::ProcessLocal));
        }

        if TaskLocality::NodeLocal.is_allowed(max_locality) {
            if let Some(index) = pending
                .for_host
                .get_mut(host)
                .and_then(|list| pop_pending(list, statuses))
            {
                return Some((index, TaskLocality::NodeLocal));
            }
        }

        if TaskLocality::RackLocal.is_allowed(max_locality) {
            if let Some(index) = rack
                .and_then(|rack| pending.for_rack.get_mut(rack))
                .and_then(|list| pop_pending(list, statuses))
            {
                return Some((index, TaskLocality::RackLocal));
            }
        }

        if TaskLocality::NoPreference.is_allowed(max_locality) {
            if let Some(index) = pop_pending(&mut pending.no_prefs, statuses) {
                return Some((index, TaskLocality::NoPreference));
            }
        }

        if TaskLocality::Any.is_allowed(max_locality) {
            if let Some(index) = pop_pending(&mut pending.all, statuses) {
                return Some((index, TaskLocality::Any));
            }
        }

        None
    }
}

fn pop_pending(list: &mut Vec<usize>, statuses: &[TaskStatus]) -> Option<usize> {
    while let Some(index) = list.pop() {
        if statuses[index] == TaskStatus::Pending {
            return Some(index);
        }
    }
    None
}

fn prune_list(list: &mut Vec<usize>, statuses: &[TaskStatus]) -> bool {
    list.retain(|index| statuses[*index] == TaskStatus::Pending);
    !list.is_empty()
}

fn prune_lists(lists: &mut HashMap<String, Vec<usize>>, statuses: &[TaskStatus]) -> bool {
    lists.retain(|_, list| prune_list(list, statuses));
    !lists.is_empty()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::executor_topology::StaticRackResolver;
    use crate::state::task::TaskFailureReason;
    use crate::test_utils::{
        failing_task_set, no_pref_task_set, task_set_with_preferences,
    };

    const WAIT: Duration = Duration::from_millis(3000);

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_task_failures(2)
            .with_locality_wait(WAIT)
    }

    fn topology(executors: &[(&str, &str)]) -> ExecutorTopology {
        let mut topology = ExecutorTopology::new(Arc::new(StaticRackResolver::new([
            ("host1", "rack1"),
            ("host2", "rack1"),
            ("host3", "rack2"),
        ])));
        for (executor_id, host) in executors {
            topology.record_executor(executor_id, host);
        }
        topology
    }

    fn exception(message: &str) -> TaskOutcome {
        TaskOutcome::Failed(TaskFailureReason::Exception {
            message: message.to_owned(),
        })
    }

    #[test]
    fn process_local_offer_launches_immediately() -> Result<()> {
        let topology = topology(&[("exec1", "host1"), ("exec2", "host2")]);
        let task_set = task_set_with_preferences(
            0,
            0,
            vec![vec![TaskLocation::ProcessLocal("exec1".to_owned())]],
        );
        let mut manager = TaskSetManager::new(Arc::new(task_set), &config(), &topology, 0);
        let mut next_task_id = 0;

        assert_eq!(
            manager.locality_levels(),
            &[TaskLocality::ProcessLocal, TaskLocality::Any]
        );

        let task = manager
            .resource_offer("exec1", "host1", None, TaskLocality::ProcessLocal, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        assert_eq!(task.task_id, 0);
        assert_eq!(task.executor_id, "exec1");
        assert_eq!(next_task_id, 1);
        assert_eq!(
            manager.task_info(task.task_id).map(|info| info.locality),
            Some(TaskLocality::ProcessLocal)
        );
        Ok(())
    }

    #[test]
    fn delay_scheduling_waits_before_relaxing() -> Result<()> {
        let topology = topology(&[("exec1", "host1"), ("exec2", "host2")]);
        let task_set = task_set_with_preferences(
            0,
            0,
            vec![
                vec![TaskLocation::ProcessLocal("exec1".to_owned())],
                vec![TaskLocation::ProcessLocal("exec1".to_owned())],
            ],
        );
        let mut manager = TaskSetManager::new(Arc::new(task_set), &config(), &topology, 0);
        let mut next_task_id = 0;

        // Wrong executor before the wait expires
        assert!(manager
            .resource_offer("exec2", "host2", None, TaskLocality::Any, 1000, &mut next_task_id)?
            .is_none());

        // Once the process wait expired the task may run anywhere
        let task = manager
            .resource_offer("exec2", "host2", None, TaskLocality::Any, 3000, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        assert_eq!(task.index, 0);
        assert_eq!(
            manager.task_info(task.task_id).map(|info| info.locality),
            Some(TaskLocality::Any)
        );

        // A process local launch resets the delay
        manager
            .resource_offer("exec1", "host1", None, TaskLocality::ProcessLocal, 3500, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        assert_eq!(manager.snapshot().pending, 0);
        Ok(())
    }

    #[test]
    fn node_and_rack_preferences() -> Result<()> {
        let topology = topology(&[("exec1", "host1"), ("exec2", "host2"), ("exec3", "host3")]);
        let task_set = task_set_with_preferences(
            0,
            0,
            vec![vec![TaskLocation::NodeLocal("host1".to_owned())]],
        );
        let config = config().with_locality_wait(Duration::ZERO);
        let mut manager = TaskSetManager::new(Arc::new(task_set), &config, &topology, 0);
        let mut next_task_id = 0;

        assert_eq!(
            manager.locality_levels(),
            &[TaskLocality::NodeLocal, TaskLocality::RackLocal, TaskLocality::Any]
        );

        // Different rack is not acceptable at rack locality
        assert!(manager
            .resource_offer("exec3", "host3", Some("rack2"), TaskLocality::RackLocal, 0, &mut next_task_id)?
            .is_none());

        let task = manager
            .resource_offer("exec2", "host2", Some("rack1"), TaskLocality::RackLocal, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        assert_eq!(
            manager.task_info(task.task_id).map(|info| info.locality),
            Some(TaskLocality::RackLocal)
        );
        Ok(())
    }

    #[test]
    fn no_preference_tasks_skip_delay() -> Result<()> {
        let topology = topology(&[("exec1", "host1")]);
        let mut manager =
            TaskSetManager::new(Arc::new(no_pref_task_set(0, 0, 2)), &config(), &topology, 0);
        let mut next_task_id = 0;

        assert_eq!(
            manager.locality_levels(),
            &[TaskLocality::NoPreference, TaskLocality::Any]
        );
        assert!(manager
            .resource_offer("exec1", "host1", None, TaskLocality::NodeLocal, 0, &mut next_task_id)?
            .is_none());
        assert!(manager
            .resource_offer("exec1", "host1", None, TaskLocality::NoPreference, 0, &mut next_task_id)?
            .is_some());
        Ok(())
    }

    #[test]
    fn failed_task_is_retried_until_limit() -> Result<()> {
        let topology = topology(&[("exec1", "host1")]);
        let mut manager =
            TaskSetManager::new(Arc::new(no_pref_task_set(3, 0, 1)), &config(), &topology, 0);
        let mut next_task_id = 0;

        let first = manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        let report = manager.handle_task_completion(first.task_id, &exception("boom"), &topology, 10);
        assert!(report.requeued);
        assert_eq!(report.abort, None);
        assert_eq!(report.info.map(|info| info.failed), Some(true));

        let second = manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 20, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a retry".to_owned()))?;
        assert_eq!(second.index, 0);
        assert_eq!(second.attempt_number, 1);

        let report = manager.handle_task_completion(second.task_id, &exception("boom"), &topology, 30);
        assert!(!report.requeued);
        let reason = report
            .abort
            .ok_or_else(|| CorralError::Internal("expected an abort".to_owned()))?;
        assert!(reason.contains("failed 2 times"));
        assert!(manager.is_zombie());
        assert_eq!(manager.task_status(0), Some(&TaskStatus::Failed));
        assert_eq!(manager.failure_reason(), Some(reason.as_str()));
        Ok(())
    }

    #[test]
    fn executor_loss_not_caused_by_app_is_not_counted() -> Result<()> {
        let topology = topology(&[("exec1", "host1")]);
        let mut manager =
            TaskSetManager::new(Arc::new(no_pref_task_set(0, 0, 1)), &config(), &topology, 0);
        let mut next_task_id = 0;
        let lost = TaskOutcome::Failed(TaskFailureReason::ExecutorLost {
            executor_id: "exec1".to_owned(),
            message: "decommissioned".to_owned(),
            caused_by_app: false,
        });

        for now in 0..5 {
            let task = manager
                .resource_offer("exec1", "host1", None, TaskLocality::Any, now, &mut next_task_id)?
                .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
            let report = manager.handle_task_completion(task.task_id, &lost, &topology, now);
            assert!(report.requeued);
        }
        assert!(!manager.is_zombie());
        Ok(())
    }

    #[test]
    fn all_successful_tasks_make_zombie() -> Result<()> {
        let topology = topology(&[("exec1", "host1")]);
        let mut manager =
            TaskSetManager::new(Arc::new(no_pref_task_set(0, 0, 2)), &config(), &topology, 0);
        let mut next_task_id = 0;
        let success = TaskOutcome::Success { result: vec![] };

        let first = manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        let second = manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        assert_eq!((first.index, second.index), (0, 1));

        manager.handle_task_completion(first.task_id, &success, &topology, 5);
        assert!(!manager.is_zombie());
        manager.handle_task_completion(second.task_id, &success, &topology, 5);
        assert!(manager.is_zombie());
        assert_eq!(manager.running_tasks(), 0);
        assert_eq!(manager.failure_reason(), None);

        // Late duplicate is ignored
        let report = manager.handle_task_completion(second.task_id, &exception("late"), &topology, 6);
        assert_eq!(report, CompletionReport::default());
        assert_eq!(manager.snapshot().successful, 2);
        Ok(())
    }

    #[test]
    fn zombie_offers_nothing_but_accepts_completions() -> Result<()> {
        let topology = topology(&[("exec1", "host1")]);
        let mut manager =
            TaskSetManager::new(Arc::new(no_pref_task_set(0, 0, 2)), &config(), &topology, 0);
        let mut next_task_id = 0;

        let task = manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        manager.mark_zombie();
        assert!(manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?
            .is_none());

        let report = manager.handle_task_completion(task.task_id, &exception("boom"), &topology, 1);
        assert!(report.info.is_some());
        assert!(!report.requeued);
        assert_eq!(manager.running_tasks(), 0);
        Ok(())
    }

    #[test]
    fn serialization_failure_is_an_error() {
        let topology = topology(&[("exec1", "host1")]);
        let mut manager =
            TaskSetManager::new(Arc::new(failing_task_set(0, 0, 1)), &config(), &topology, 0);
        let mut next_task_id = 0;

        let result =
            manager.resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id);
        assert!(matches!(result, Err(CorralError::TaskSerialization(0, _))));
        assert_eq!(next_task_id, 0);
        assert_eq!(manager.running_tasks(), 0);
    }

    #[test]
    fn discarded_launches_release_running_tasks() -> Result<()> {
        let topology = topology(&[("exec1", "host1")]);
        let mut manager =
            TaskSetManager::new(Arc::new(no_pref_task_set(0, 0, 1)), &config(), &topology, 0);
        let mut next_task_id = 0;

        let task = manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        manager.abort("serialization failed");
        manager.discard_launches(&[task.task_id]);

        assert_eq!(manager.running_tasks(), 0);
        assert_eq!(manager.task_status(0), Some(&TaskStatus::Pending));
        Ok(())
    }

    #[test]
    fn recompute_adds_levels_for_new_executors() -> Result<()> {
        let mut topology = topology(&[("exec1", "host1")]);
        let task_set = task_set_with_preferences(
            0,
            0,
            vec![
                vec![TaskLocation::ProcessLocal("exec2".to_owned())],
                vec![TaskLocation::ProcessLocal("exec2".to_owned())],
            ],
        );
        let mut manager = TaskSetManager::new(Arc::new(task_set), &config(), &topology, 0);
        let mut next_task_id = 0;
        assert_eq!(manager.locality_levels(), &[TaskLocality::Any]);

        let task = manager
            .resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        assert_eq!(task.index, 0);

        topology.record_executor("exec2", "host2");
        manager.recompute_locality_levels(&topology);
        assert_eq!(
            manager.locality_levels(),
            &[TaskLocality::ProcessLocal, TaskLocality::Any]
        );

        let task = manager
            .resource_offer("exec2", "host2", None, TaskLocality::ProcessLocal, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        assert_eq!(task.index, 1);

        topology.remove_executor("exec2");
        manager.recompute_locality_levels(&topology);
        assert_eq!(manager.locality_levels(), &[TaskLocality::Any]);
        Ok(())
    }

    #[test]
    fn retried_task_skips_locality_delay() -> Result<()> {
        let topology = topology(&[("exec1", "host1"), ("exec2", "host2")]);
        let task_set = task_set_with_preferences(
            0,
            0,
            vec![
                vec![TaskLocation::ProcessLocal("exec1".to_owned())],
                vec![TaskLocation::ProcessLocal("exec1".to_owned())],
            ],
        );
        let mut manager = TaskSetManager::new(Arc::new(task_set), &config(), &topology, 0);
        let mut next_task_id = 0;

        let task = manager
            .resource_offer("exec1", "host1", None, TaskLocality::ProcessLocal, 0, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected a task".to_owned()))?;
        manager.handle_task_completion(task.task_id, &exception("boom"), &topology, 10);

        let retry = manager
            .resource_offer("exec2", "host2", None, TaskLocality::Any, 20, &mut next_task_id)?
            .ok_or_else(|| CorralError::Internal("expected the retry".to_owned()))?;
        assert_eq!(retry.index, task.index);

        // The untouched task still waits for its executor
        assert!(manager
            .resource_offer("exec2", "host2", None, TaskLocality::Any, 30, &mut next_task_id)?
            .is_none());
        Ok(())
    }
}
