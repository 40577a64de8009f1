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

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use corral_core::error::{CorralError, Result};
use corral_core::utils::{Clock, SystemClock};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

use crate::backend::SchedulerBackend;
use crate::callback::JobCallback;
use crate::config::SchedulerConfig;
use crate::policy::SchedulingOrder;
use crate::scheduler_server::event::{ExecutorLossReason, LossCause, SchedulerEvent};
use crate::state::executor_topology::ExecutorTopology;
use crate::state::locality::TaskLocality;
use crate::state::task::{
    TaskDescription, TaskFailureReason, TaskOutcome, TaskSet, TaskSetId, TaskState,
    WorkerOffer,
};
use crate::state::task_set_manager::{TaskSetManager, TaskSetSnapshot};

pub mod event;

/// stage id -> stage attempt id -> manager
type TaskSets = HashMap<usize, HashMap<usize, TaskSetManager>>;

#[derive(Debug, Clone)]
struct RunningTask {
    task_set_id: TaskSetId,
    executor_id: String,
}

/// Matches pending tasks of submitted task sets to executor resource offers.
///
/// All state lives behind one lock. Job callbacks and backend requests
/// produced while holding it are dispatched once it has been released.
pub struct ClusterTaskScheduler {
    config: Arc<SchedulerConfig>,
    state: Mutex<SchedulerState>,
    backend: OnceLock<Arc<dyn SchedulerBackend>>,
    callback: Arc<dyn JobCallback>,
    clock: Arc<dyn Clock>,
}

struct SchedulerState {
    topology: ExecutorTopology,
    task_sets: TaskSets,
    /// Running task id to the task set and executor owning it.
    task_index: HashMap<u64, RunningTask>,
    executor_tasks: HashMap<String, HashSet<u64>>,
    /// Executors lost for a reason not known yet. Their offers are ignored.
    pending_loss: HashSet<String>,
    next_task_id: u64,
    next_submission_seq: u64,
    order: Arc<dyn SchedulingOrder>,
    rng: Box<dyn RngCore + Send>,
}

impl ClusterTaskScheduler {
    pub fn new(config: Arc<SchedulerConfig>, callback: Arc<dyn JobCallback>) -> Self {
        Self::new_with_components(
            config,
            callback,
            Arc::new(SystemClock),
            Box::new(StdRng::from_os_rng()),
        )
    }

    /// Create a scheduler with the given time source and random source used
    /// to shuffle offers.
    pub fn new_with_components(
        config: Arc<SchedulerConfig>,
        callback: Arc<dyn JobCallback>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        let state = SchedulerState {
            topology: ExecutorTopology::new(config.rack_resolver.clone()),
            task_sets: HashMap::new(),
            task_index: HashMap::new(),
            executor_tasks: HashMap::new(),
            pending_loss: HashSet::new(),
            next_task_id: 0,
            next_submission_seq: 0,
            order: config.scheduling_policy.order(),
            rng,
        };
        Self {
            config,
            state: Mutex::new(state),
            backend: OnceLock::new(),
            callback,
            clock,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Attach the backend. Can only be done once.
    pub fn initialize(&self, backend: Arc<dyn SchedulerBackend>) -> Result<()> {
        self.backend.set(backend).map_err(|_| {
            CorralError::Internal("Scheduler backend is already initialized".to_owned())
        })
    }

    pub fn start(&self) -> Result<()> {
        info!(
            "Starting task scheduler with {} scheduling",
            self.state.lock().order.name()
        );
        self.backend()?.start()
    }

    pub fn stop(&self) -> Result<()> {
        info!("Stopping task scheduler");
        self.backend()?.stop()
    }

    pub fn default_parallelism(&self) -> Result<usize> {
        Ok(self.backend()?.default_parallelism())
    }

    fn backend(&self) -> Result<&Arc<dyn SchedulerBackend>> {
        self.backend.get().ok_or_else(|| {
            CorralError::Internal("Scheduler backend is not initialized".to_owned())
        })
    }

    /// Register a new attempt of a stage.
    ///
    /// Fails if another attempt of the same stage is still active, or if a
    /// task's index does not match its position in the task set.
    pub fn submit_tasks(&self, task_set: TaskSet) -> Result<()> {
        let id = task_set.id();
        if let Some((position, task)) = task_set
            .tasks
            .iter()
            .enumerate()
            .find(|(position, task)| task.index != *position)
        {
            return Err(CorralError::Internal(format!(
                "Task at position {position} of task set {id} has index {}",
                task.index
            )));
        }
        let mut events = vec![];
        {
            let mut state = self.state.lock();
            if let Some(attempts) = state.task_sets.get(&id.stage_id) {
                if let Some(active) = attempts.values().find(|m| !m.is_zombie()) {
                    return Err(CorralError::DuplicateTaskSetAttempt(
                        id.stage_id,
                        active.id().stage_attempt_id,
                        id.stage_attempt_id,
                    ));
                }
                if attempts.contains_key(&id.stage_attempt_id) {
                    return Err(CorralError::Internal(format!(
                        "Task set {id} has already been submitted"
                    )));
                }
            }

            info!("Adding task set {id} with {} tasks", task_set.tasks.len());
            let manager = TaskSetManager::new(
                Arc::new(task_set),
                &self.config,
                &state.topology,
                self.clock.now_millis(),
            )
            .with_submission_seq(state.next_submission_seq);
            state.next_submission_seq += 1;
            state
                .task_sets
                .entry(id.stage_id)
                .or_default()
                .insert(id.stage_attempt_id, manager);
            state.maybe_finish_task_set(id);
            events.push(SchedulerEvent::ReviveOffers);
        }
        self.dispatch(events);
        Ok(())
    }

    /// Assign pending tasks to the offered resources.
    ///
    /// Returns one list of launched tasks per offer, in offer order.
    pub fn resource_offers(&self, offers: &[WorkerOffer]) -> Vec<Vec<TaskDescription>> {
        let mut events = vec![];
        let tasks = {
            let mut state = self.state.lock();
            state.resource_offers(offers, &self.config, self.clock.now_millis(), &mut events)
        };
        self.dispatch(events);
        tasks
    }

    /// Handle a status report of a launched task.
    pub fn status_update(&self, task_id: u64, task_state: TaskState) {
        let mut events = vec![];
        {
            let mut state = self.state.lock();
            let now = self.clock.now_millis();
            match task_state {
                TaskState::Running => {
                    trace!("Task {task_id} is running");
                }
                TaskState::Finished(result) => {
                    state.handle_task_outcome(
                        task_id,
                        TaskOutcome::Success { result },
                        now,
                        &mut events,
                    );
                }
                TaskState::Failed(message) => {
                    state.handle_task_outcome(
                        task_id,
                        TaskOutcome::Failed(TaskFailureReason::Exception { message }),
                        now,
                        &mut events,
                    );
                }
                TaskState::Killed(reason) => {
                    state.handle_task_outcome(
                        task_id,
                        TaskOutcome::Failed(TaskFailureReason::Killed { reason }),
                        now,
                        &mut events,
                    );
                }
                TaskState::Lost(message) => {
                    match state.task_index.get(&task_id).map(|t| t.executor_id.clone()) {
                        Some(executor_id) => {
                            warn!("Task {task_id} was lost with executor {executor_id}: {message}");
                            state.remove_executor(
                                &executor_id,
                                LossCause::new(message, true),
                                now,
                                &mut events,
                            );
                        }
                        None => {
                            debug!("Ignoring loss of unknown task {task_id}");
                        }
                    }
                }
            }
        }
        self.dispatch(events);
    }

    /// Handle the loss of an executor.
    ///
    /// A [`ExecutorLossReason::Pending`] loss only withholds the executor's
    /// offers. A concrete loss fails its running tasks and forgets it.
    pub fn executor_lost(&self, executor_id: &str, reason: ExecutorLossReason) {
        let mut events = vec![];
        {
            let mut state = self.state.lock();
            match reason {
                ExecutorLossReason::Pending => {
                    if state.topology.is_executor_alive(executor_id) {
                        info!("Executor {executor_id} lost, waiting for the loss reason");
                        state.pending_loss.insert(executor_id.to_owned());
                    } else {
                        warn!("Ignoring loss of unknown executor {executor_id}");
                    }
                }
                ExecutorLossReason::Concrete(cause) => {
                    state.remove_executor(
                        executor_id,
                        cause,
                        self.clock.now_millis(),
                        &mut events,
                    );
                }
            }
        }
        self.dispatch(events);
    }

    /// Remove a task set which has no running tasks left.
    ///
    /// Zombie task sets without running tasks are removed automatically.
    pub fn task_set_finished(&self, id: TaskSetId) -> Result<()> {
        let mut state = self.state.lock();
        let running = lookup(&mut state.task_sets, id)
            .ok_or(CorralError::UnknownTaskSet(id.stage_id, id.stage_attempt_id))?
            .running_tasks();
        if running > 0 {
            return Err(CorralError::Internal(format!(
                "Task set {id} cannot be removed with {running} running tasks"
            )));
        }
        state.remove_task_set(id);
        Ok(())
    }

    /// Kill the running tasks of every attempt of a stage and abort them.
    pub fn cancel_tasks(&self, stage_id: usize, interrupt: bool) {
        let mut events = vec![];
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            let Some(attempts) = state.task_sets.get_mut(&stage_id) else {
                info!("No task sets to cancel for stage {stage_id}");
                return;
            };
            let mut ids = vec![];
            for manager in attempts.values_mut() {
                let mut task_ids = manager.running_task_ids();
                task_ids.sort_unstable();
                for task_id in task_ids {
                    if let Some(running) = state.task_index.get(&task_id) {
                        events.push(SchedulerEvent::KillTask {
                            task_id,
                            executor_id: running.executor_id.clone(),
                            interrupt,
                            reason: "Stage cancelled".to_owned(),
                        });
                    }
                }
                if !manager.is_zombie() {
                    let reason = format!("Stage {stage_id} cancelled");
                    manager.abort(reason.clone());
                    events.push(SchedulerEvent::TaskSetFailed {
                        task_set: manager.task_set().clone(),
                        reason,
                        exception: None,
                    });
                }
                ids.push(manager.id());
            }
            for id in ids {
                state.maybe_finish_task_set(id);
            }
        }
        self.dispatch(events);
    }

    /// Ask the backend to kill one running task.
    ///
    /// Returns false if the task is not running.
    pub fn kill_task_attempt(&self, task_id: u64, interrupt: bool, reason: &str) -> bool {
        let executor_id = {
            let state = self.state.lock();
            state.task_index.get(&task_id).map(|t| t.executor_id.clone())
        };
        match executor_id {
            Some(executor_id) => {
                info!("Killing task {task_id} on executor {executor_id}: {reason}");
                self.dispatch(vec![SchedulerEvent::KillTask {
                    task_id,
                    executor_id,
                    interrupt,
                    reason: reason.to_owned(),
                }]);
                true
            }
            None => {
                warn!("Cannot kill task {task_id} which is not running");
                false
            }
        }
    }

    /// Stop scheduling an attempt which was replaced by a newer one,
    /// without reporting it as failed.
    pub fn supersede_task_set(&self, id: TaskSetId) -> Result<()> {
        let mut state = self.state.lock();
        lookup(&mut state.task_sets, id)
            .ok_or(CorralError::UnknownTaskSet(id.stage_id, id.stage_attempt_id))?
            .mark_zombie();
        state.maybe_finish_task_set(id);
        Ok(())
    }

    /// Abort every active task set.
    pub fn abort_all(&self, message: &str) {
        let mut events = vec![];
        {
            let mut state = self.state.lock();
            let mut ids = vec![];
            for manager in state.task_sets.values_mut().flat_map(|a| a.values_mut()) {
                if !manager.is_zombie() {
                    manager.abort(message);
                    events.push(SchedulerEvent::TaskSetFailed {
                        task_set: manager.task_set().clone(),
                        reason: message.to_owned(),
                        exception: None,
                    });
                }
                ids.push(manager.id());
            }
            for id in ids {
                state.maybe_finish_task_set(id);
            }
        }
        self.dispatch(events);
    }

    pub fn executors_alive_on_host(&self, host: &str) -> Option<HashSet<String>> {
        self.state.lock().topology.executors_alive_on_host(host).cloned()
    }

    pub fn is_executor_alive(&self, executor_id: &str) -> bool {
        self.state.lock().topology.is_executor_alive(executor_id)
    }

    pub fn has_executors_alive_on_host(&self, host: &str) -> bool {
        self.state.lock().topology.has_executors_alive_on_host(host)
    }

    pub fn has_host_alive_on_rack(&self, rack: &str) -> bool {
        self.state.lock().topology.has_host_alive_on_rack(rack)
    }

    /// Ids of all registered task sets, zombies included.
    pub fn active_task_set_ids(&self) -> Vec<TaskSetId> {
        let state = self.state.lock();
        let mut ids: Vec<_> = state
            .task_sets
            .values()
            .flat_map(|a| a.values().map(|m| m.id()))
            .collect();
        ids.sort();
        ids
    }

    pub fn task_set_snapshot(&self, id: TaskSetId) -> Option<TaskSetSnapshot> {
        let mut state = self.state.lock();
        lookup(&mut state.task_sets, id).map(|m| m.snapshot())
    }

    pub fn running_tasks_on_executor(&self, executor_id: &str) -> Vec<u64> {
        let state = self.state.lock();
        let mut task_ids: Vec<_> = state
            .executor_tasks
            .get(executor_id)
            .map(|tasks| tasks.iter().copied().collect())
            .unwrap_or_default();
        task_ids.sort_unstable();
        task_ids
    }

    fn dispatch(&self, events: Vec<SchedulerEvent>) {
        let mut revive = false;
        for event in events {
            trace!("Dispatching {event:?}");
            match event {
                SchedulerEvent::TaskStarted { task_set, info } => {
                    if let Some(task) = task_set.tasks.get(info.index) {
                        self.callback.task_started(task_set.id(), task, &info);
                    }
                }
                SchedulerEvent::TaskEnded {
                    task_set,
                    outcome,
                    info,
                } => {
                    if let Some(task) = task_set.tasks.get(info.index) {
                        self.callback
                            .task_ended(task_set.id(), task, &outcome, &info);
                    }
                }
                SchedulerEvent::ExecutorAdded { executor_id, host } => {
                    self.callback.executor_added(&executor_id, &host);
                }
                SchedulerEvent::ExecutorLost { executor_id, cause } => {
                    self.callback.executor_lost(&executor_id, &cause);
                }
                SchedulerEvent::TaskSetFailed {
                    task_set,
                    reason,
                    exception,
                } => {
                    self.callback
                        .task_set_failed(&task_set, &reason, exception.as_deref());
                }
                SchedulerEvent::ReviveOffers => revive = true,
                SchedulerEvent::KillTask {
                    task_id,
                    executor_id,
                    interrupt,
                    reason,
                } => match self.backend.get() {
                    Some(backend) => {
                        backend.kill_task(task_id, &executor_id, interrupt, &reason)
                    }
                    None => warn!("No backend to kill task {task_id}"),
                },
            }
        }
        if revive {
            if let Some(backend) = self.backend.get() {
                backend.revive_offers();
            }
        }
    }
}

fn lookup(task_sets: &mut TaskSets, id: TaskSetId) -> Option<&mut TaskSetManager> {
    task_sets
        .get_mut(&id.stage_id)
        .and_then(|attempts| attempts.get_mut(&id.stage_attempt_id))
}

impl SchedulerState {
    fn resource_offers(
        &mut self,
        offers: &[WorkerOffer],
        config: &SchedulerConfig,
        now: u64,
        events: &mut Vec<SchedulerEvent>,
    ) -> Vec<Vec<TaskDescription>> {
        let mut topology_changed = false;
        for offer in offers {
            let registration = self
                .topology
                .record_executor(&offer.executor_id, &offer.host);
            if registration.new_executor {
                info!(
                    "Executor {} added on host {}, {} executors alive",
                    offer.executor_id,
                    offer.host,
                    self.topology.num_executors()
                );
                events.push(SchedulerEvent::ExecutorAdded {
                    executor_id: offer.executor_id.clone(),
                    host: offer.host.clone(),
                });
            }
            topology_changed |= registration.changed_topology();
        }
        if topology_changed {
            self.recompute_locality_levels();
        }

        let mut shuffled: Vec<usize> = (0..offers.len())
            .filter(|i| !self.pending_loss.contains(&offers[*i].executor_id))
            .collect();
        shuffled.shuffle(&mut *self.rng);

        let racks: Vec<Option<String>> = offers
            .iter()
            .map(|offer| self.topology.rack_for_host(&offer.host))
            .collect();
        let mut free_cores: Vec<usize> = offers.iter().map(|o| o.free_cores).collect();
        let mut tasks: Vec<Vec<TaskDescription>> = offers.iter().map(|_| vec![]).collect();
        let cpus_per_task = config.cpus_per_task.max(1);

        let ordered = self.ordered_task_set_ids();
        for max_locality in TaskLocality::ALL {
            for id in &ordered {
                let Some(manager) = lookup(&mut self.task_sets, *id) else {
                    continue;
                };
                if manager.is_zombie() || !manager.locality_levels().contains(&max_locality) {
                    continue;
                }

                loop {
                    let mut launched = false;
                    for &i in &shuffled {
                        if manager.is_zombie() {
                            break;
                        }
                        if free_cores[i] < cpus_per_task {
                            continue;
                        }
                        let offer = &offers[i];
                        match manager.resource_offer(
                            &offer.executor_id,
                            &offer.host,
                            racks[i].as_deref(),
                            max_locality,
                            now,
                            &mut self.next_task_id,
                        ) {
                            Ok(Some(task)) => {
                                free_cores[i] -= cpus_per_task;
                                self.task_index.insert(
                                    task.task_id,
                                    RunningTask {
                                        task_set_id: *id,
                                        executor_id: offer.executor_id.clone(),
                                    },
                                );
                                self.executor_tasks
                                    .entry(offer.executor_id.clone())
                                    .or_default()
                                    .insert(task.task_id);
                                if let Some(info) = manager.task_info(task.task_id) {
                                    events.push(SchedulerEvent::TaskStarted {
                                        task_set: manager.task_set().clone(),
                                        info: info.clone(),
                                    });
                                }
                                tasks[i].push(task);
                                launched = true;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                // Launches of this round never reach a backend
                                let mut discarded = vec![];
                                for (bucket, cores) in tasks.iter_mut().zip(free_cores.iter_mut()) {
                                    bucket.retain(|task| {
                                        if task.task_set_id == *id {
                                            discarded.push(task.task_id);
                                            *cores += cpus_per_task;
                                            false
                                        } else {
                                            true
                                        }
                                    });
                                }
                                manager.discard_launches(&discarded);
                                for task_id in &discarded {
                                    if let Some(running) = self.task_index.remove(task_id) {
                                        if let Some(task_ids) =
                                            self.executor_tasks.get_mut(&running.executor_id)
                                        {
                                            task_ids.remove(task_id);
                                        }
                                    }
                                }
                                events.retain(|event| match event {
                                    SchedulerEvent::TaskStarted { info, .. } => {
                                        !discarded.contains(&info.task_id)
                                    }
                                    _ => true,
                                });

                                let (reason, exception) = match &e {
                                    CorralError::TaskSerialization(index, cause) => (
                                        format!(
                                            "Failed to serialize task {index}, not attempting to retry it. Exception during serialization: {cause}"
                                        ),
                                        cause.clone(),
                                    ),
                                    other => (
                                        format!("Failed to launch task: {other}"),
                                        other.to_string(),
                                    ),
                                };
                                manager.abort(reason.clone());
                                events.push(SchedulerEvent::TaskSetFailed {
                                    task_set: manager.task_set().clone(),
                                    reason,
                                    exception: Some(exception),
                                });
                                break;
                            }
                        }
                    }
                    if !launched || manager.is_zombie() {
                        break;
                    }
                }
            }
        }

        self.executor_tasks.retain(|_, task_ids| !task_ids.is_empty());
        for id in ordered {
            self.maybe_finish_task_set(id);
        }

        let launched: usize = tasks.iter().map(Vec::len).sum();
        if launched > 0 {
            debug!("Launched {launched} tasks on {} offers", offers.len());
        }
        tasks
    }

    fn ordered_task_set_ids(&self) -> Vec<TaskSetId> {
        let mut managers: Vec<&TaskSetManager> = self
            .task_sets
            .values()
            .flat_map(|attempts| attempts.values())
            .filter(|manager| !manager.is_zombie())
            .collect();
        managers.sort_by(|a, b| self.order.compare(a, b));
        managers.into_iter().map(|manager| manager.id()).collect()
    }

    fn recompute_locality_levels(&mut self) {
        for manager in self
            .task_sets
            .values_mut()
            .flat_map(|attempts| attempts.values_mut())
        {
            if !manager.is_zombie() {
                manager.recompute_locality_levels(&self.topology);
            }
        }
    }

    fn handle_task_outcome(
        &mut self,
        task_id: u64,
        outcome: TaskOutcome,
        now: u64,
        events: &mut Vec<SchedulerEvent>,
    ) {
        let Some(running) = self.task_index.remove(&task_id) else {
            debug!("Ignoring status update for task {task_id} which is not running");
            return;
        };
        if let Some(task_ids) = self.executor_tasks.get_mut(&running.executor_id) {
            task_ids.remove(&task_id);
            if task_ids.is_empty() {
                self.executor_tasks.remove(&running.executor_id);
            }
        }

        let Some(manager) = lookup(&mut self.task_sets, running.task_set_id) else {
            warn!(
                "Task {task_id} finished but its task set {} is gone",
                running.task_set_id
            );
            return;
        };
        let report = manager.handle_task_completion(task_id, &outcome, &self.topology, now);
        let task_set = manager.task_set().clone();

        if let Some(info) = report.info {
            events.push(SchedulerEvent::TaskEnded {
                task_set: task_set.clone(),
                outcome,
                info,
            });
        }
        if let Some(reason) = report.abort {
            events.push(SchedulerEvent::TaskSetFailed {
                task_set,
                reason,
                exception: None,
            });
        }
        if report.requeued {
            events.push(SchedulerEvent::ReviveOffers);
        }
        self.maybe_finish_task_set(running.task_set_id);
    }

    fn remove_executor(
        &mut self,
        executor_id: &str,
        cause: LossCause,
        now: u64,
        events: &mut Vec<SchedulerEvent>,
    ) {
        self.pending_loss.remove(executor_id);

        let mut task_ids: Vec<u64> = self
            .executor_tasks
            .remove(executor_id)
            .map(|tasks| tasks.into_iter().collect())
            .unwrap_or_default();
        task_ids.sort_unstable();
        for task_id in task_ids {
            self.handle_task_outcome(
                task_id,
                TaskOutcome::Failed(TaskFailureReason::ExecutorLost {
                    executor_id: executor_id.to_owned(),
                    message: cause.message.clone(),
                    caused_by_app: cause.caused_by_app,
                }),
                now,
                events,
            );
        }

        if self.topology.remove_executor(executor_id).is_some() {
            warn!("Lost executor {executor_id}: {cause}");
            events.push(SchedulerEvent::ExecutorLost {
                executor_id: executor_id.to_owned(),
                cause,
            });
            self.recompute_locality_levels();
        } else {
            debug!("Lost executor {executor_id} was not registered");
        }
        events.push(SchedulerEvent::ReviveOffers);
    }

    fn maybe_finish_task_set(&mut self, id: TaskSetId) {
        let finished = lookup(&mut self.task_sets, id)
            .map(|manager| manager.is_zombie() && manager.running_tasks() == 0)
            .unwrap_or(false);
        if finished {
            self.remove_task_set(id);
        }
    }

    fn remove_task_set(&mut self, id: TaskSetId) {
        let Some(attempts) = self.task_sets.get_mut(&id.stage_id) else {
            return;
        };
        if attempts.remove(&id.stage_attempt_id).is_none() {
            return;
        }
        if attempts.is_empty() {
            self.task_sets.remove(&id.stage_id);
        }

        let executor_tasks = &mut self.executor_tasks;
        self.task_index.retain(|task_id, running| {
            if running.task_set_id != id {
                return true;
            }
            if let Some(task_ids) = executor_tasks.get_mut(&running.executor_id) {
                task_ids.remove(task_id);
            }
            false
        });
        executor_tasks.retain(|_, task_ids| !task_ids.is_empty());
        info!("Removed task set {id}, whose tasks have all completed");
    }
}
