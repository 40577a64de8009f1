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

//! In-process backend running tasks on a single local executor.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use corral_core::error::{CorralError, Result};
use corral_core::event_loop::{EventAction, EventLoop, EventSender};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::backend::SchedulerBackend;
use crate::scheduler_server::ClusterTaskScheduler;
use crate::state::task::{TaskDescription, TaskState, WorkerOffer};

/// Executes launched tasks.
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, task: TaskDescription) -> TaskState;
}

/// Runner which sleeps instead of doing work and fails the first attempt of
/// every `fail_every`-th task.
#[derive(Debug, Clone)]
pub struct SimulatedTaskRunner {
    pub duration: Duration,
    pub fail_every: usize,
}

#[async_trait]
impl TaskRunner for SimulatedTaskRunner {
    async fn run(&self, task: TaskDescription) -> TaskState {
        tokio::time::sleep(self.duration).await;
        if self.fail_every > 0 && task.index % self.fail_every == 0 && task.attempt_number == 0 {
            TaskState::Failed(format!("Injected failure of {}", task.name))
        } else {
            TaskState::Finished(task.payload)
        }
    }
}

#[derive(Clone)]
pub enum LocalEndpointEvent {
    ReviveOffers,
    StatusUpdate { task_id: u64, state: TaskState },
    KillTask {
        task_id: u64,
        interrupt: bool,
        reason: String,
    },
}

impl Debug for LocalEndpointEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalEndpointEvent::ReviveOffers => write!(f, "ReviveOffers."),
            LocalEndpointEvent::StatusUpdate { task_id, state } => {
                write!(f, "StatusUpdate : task_id={task_id}, state={state:?}.")
            }
            LocalEndpointEvent::KillTask {
                task_id,
                interrupt,
                reason,
            } => write!(
                f,
                "KillTask : task_id={task_id}, interrupt={interrupt}, reason={reason}."
            ),
        }
    }
}

struct LocalEndpoint {
    scheduler: Weak<ClusterTaskScheduler>,
    executor_id: String,
    host: String,
    cpus_per_task: usize,
    free_cores: AtomicUsize,
    /// Set while a `ReviveOffers` event is queued.
    revive_pending: Arc<AtomicBool>,
    runner: Arc<dyn TaskRunner>,
    running: DashMap<u64, AbortHandle>,
    /// Tasks to report as killed once they return.
    kill_requested: DashMap<u64, String>,
}

impl LocalEndpoint {
    fn revive_offers(&self, sender: &EventSender<LocalEndpointEvent>) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            debug!("Scheduler is gone, not offering resources");
            return;
        };
        let offers = [WorkerOffer::new(
            &self.executor_id,
            &self.host,
            self.free_cores.load(Ordering::SeqCst),
        )];
        for task in scheduler.resource_offers(&offers).into_iter().flatten() {
            self.free_cores.fetch_sub(self.cpus_per_task, Ordering::SeqCst);
            self.launch(task, sender);
        }
    }

    fn launch(&self, task: TaskDescription, sender: &EventSender<LocalEndpointEvent>) {
        let task_id = task.task_id;
        let runner = self.runner.clone();
        let sender = sender.clone();
        let handle = tokio::spawn(async move {
            let state = runner.run(task).await;
            if let Err(e) = sender
                .post_event(LocalEndpointEvent::StatusUpdate { task_id, state })
                .await
            {
                warn!("Fail to report status of task {task_id} due to {e}");
            }
        });
        self.running.insert(task_id, handle.abort_handle());
    }

    fn status_update(
        &self,
        task_id: u64,
        state: TaskState,
        sender: &EventSender<LocalEndpointEvent>,
    ) {
        let finished = state.is_finished();
        let state = match self.kill_requested.remove(&task_id) {
            Some((_, reason)) if finished => TaskState::Killed(reason),
            Some((task_id, reason)) => {
                self.kill_requested.insert(task_id, reason);
                state
            }
            None => state,
        };

        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.status_update(task_id, state);
        }
        if finished && self.running.remove(&task_id).is_some() {
            self.free_cores.fetch_add(self.cpus_per_task, Ordering::SeqCst);
            self.revive_offers(sender);
        }
    }
}

#[async_trait]
impl EventAction<LocalEndpointEvent> for LocalEndpoint {
    fn on_start(&self) {
        info!(
            "Local executor {} started with {} cores",
            self.executor_id,
            self.free_cores.load(Ordering::SeqCst)
        );
    }

    fn on_stop(&self) {
        for entry in self.running.iter() {
            entry.value().abort();
        }
        self.running.clear();
        info!("Local executor {} stopped", self.executor_id);
    }

    async fn on_receive(
        &self,
        event: LocalEndpointEvent,
        sender: &EventSender<LocalEndpointEvent>,
    ) -> Result<()> {
        debug!("Local executor {} received {event:?}", self.executor_id);
        match event {
            LocalEndpointEvent::ReviveOffers => {
                self.revive_pending.store(false, Ordering::SeqCst);
                self.revive_offers(sender)
            }
            LocalEndpointEvent::StatusUpdate { task_id, state } => {
                self.status_update(task_id, state, sender)
            }
            LocalEndpointEvent::KillTask {
                task_id,
                interrupt,
                reason,
            } => {
                let Some(handle) = self.running.get(&task_id).map(|h| h.value().clone())
                else {
                    debug!("Task {task_id} to kill is not running");
                    return Ok(());
                };
                if interrupt {
                    handle.abort();
                    self.status_update(task_id, TaskState::Killed(reason), sender);
                } else {
                    self.kill_requested.insert(task_id, reason);
                }
            }
        }
        Ok(())
    }

    fn on_error(&self, error: CorralError) {
        error!("Local executor {} failed: {error}", self.executor_id);
    }
}

/// [SchedulerBackend] offering the cores of one in-process executor.
pub struct LocalBackend {
    executor_id: String,
    total_cores: usize,
    sender: EventSender<LocalEndpointEvent>,
    revive_pending: Arc<AtomicBool>,
    event_loop: Mutex<EventLoop<LocalEndpointEvent>>,
}

impl LocalBackend {
    pub fn new(
        scheduler: &Arc<ClusterTaskScheduler>,
        executor_id: impl Into<String>,
        host: impl Into<String>,
        total_cores: usize,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        let executor_id = executor_id.into();
        let config = scheduler.config();
        let revive_pending = Arc::new(AtomicBool::new(false));
        let endpoint = Arc::new(LocalEndpoint {
            scheduler: Arc::downgrade(scheduler),
            executor_id: executor_id.clone(),
            host: host.into(),
            cpus_per_task: config.cpus_per_task.max(1),
            free_cores: AtomicUsize::new(total_cores),
            revive_pending: revive_pending.clone(),
            runner,
            running: DashMap::new(),
            kill_requested: DashMap::new(),
        });
        let event_loop = EventLoop::new(
            format!("local_executor_{executor_id}"),
            config.event_loop_buffer_size as usize,
            endpoint,
        );
        Self {
            executor_id,
            total_cores,
            sender: event_loop.sender(),
            revive_pending,
            event_loop: Mutex::new(event_loop),
        }
    }

    /// Queue `event`, waiting for room in the queue on a spawned task.
    /// `on_failure` runs if the event could not be queued.
    fn post(&self, event: LocalEndpointEvent, on_failure: impl FnOnce() + Send + 'static) {
        let sender = self.sender.clone();
        let executor_id = self.executor_id.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sender.post_event(event).await {
                        warn!("Local executor {executor_id} dropped an event: {e}");
                        on_failure();
                    }
                });
            }
            Err(_) => {
                if let Err(e) = sender.try_post_event(event) {
                    warn!("Local executor {executor_id} dropped an event: {e}");
                    on_failure();
                }
            }
        }
    }
}

impl SchedulerBackend for LocalBackend {
    fn start(&self) -> Result<()> {
        self.event_loop.lock().start()?;
        self.revive_offers();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.event_loop.lock().stop();
        Ok(())
    }

    fn revive_offers(&self) {
        if self.revive_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let revive_pending = self.revive_pending.clone();
        self.post(LocalEndpointEvent::ReviveOffers, move || {
            revive_pending.store(false, Ordering::SeqCst)
        });
    }

    fn default_parallelism(&self) -> usize {
        self.total_cores
    }

    fn kill_task(&self, task_id: u64, executor_id: &str, interrupt: bool, reason: &str) {
        if executor_id != self.executor_id {
            warn!("Cannot kill task {task_id} on unknown executor {executor_id}");
            return;
        }
        self.post(
            LocalEndpointEvent::KillTask {
                task_id,
                interrupt,
                reason: reason.to_owned(),
            },
            || {},
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::state::task::TaskSetId;
    use crate::test_utils::{await_condition, no_pref_task_set, RecordingCallback, TEST_SEED};
    use corral_core::utils::SystemClock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct LocalCluster {
        scheduler: Arc<ClusterTaskScheduler>,
        callback: Arc<RecordingCallback>,
    }

    fn local_cluster(
        config: SchedulerConfig,
        cores: usize,
        runner: SimulatedTaskRunner,
    ) -> Result<LocalCluster> {
        let callback = Arc::new(RecordingCallback::default());
        let scheduler = Arc::new(ClusterTaskScheduler::new_with_components(
            Arc::new(config),
            callback.clone(),
            Arc::new(SystemClock),
            Box::new(StdRng::seed_from_u64(TEST_SEED)),
        ));
        let backend = Arc::new(LocalBackend::new(
            &scheduler,
            "local",
            "localhost",
            cores,
            Arc::new(runner),
        ));
        scheduler.initialize(backend)?;
        scheduler.start()?;
        Ok(LocalCluster {
            scheduler,
            callback,
        })
    }

    async fn finished(cluster: &LocalCluster) -> Result<bool> {
        await_condition(Duration::from_millis(10), 500, || async {
            Ok(cluster.scheduler.active_task_set_ids().is_empty())
        })
        .await
    }

    #[tokio::test]
    async fn runs_every_task() -> Result<()> {
        let runner = SimulatedTaskRunner {
            duration: Duration::from_millis(5),
            fail_every: 0,
        };
        let cluster = local_cluster(SchedulerConfig::default(), 2, runner)?;
        assert_eq!(cluster.scheduler.default_parallelism()?, 2);

        cluster.scheduler.submit_tasks(no_pref_task_set(0, 0, 6))?;
        assert!(finished(&cluster).await?);

        let ended = cluster.callback.ended_tasks();
        assert_eq!(ended.len(), 6);
        assert!(ended.iter().all(|(_, success)| *success));
        assert!(cluster.callback.failed_task_sets().is_empty());
        cluster.scheduler.stop()?;
        Ok(())
    }

    #[tokio::test]
    async fn failed_tasks_are_retried() -> Result<()> {
        let runner = SimulatedTaskRunner {
            duration: Duration::from_millis(1),
            fail_every: 2,
        };
        let cluster = local_cluster(SchedulerConfig::default(), 3, runner)?;

        cluster.scheduler.submit_tasks(no_pref_task_set(0, 0, 4))?;
        assert!(finished(&cluster).await?);

        let ended = cluster.callback.ended_tasks();
        assert_eq!(ended.iter().filter(|(_, success)| *success).count(), 4);
        assert_eq!(ended.iter().filter(|(_, success)| !*success).count(), 2);
        assert!(cluster.callback.failed_task_sets().is_empty());
        cluster.scheduler.stop()?;
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_stage_interrupts_running_tasks() -> Result<()> {
        let runner = SimulatedTaskRunner {
            duration: Duration::from_secs(60),
            fail_every: 0,
        };
        let cluster = local_cluster(
            SchedulerConfig::default().with_cpus_per_task(2),
            4,
            runner,
        )?;

        cluster.scheduler.submit_tasks(no_pref_task_set(3, 0, 5))?;
        let launched = await_condition(Duration::from_millis(10), 500, || async {
            Ok(cluster.scheduler.running_tasks_on_executor("local").len() == 2)
        })
        .await?;
        assert!(launched);

        cluster.scheduler.cancel_tasks(3, true);
        assert!(finished(&cluster).await?);

        let failures = cluster.callback.failed_task_sets();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, TaskSetId::new(3, 0));
        assert_eq!(cluster.callback.ended_tasks().len(), 2);
        cluster.scheduler.stop()?;
        Ok(())
    }

    #[tokio::test]
    async fn kills_survive_a_full_queue() -> Result<()> {
        let runner = SimulatedTaskRunner {
            duration: Duration::from_secs(60),
            fail_every: 0,
        };
        let cluster = local_cluster(
            SchedulerConfig::default().with_event_loop_buffer_size(1),
            3,
            runner,
        )?;
        cluster.scheduler.submit_tasks(no_pref_task_set(0, 0, 3))?;
        let launched = await_condition(Duration::from_millis(10), 500, || async {
            Ok(cluster.scheduler.running_tasks_on_executor("local").len() == 3)
        })
        .await?;
        assert!(launched);

        let running = cluster.scheduler.running_tasks_on_executor("local");
        cluster.scheduler.abort_all("shutting down");
        for task_id in running {
            assert!(cluster.scheduler.kill_task_attempt(task_id, true, "shutting down"));
        }
        assert!(finished(&cluster).await?);
        let ended = cluster.callback.ended_tasks();
        assert_eq!(ended.len(), 3);
        assert!(ended.iter().all(|(_, success)| !*success));
        cluster.scheduler.stop()?;
        Ok(())
    }

    #[tokio::test]
    async fn gentle_kill_waits_for_the_task() -> Result<()> {
        let runner = SimulatedTaskRunner {
            duration: Duration::from_millis(300),
            fail_every: 0,
        };
        let cluster = local_cluster(SchedulerConfig::default(), 1, runner)?;
        cluster.scheduler.submit_tasks(no_pref_task_set(0, 0, 1))?;
        let launched = await_condition(Duration::from_millis(10), 500, || async {
            Ok(cluster.scheduler.running_tasks_on_executor("local").len() == 1)
        })
        .await?;
        assert!(launched);

        let first = cluster.scheduler.running_tasks_on_executor("local")[0];
        assert!(cluster.scheduler.kill_task_attempt(first, false, "no longer needed"));
        assert!(finished(&cluster).await?);

        // Killed attempts do not count as failures, the task is retried
        let ended = cluster.callback.ended_tasks();
        assert_eq!(ended.len(), 2);
        assert_eq!(ended[0], (first, false));
        assert!(ended[1].1);
        cluster.scheduler.stop()?;
        Ok(())
    }
}
