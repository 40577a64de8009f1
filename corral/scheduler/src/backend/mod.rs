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

//! Capability consumed by the scheduler to reach executors.

use corral_core::error::Result;

pub mod local;

/// Delivers offers to the scheduler and ships launched tasks to executors.
///
/// Methods are called without holding the scheduler lock and must not
/// block on task execution.
pub trait SchedulerBackend: Send + Sync {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Hint that capacity should be offered again soon.
    fn revive_offers(&self);

    fn default_parallelism(&self) -> usize;

    /// Ask the executor running `task_id` to kill it.
    fn kill_task(&self, task_id: u64, executor_id: &str, interrupt: bool, reason: &str);
}
