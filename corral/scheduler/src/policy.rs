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

//! Ordering of task sets within a scheduling round.

use std::cmp::Ordering;

use crate::state::task_set_manager::TaskSetManager;

/// Decides which task set is offered resources first.
pub trait SchedulingOrder: std::fmt::Debug + Send + Sync {
    /// `Ordering::Less` if `a` should be offered resources before `b`.
    fn compare(&self, a: &TaskSetManager, b: &TaskSetManager) -> Ordering;

    /// Name of [SchedulingOrder]
    fn name(&self) -> &str;
}

/// Lower priority first, then earlier submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoOrder;

impl SchedulingOrder for FifoOrder {
    fn compare(&self, a: &TaskSetManager, b: &TaskSetManager) -> Ordering {
        let (a_set, b_set) = (a.task_set(), b.task_set());
        a_set
            .priority
            .cmp(&b_set.priority)
            .then_with(|| a.submission_seq().cmp(&b.submission_seq()))
            .then_with(|| a.id().cmp(&b.id()))
    }

    fn name(&self) -> &str {
        "fifo"
    }
}

/// Fewer running tasks first, ties broken in FIFO order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FairOrder;

impl SchedulingOrder for FairOrder {
    fn compare(&self, a: &TaskSetManager, b: &TaskSetManager) -> Ordering {
        a.running_tasks()
            .cmp(&b.running_tasks())
            .then_with(|| FifoOrder.compare(a, b))
    }

    fn name(&self) -> &str {
        "fair"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::state::executor_topology::ExecutorTopology;
    use crate::state::locality::TaskLocality;
    use crate::test_utils::no_pref_task_set;
    use corral_core::error::Result;
    use std::sync::Arc;

    fn manager(stage_id: usize, priority: usize, submission_seq: u64) -> TaskSetManager {
        let mut task_set = no_pref_task_set(stage_id, 0, 2);
        task_set.priority = priority;
        TaskSetManager::new(
            Arc::new(task_set),
            &SchedulerConfig::default(),
            &ExecutorTopology::default(),
            0,
        )
        .with_submission_seq(submission_seq)
    }

    #[test]
    fn fifo_orders_by_priority_then_submission() {
        let mut managers = [
            manager(2, 1, 0),
            manager(3, 1, 1),
            manager(5, 0, 2),
            manager(1, 1, 3),
        ];
        managers.sort_by(|a, b| FifoOrder.compare(a, b));
        let stages: Vec<_> = managers.iter().map(|m| m.id().stage_id).collect();
        assert_eq!(stages, vec![5, 2, 3, 1]);
    }

    #[test]
    fn fair_prefers_less_busy_task_sets() -> Result<()> {
        let mut busy = manager(0, 0, 0);
        let idle = manager(1, 1, 1);
        let mut next_task_id = 0;
        busy.resource_offer("exec1", "host1", None, TaskLocality::Any, 0, &mut next_task_id)?;

        assert_eq!(FairOrder.compare(&busy, &idle), Ordering::Greater);
        assert_eq!(FifoOrder.compare(&busy, &idle), Ordering::Less);
        Ok(())
    }
}
