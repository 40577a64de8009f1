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

use std::fmt::{Display, Formatter};

/// Locality tier a task was (or can be) launched at, tightest first.
///
/// The derived ordering is used everywhere a tier is compared: a tier is
/// "within" `max` when `tier <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskLocality {
    /// Same executor process as the data.
    ProcessLocal,
    /// Same host as the data.
    NodeLocal,
    /// Same rack as the data.
    RackLocal,
    /// Task has no placement preference.
    NoPreference,
    /// Anywhere.
    Any,
}

impl TaskLocality {
    /// All tiers from tightest to loosest.
    pub const ALL: [TaskLocality; 5] = [
        TaskLocality::ProcessLocal,
        TaskLocality::NodeLocal,
        TaskLocality::RackLocal,
        TaskLocality::NoPreference,
        TaskLocality::Any,
    ];

    /// Returns true if a task placed at `self` satisfies a constraint of `max`.
    pub fn is_allowed(self, max: TaskLocality) -> bool {
        self <= max
    }
}

impl Display for TaskLocality {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskLocality::ProcessLocal => f.write_str("PROCESS_LOCAL"),
            TaskLocality::NodeLocal => f.write_str("NODE_LOCAL"),
            TaskLocality::RackLocal => f.write_str("RACK_LOCAL"),
            TaskLocality::NoPreference => f.write_str("NO_PREF"),
            TaskLocality::Any => f.write_str("ANY"),
        }
    }
}

/// A preferred location of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskLocation {
    /// Prefer this exact executor.
    ProcessLocal(String),
    /// Prefer any executor on this host.
    NodeLocal(String),
    /// Prefer any host on this rack.
    RackLocal(String),
    /// Explicitly no preference.
    NoPreference,
    /// Run anywhere.
    Any,
}

impl TaskLocation {
    /// Returns true for locations which constrain placement.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            TaskLocation::ProcessLocal(_)
                | TaskLocation::NodeLocal(_)
                | TaskLocation::RackLocal(_)
        )
    }
}

impl Display for TaskLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskLocation::ProcessLocal(executor_id) => {
                write!(f, "executor_{executor_id}")
            }
            TaskLocation::NodeLocal(host) => write!(f, "host_{host}"),
            TaskLocation::RackLocal(rack) => write!(f, "rack_{rack}"),
            TaskLocation::NoPreference => f.write_str("no_pref"),
            TaskLocation::Any => f.write_str("any"),
        }
    }
}
