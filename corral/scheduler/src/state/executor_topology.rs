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
use std::fmt::Debug;
use std::sync::Arc;

use log::{debug, info};

/// Maps hosts onto racks.
pub trait RackResolver: Send + Sync + Debug {
    /// Returns the rack of `host`, if known.
    fn rack_for_host(&self, host: &str) -> Option<String>;
}

/// Resolver for clusters without rack information.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRackResolver;

impl RackResolver for NoRackResolver {
    fn rack_for_host(&self, _host: &str) -> Option<String> {
        None
    }
}

/// Resolver backed by a fixed host to rack table.
#[derive(Debug, Default, Clone)]
pub struct StaticRackResolver {
    racks: HashMap<String, String>,
}

impl StaticRackResolver {
    pub fn new<I, H, R>(entries: I) -> Self
    where
        I: IntoIterator<Item = (H, R)>,
        H: Into<String>,
        R: Into<String>,
    {
        Self {
            racks: entries
                .into_iter()
                .map(|(host, rack)| (host.into(), rack.into()))
                .collect(),
        }
    }
}

impl RackResolver for StaticRackResolver {
    fn rack_for_host(&self, host: &str) -> Option<String> {
        self.racks.get(host).cloned()
    }
}

/// Outcome of [`ExecutorTopology::record_executor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorRegistration {
    /// The executor id was not known before.
    pub new_executor: bool,
    /// No live executor was known on the host before.
    pub new_host: bool,
    /// The executor was known on another host.
    pub moved: bool,
}

impl ExecutorRegistration {
    /// The set of live executors, hosts or racks changed.
    pub fn changed_topology(&self) -> bool {
        self.new_executor || self.new_host || self.moved
    }
}

/// Live executors and where they run.
///
/// Every executor is mapped onto exactly one host. A host is present only
/// while at least one executor runs on it, and a rack only while at least
/// one of its hosts is present.
#[derive(Debug)]
pub struct ExecutorTopology {
    executor_to_host: HashMap<String, String>,
    host_to_executors: HashMap<String, HashSet<String>>,
    host_to_rack: HashMap<String, String>,
    rack_to_hosts: HashMap<String, HashSet<String>>,
    rack_resolver: Arc<dyn RackResolver>,
}

impl Default for ExecutorTopology {
    fn default() -> Self {
        Self::new(Arc::new(NoRackResolver))
    }
}

impl ExecutorTopology {
    pub fn new(rack_resolver: Arc<dyn RackResolver>) -> Self {
        Self {
            executor_to_host: HashMap::new(),
            host_to_executors: HashMap::new(),
            host_to_rack: HashMap::new(),
            rack_to_hosts: HashMap::new(),
            rack_resolver,
        }
    }

    /// Record that `executor_id` runs on `host`.
    ///
    /// An executor which re-registers from a different host is moved.
    pub fn record_executor(
        &mut self,
        executor_id: &str,
        host: &str,
    ) -> ExecutorRegistration {
        let moved = match self.executor_to_host.get(executor_id) {
            Some(known_host) if known_host == host => return Default::default(),
            Some(_) => {
                info!("Executor {executor_id} moved to host {host}");
                self.remove_executor(executor_id);
                true
            }
            None => false,
        };
        let new_executor = !moved;

        let new_host = !self.host_to_executors.contains_key(host);
        if new_host {
            if let Some(rack) = self.rack_resolver.rack_for_host(host) {
                debug!("Host {host} resolved to rack {rack}");
                self.rack_to_hosts
                    .entry(rack.clone())
                    .or_default()
                    .insert(host.to_owned());
                self.host_to_rack.insert(host.to_owned(), rack);
            }
        }

        self.executor_to_host
            .insert(executor_id.to_owned(), host.to_owned());
        self.host_to_executors
            .entry(host.to_owned())
            .or_default()
            .insert(executor_id.to_owned());

        ExecutorRegistration {
            new_executor,
            new_host,
            moved,
        }
    }

    /// Forget `executor_id`, returning the host it ran on.
    pub fn remove_executor(&mut self, executor_id: &str) -> Option<String> {
        let host = self.executor_to_host.remove(executor_id)?;

        let host_empty = match self.host_to_executors.get_mut(&host) {
            Some(executors) => {
                executors.remove(executor_id);
                executors.is_empty()
            }
            None => false,
        };

        if host_empty {
            self.host_to_executors.remove(&host);
            if let Some(rack) = self.host_to_rack.remove(&host) {
                let rack_empty = match self.rack_to_hosts.get_mut(&rack) {
                    Some(hosts) => {
                        hosts.remove(&host);
                        hosts.is_empty()
                    }
                    None => false,
                };
                if rack_empty {
                    self.rack_to_hosts.remove(&rack);
                }
            }
        }

        Some(host)
    }

    pub fn is_executor_alive(&self, executor_id: &str) -> bool {
        self.executor_to_host.contains_key(executor_id)
    }

    pub fn has_executors_alive_on_host(&self, host: &str) -> bool {
        self.host_to_executors.contains_key(host)
    }

    pub fn has_host_alive_on_rack(&self, rack: &str) -> bool {
        self.rack_to_hosts.contains_key(rack)
    }

    pub fn executors_alive_on_host(&self, host: &str) -> Option<&HashSet<String>> {
        self.host_to_executors.get(host)
    }

    /// Rack of `host`. Hosts without live executors are resolved on demand.
    pub fn rack_for_host(&self, host: &str) -> Option<String> {
        self.host_to_rack
            .get(host)
            .cloned()
            .or_else(|| self.rack_resolver.rack_for_host(host))
    }

    pub fn num_executors(&self) -> usize {
        self.executor_to_host.len()
    }
}
