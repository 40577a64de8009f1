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

//! Single consumer event loops for in-process endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::{CorralError, Result};

/// Reacts to the events of an [`EventLoop`], one event at a time.
#[async_trait]
pub trait EventAction<E>: Send + Sync {
    /// Called once, before the first event is handled.
    fn on_start(&self) {}

    /// Called once, after the last event was handled.
    fn on_stop(&self) {}

    /// Handle one event. `sender` posts follow-up events to the same loop
    /// and must not be awaited on from here, as the loop is busy.
    async fn on_receive(&self, event: E, sender: &EventSender<E>) -> Result<()>;

    /// Called when [`EventAction::on_receive`] failed. The loop keeps running.
    fn on_error(&self, error: CorralError);
}

enum LoopState<E> {
    Idle(mpsc::Receiver<E>),
    Running,
    Stopped,
}

/// Runs an [`EventAction`] on a spawned task, fed by a bounded queue.
///
/// The queue exists from construction, so events posted before
/// [`EventLoop::start`] are handled once the loop runs.
pub struct EventLoop<E> {
    name: String,
    action: Arc<dyn EventAction<E>>,
    sender: EventSender<E>,
    state: LoopState<E>,
    shutdown: Arc<Notify>,
}

impl<E: Send + 'static> EventLoop<E> {
    /// Create a stopped loop whose queue holds up to `buffer_size` events.
    pub fn new(
        name: impl Into<String>,
        buffer_size: usize,
        action: Arc<dyn EventAction<E>>,
    ) -> Self {
        let (tx_event, rx_event) = mpsc::channel(buffer_size.max(1));
        Self {
            name: name.into(),
            action,
            sender: EventSender { tx_event },
            state: LoopState::Idle(rx_event),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Name used in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle for posting events to this loop.
    pub fn sender(&self) -> EventSender<E> {
        self.sender.clone()
    }

    /// Spawn the loop. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let mut rx_event = match std::mem::replace(&mut self.state, LoopState::Running) {
            LoopState::Idle(rx_event) => rx_event,
            LoopState::Running => {
                return Err(CorralError::General(format!(
                    "Event loop {} is already running",
                    self.name
                )))
            }
            LoopState::Stopped => {
                self.state = LoopState::Stopped;
                return Err(CorralError::General(format!(
                    "Event loop {} has been stopped",
                    self.name
                )));
            }
        };

        let name = self.name.clone();
        let action = self.action.clone();
        let sender = self.sender.clone();
        let shutdown = self.shutdown.clone();
        action.on_start();
        tokio::spawn(async move {
            info!("Event loop {name} started");
            loop {
                let event = tokio::select! {
                    _ = shutdown.notified() => break,
                    event = rx_event.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                if let Err(e) = action.on_receive(event, &sender).await {
                    warn!("Event loop {name} failed to handle an event: {e}");
                    action.on_error(e);
                }
            }
            action.on_stop();
            info!("Event loop {name} stopped, {} events dropped", rx_event.len());
        });
        Ok(())
    }

    /// Stop handling events. Queued events are dropped. Stopping twice is a
    /// no-op and a stopped loop cannot be started again.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, LoopState::Stopped) {
            LoopState::Running => self.shutdown.notify_one(),
            LoopState::Idle(_) => debug!("Event loop {} stopped before it started", self.name),
            LoopState::Stopped => {}
        }
    }
}

/// Posts events to an [`EventLoop`].
pub struct EventSender<E> {
    tx_event: mpsc::Sender<E>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx_event: self.tx_event.clone(),
        }
    }
}

impl<E> EventSender<E> {
    /// Post an event, waiting for room in the queue.
    pub async fn post_event(&self, event: E) -> Result<()> {
        self.tx_event
            .send(event)
            .await
            .map_err(|_| CorralError::General("Event loop is gone".to_owned()))
    }

    /// Post an event if the queue has room.
    pub fn try_post_event(&self, event: E) -> Result<()> {
        self.tx_event.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => CorralError::General("Event queue is full".to_owned()),
            TrySendError::Closed(_) => CorralError::General("Event loop is gone".to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts down from every received number, one event per step.
    #[derive(Default)]
    struct Countdown {
        received: AtomicUsize,
        failures: AtomicUsize,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl EventAction<usize> for Countdown {
        fn on_stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        async fn on_receive(&self, event: usize, sender: &EventSender<usize>) -> Result<()> {
            self.received.fetch_add(1, Ordering::SeqCst);
            match event {
                0 => Err(CorralError::Internal("reached zero".to_owned())),
                n => sender.try_post_event(n - 1),
            }
        }

        fn on_error(&self, _error: CorralError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(cond: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn events_posted_before_start_are_handled() -> Result<()> {
        let action = Arc::new(Countdown::default());
        let mut event_loop = EventLoop::new("countdown", 4, action.clone());
        event_loop.sender().try_post_event(3)?;

        event_loop.start()?;
        assert!(wait_for(|| action.failures.load(Ordering::SeqCst) == 1).await);
        assert_eq!(action.received.load(Ordering::SeqCst), 4);
        assert!(event_loop.start().is_err());

        event_loop.stop();
        event_loop.stop();
        assert!(wait_for(|| action.stopped.load(Ordering::SeqCst)).await);
        Ok(())
    }

    #[tokio::test]
    async fn full_queue_rejects_try_post() -> Result<()> {
        let event_loop = EventLoop::new("countdown", 1, Arc::new(Countdown::default()));
        let sender = event_loop.sender();
        sender.try_post_event(1)?;
        assert!(sender.try_post_event(1).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn stopped_loop_cannot_start() {
        let action = Arc::new(Countdown::default());
        let mut event_loop = EventLoop::new("countdown", 1, action.clone());
        event_loop.stop();
        assert!(event_loop.start().is_err());
        assert!(!action.stopped.load(Ordering::SeqCst));
    }
}
