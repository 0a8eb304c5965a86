//! Reference-counted heartbeat for the coordinator
//!
//! The host terminates a coordinator it considers idle. While at least one
//! operation is outstanding, the heartbeat emits a pulse every
//! `idle_threshold / 6` so a long classification is not mistaken for
//! idleness. The pulse task exists only while the count is non-zero.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Fraction of the host's idle threshold used as the pulse interval.
const PULSES_PER_THRESHOLD: u32 = 6;

/// Liveness side-effect emitted on every beat.
pub trait Pulse: Send + Sync {
    fn pulse(&self);
}

impl<F> Pulse for F
where
    F: Fn() + Send + Sync,
{
    fn pulse(&self) {
        self()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// How long the host tolerates silence before terminating the coordinator
    pub idle_threshold_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 30_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        let threshold = Duration::from_millis(self.idle_threshold_ms);
        (threshold / PULSES_PER_THRESHOLD).max(Duration::from_millis(1))
    }
}

#[derive(Default)]
struct State {
    outstanding: usize,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    interval: Duration,
    pulse: Arc<dyn Pulse>,
    state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

/// Shared heartbeat handle. Clones refer to the same counter.
#[derive(Clone)]
pub struct Heartbeat {
    inner: Arc<Inner>,
}

impl Heartbeat {
    pub fn new(interval: Duration, pulse: Arc<dyn Pulse>) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval,
                pulse,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn from_config(config: &HeartbeatConfig, pulse: Arc<dyn Pulse>) -> Self {
        Self::new(config.interval(), pulse)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register one outstanding operation. The first one starts the pulse
    /// task; must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.state();
        state.outstanding += 1;
        if state.outstanding > 1 {
            return;
        }

        let interval = self.inner.interval;
        let pulse = self.inner.pulse.clone();
        debug!(?interval, "heartbeat started");
        state.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!("heartbeat pulse");
                pulse.pulse();
            }
        }));
    }

    /// Release one outstanding operation. The last one stops the pulse task.
    /// Extra calls at zero do nothing.
    pub fn stop(&self) {
        let mut state = self.state();
        if state.outstanding == 0 {
            return;
        }
        state.outstanding -= 1;
        if state.outstanding == 0 {
            if let Some(task) = state.task.take() {
                task.abort();
            }
            debug!("heartbeat stopped");
        }
    }

    /// `start()` now, `stop()` exactly once when the guard drops.
    pub fn guard(&self) -> HeartbeatGuard {
        self.start();
        HeartbeatGuard {
            heartbeat: self.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state().task.is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }
}

/// Keeps the heartbeat running for as long as it lives.
#[must_use = "the heartbeat stops as soon as the guard is dropped"]
pub struct HeartbeatGuard {
    heartbeat: Heartbeat,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.heartbeat.stop();
    }
}
