//! In-process host for the coordinator
//!
//! Plays the part a browser plays for an extension's background worker:
//! the coordinator is spawned lazily on the first connection, may be
//! terminated at any time (explicitly or after an idle period) and is
//! respawned on the next connection. `invalidate()` kills the channel for
//! good, which is what a requester sees after the extension is reloaded.

use crate::channel::{ChannelGuard, TransportError};
use crate::coordinator::{Coordinator, CoordinatorServices, Inbound, PortId};
use crate::heartbeat::Pulse;
use crate::protocol::Reply;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Terminate the coordinator after this long without activity. `None`
    /// keeps it alive until terminated explicitly.
    pub idle_timeout_ms: Option<u64>,
    /// Bound on queued inbound messages per coordinator instance
    pub inbox_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: None,
            inbox_capacity: 64,
        }
    }
}

impl HostConfig {
    pub fn with_idle_timeout_ms(mut self, idle_timeout_ms: u64) -> Self {
        self.idle_timeout_ms = Some(idle_timeout_ms);
        self
    }
}

/// A requester's open port to the current coordinator instance.
#[derive(Debug)]
pub struct Connection {
    pub port: PortId,
    pub inbox: mpsc::Sender<Inbound>,
    pub replies: mpsc::UnboundedReceiver<Reply>,
}

/// Last time anything showed signs of life.
struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

struct Instance {
    inbox: mpsc::Sender<Inbound>,
    task: JoinHandle<()>,
    generation: u64,
}

#[derive(Default)]
struct HostState {
    instance: Option<Instance>,
    generation: u64,
}

pub struct ServiceHost {
    services: CoordinatorServices,
    config: HostConfig,
    state: Mutex<HostState>,
    invalidated: AtomicBool,
    activity: Arc<Activity>,
    next_port: AtomicU64,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceHost {
    /// Create a host. No coordinator runs until the first `connect()`.
    ///
    /// With an idle timeout configured this spawns the watchdog, so it must
    /// be called from within a Tokio runtime.
    /// Build a host. When an idle timeout is set, the coordinator's
    /// heartbeat threshold is capped at it so pulses outpace the watchdog.
    pub fn new(mut services: CoordinatorServices, config: HostConfig) -> Arc<Self> {
        if let Some(idle_ms) = config.idle_timeout_ms {
            if services.heartbeat.idle_threshold_ms > idle_ms {
                debug!(
                    heartbeat_ms = services.heartbeat.idle_threshold_ms,
                    idle_ms, "heartbeat threshold capped at host idle timeout"
                );
                services.heartbeat.idle_threshold_ms = idle_ms;
            }
        }
        let idle_timeout = config.idle_timeout_ms.map(Duration::from_millis);
        let host = Arc::new(Self {
            services,
            config,
            state: Mutex::new(HostState::default()),
            invalidated: AtomicBool::new(false),
            activity: Arc::new(Activity::new()),
            next_port: AtomicU64::new(1),
            watchdog: Mutex::new(None),
        });

        if let Some(idle_timeout) = idle_timeout {
            let task = tokio::spawn(watch_idle(Arc::downgrade(&host), idle_timeout));
            *host.watchdog.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        }
        host
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a port to the coordinator, spawning one if none is running.
    pub async fn connect(&self) -> Result<Connection, TransportError> {
        if !self.is_valid() {
            return Err(TransportError::Dead("host invalidated".to_string()));
        }

        let inbox = self.ensure_instance();
        let port = PortId::new(self.next_port.fetch_add(1, Ordering::Relaxed));
        let (replies_tx, replies) = mpsc::unbounded_channel();
        inbox
            .send(Inbound::Connect {
                port,
                replies: replies_tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        self.activity.touch();
        debug!(%port, "port opened");

        Ok(Connection {
            port,
            inbox,
            replies,
        })
    }

    fn ensure_instance(&self) -> mpsc::Sender<Inbound> {
        let mut state = self.state();
        if let Some(instance) = &state.instance {
            if !instance.task.is_finished() {
                return instance.inbox.clone();
            }
        }

        state.generation += 1;
        let generation = state.generation;
        let (inbox, rx) = mpsc::channel(self.config.inbox_capacity.max(1));
        let activity = self.activity.clone();
        let pulse: Arc<dyn Pulse> = Arc::new(move || activity.touch());
        let coordinator = Coordinator::new(self.services.clone(), generation, pulse);
        let task = tokio::spawn(coordinator.run(rx));
        self.activity.touch();
        info!(generation, "coordinator spawned");

        state.instance = Some(Instance {
            inbox: inbox.clone(),
            task,
            generation,
        });
        inbox
    }

    /// Abort the running coordinator, if any. In-flight requests lose their
    /// replies; the next `connect()` spawns a fresh instance.
    pub fn terminate(&self) -> bool {
        let instance = self.state().instance.take();
        match instance {
            Some(instance) => {
                instance.task.abort();
                warn!(generation = instance.generation, "coordinator terminated");
                true
            }
            None => false,
        }
    }

    /// Kill the channel permanently.
    pub fn invalidate(&self) {
        if self.invalidated.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("host invalidated");
        self.terminate();
        if let Some(task) = self
            .watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::SeqCst)
    }

    /// Liveness probe for requesters. Does not keep the host alive.
    pub fn probe(self: &Arc<Self>) -> ChannelGuard {
        let host = Arc::downgrade(self);
        ChannelGuard::new(move || host.upgrade().is_some_and(|h| h.is_valid()))
    }

    pub fn is_running(&self) -> bool {
        self.state()
            .instance
            .as_ref()
            .is_some_and(|i| !i.task.is_finished())
    }

    /// Generation of the running instance, or of the last one spawned
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Instances spawned so far
    pub fn spawn_count(&self) -> u64 {
        self.generation()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}

impl Drop for ServiceHost {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(instance) = state.instance.take() {
            instance.task.abort();
        }
        let watchdog = self.watchdog.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = watchdog.take() {
            task.abort();
        }
    }
}

async fn watch_idle(host: Weak<ServiceHost>, idle_timeout: Duration) {
    let period = (idle_timeout / 4).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(host) = host.upgrade() else { break };
        if host.is_running() && host.activity.idle_for() >= idle_timeout {
            info!(?idle_timeout, "coordinator idle");
            host.terminate();
        }
    }
}
