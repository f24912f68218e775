//! Component D — Browser Instance (spec §4.D). Wraps a [`BrowserProcess`]
//! with a role (Main/Standby), open-handle accounting, and a main-uptime
//! stopwatch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::events::EventBus;
use crate::handle::Handle;
use crate::process::process::{BrowserProcess, ProcessEvent, ProcessStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Main,
    Standby,
}

#[derive(Debug, Clone)]
pub enum InstanceEvent {
    Start,
    Stop,
    Main,
    Standby,
    Idle,
    MainOnline,
    MainOffline,
}

/// A stopwatch that is running iff role=Main ∧ process=Running, paused
/// iff role=Standby ∧ process=Running, and stopped otherwise.
#[derive(Debug, Default)]
struct UptimeStopwatch {
    running_since: Option<Instant>,
    accumulated: Duration,
}

impl UptimeStopwatch {
    fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn stop(&mut self) {
        self.pause();
        self.accumulated = Duration::ZERO;
    }

    fn millis(&self) -> u128 {
        let extra = self
            .running_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        (self.accumulated + extra).as_millis()
    }
}

struct Inner {
    role: Role,
    handles: std::collections::HashMap<Uuid, Handle>,
    stopwatch: UptimeStopwatch,
    last_process_status: ProcessStatus,
}

pub struct BrowserInstance {
    process: Arc<BrowserProcess>,
    inner: Mutex<Inner>,
    events: EventBus<InstanceEvent>,
}

impl BrowserInstance {
    pub fn new(process: Arc<BrowserProcess>, role: Role) -> Arc<Self> {
        let instance = Arc::new(Self {
            process,
            inner: Mutex::new(Inner {
                role,
                handles: std::collections::HashMap::new(),
                stopwatch: UptimeStopwatch::default(),
                last_process_status: ProcessStatus::Initial,
            }),
            events: EventBus::new(),
        });

        let watched = instance.clone();
        let mut rx = watched.process.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                watched.on_process_event(event).await;
            }
        });

        instance
    }

    pub fn process(&self) -> &Arc<BrowserProcess> {
        &self.process
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    pub async fn role(&self) -> Role {
        self.inner.lock().await.role
    }

    pub async fn handle_count(&self) -> usize {
        self.inner.lock().await.handles.len()
    }

    pub async fn main_uptime_millis(&self) -> u128 {
        self.inner.lock().await.stopwatch.millis()
    }

    /// Swaps this instance's role, re-evaluating the uptime stopwatch
    /// and firing `main`/`standby` plus `main_online`/`main_offline`
    /// edges as appropriate.
    pub async fn set_role(self: &Arc<Self>, role: Role) {
        let mut inner = self.inner.lock().await;
        if inner.role == role {
            return;
        }
        inner.role = role;
        let process_status = inner.last_process_status;
        Self::reevaluate_stopwatch(&mut inner, process_status);
        drop(inner);

        match role {
            Role::Main => {
                self.events.emit(InstanceEvent::Main);
                if process_status == ProcessStatus::Running {
                    self.events.emit(InstanceEvent::MainOnline);
                }
            }
            Role::Standby => {
                self.events.emit(InstanceEvent::Standby);
                if process_status == ProcessStatus::Running {
                    self.events.emit(InstanceEvent::MainOffline);
                }
            }
        }
    }

    /// Registers a newly issued [`Handle`], attaching a one-shot
    /// removal on close; firing `idle` on the 1→0 transition.
    pub async fn register_handle(self: &Arc<Self>, handle: Handle) {
        let mut inner = self.inner.lock().await;
        inner.handles.insert(handle.id(), handle);
    }

    pub async fn remove_handle(self: &Arc<Self>, id: Uuid) {
        let became_empty = {
            let mut inner = self.inner.lock().await;
            let had = inner.handles.remove(&id).is_some();
            had && inner.handles.is_empty()
        };
        if became_empty {
            self.events.emit(InstanceEvent::Idle);
        }
    }

    pub async fn open_handle_ids(&self) -> HashSet<Uuid> {
        self.inner.lock().await.handles.keys().copied().collect()
    }

    /// Closes every handle this instance has issued and empties its
    /// tracking set (spec §8: closing a provider closes every handle it
    /// has issued). `on_close` callbacks still fire per-handle but find
    /// nothing left to remove, since the set is drained up front here.
    pub async fn close_all_handles(self: &Arc<Self>) {
        let handles: Vec<Handle> = {
            let mut inner = self.inner.lock().await;
            inner.handles.drain().map(|(_, handle)| handle).collect()
        };
        let had_any = !handles.is_empty();
        for handle in &handles {
            handle.close();
        }
        if had_any {
            self.events.emit(InstanceEvent::Idle);
        }
    }

    async fn on_process_event(self: &Arc<Self>, event: ProcessEvent) {
        let (new_status, emit) = match event {
            ProcessEvent::Start { .. } => (Some(ProcessStatus::Running), Some(InstanceEvent::Start)),
            ProcessEvent::Stop { .. } => (Some(ProcessStatus::Stopped), Some(InstanceEvent::Stop)),
            ProcessEvent::Fault { .. } => (Some(ProcessStatus::Faulted), None),
            ProcessEvent::Stopping { .. } => (Some(ProcessStatus::Stopping), None),
            ProcessEvent::Starting { .. } => (Some(ProcessStatus::Starting), None),
        };

        let Some(new_status) = new_status else { return };

        let (role, was_running) = {
            let mut inner = self.inner.lock().await;
            let was_running = inner.last_process_status == ProcessStatus::Running;
            inner.last_process_status = new_status;
            Self::reevaluate_stopwatch(&mut inner, new_status);
            (inner.role, was_running)
        };

        if let Some(evt) = emit {
            self.events.emit(evt);
        }

        let now_running = new_status == ProcessStatus::Running;
        if role == Role::Main && now_running && !was_running {
            self.events.emit(InstanceEvent::MainOnline);
        } else if role == Role::Main && was_running && !now_running {
            self.events.emit(InstanceEvent::MainOffline);
        }
    }

    fn reevaluate_stopwatch(inner: &mut Inner, process_status: ProcessStatus) {
        match (inner.role, process_status) {
            (Role::Main, ProcessStatus::Running) => inner.stopwatch.start(),
            (Role::Standby, ProcessStatus::Running) => inner.stopwatch.pause(),
            _ => inner.stopwatch.stop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_accumulates_only_while_running() {
        let mut sw = UptimeStopwatch::default();
        assert_eq!(sw.millis(), 0);
        sw.start();
        std::thread::sleep(Duration::from_millis(5));
        sw.pause();
        assert!(sw.millis() >= 5);
        let paused_at = sw.millis();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sw.millis(), paused_at);
    }

    #[test]
    fn stopwatch_stop_resets_accumulated() {
        let mut sw = UptimeStopwatch::default();
        sw.start();
        std::thread::sleep(Duration::from_millis(2));
        sw.stop();
        assert_eq!(sw.millis(), 0);
    }
}
