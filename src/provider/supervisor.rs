//! Component E — Supervisor Provider (spec §4.E): two Instances in
//! main/standby roles, promotion on fault, periodic recycle of main.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::LogicError;
use crate::events::EventBus;
use crate::handle::Handle;
use crate::process::{BrowserInstance, InstanceEvent, ProcessEvent, ProcessStatus, Role};
use crate::provider::{Provider, RecycleResult, TakeoverReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorStatus {
    Initial,
    Starting,
    Running,
    Closed,
}

#[derive(Debug, Clone)]
pub enum SupervisorProviderEvent {
    Takeover { reason: TakeoverReason },
    Recycle { result: RecycleResult },
}

pub struct SupervisorConfig {
    pub auto_recycle: bool,
    pub auto_recycle_after_uptime_millis: u64,
    /// Distinct, shorter retry interval after a `StandbyUnavailable`
    /// recycle attempt (spec §9: the reference default reusing
    /// `auto_recycle_after_uptime_millis` is treated as a bug here).
    pub auto_recycle_retry_after_millis: u64,
    pub recycle_drain_millis: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_recycle: true,
            auto_recycle_after_uptime_millis: 30 * 60 * 1000,
            auto_recycle_retry_after_millis: 30 * 1000,
            recycle_drain_millis: 10_000,
        }
    }
}

pub struct SupervisorProvider {
    instances: Mutex<[Arc<BrowserInstance>; 2]>,
    status: Mutex<SupervisorStatus>,
    events: EventBus<SupervisorProviderEvent>,
    /// `Some` while a recycle is in flight: the leader publishes its
    /// result on the channel so single-flight followers wait for the
    /// same outcome instead of guessing `Canceled`.
    recycling: Mutex<Option<watch::Receiver<Option<RecycleResult>>>>,
    closing: AtomicBool,
    cfg: SupervisorConfig,
    recycle_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorProvider {
    pub fn new(main: Arc<BrowserInstance>, standby: Arc<BrowserInstance>, cfg: SupervisorConfig) -> Arc<Self> {
        Arc::new(Self {
            instances: Mutex::new([main, standby]),
            status: Mutex::new(SupervisorStatus::Initial),
            events: EventBus::new(),
            recycling: Mutex::new(None),
            closing: AtomicBool::new(false),
            cfg,
            recycle_timer: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SupervisorProviderEvent> {
        self.events.subscribe()
    }

    async fn main(&self) -> Arc<BrowserInstance> {
        self.instances.lock().await[0].clone()
    }

    async fn standby(&self) -> Arc<BrowserInstance> {
        self.instances.lock().await[1].clone()
    }

    /// Promotes standby to main by swapping array positions and
    /// updating both instances' roles.
    async fn swap_roles(&self) {
        let mut instances = self.instances.lock().await;
        instances.swap(0, 1);
        let new_main = instances[0].clone();
        let new_standby = instances[1].clone();
        drop(instances);
        new_main.set_role(Role::Main).await;
        new_standby.set_role(Role::Standby).await;
    }

    async fn consider_standby_promotion(self: &Arc<Self>) {
        if *self.status.lock().await != SupervisorStatus::Running {
            return;
        }
        let main = self.main().await;
        let standby = self.standby().await;

        let main_running = main.process().status().await == ProcessStatus::Running;
        let standby_running = standby.process().status().await == ProcessStatus::Running;
        if main_running || !standby_running {
            return;
        }

        // Give the initial Main a chance to come up before reacting to
        // its very first startup attempt.
        let initial_settled = *self.status.lock().await == SupervisorStatus::Running
            && main.process().start_count().await > 1;
        if !initial_settled {
            return;
        }

        self.swap_roles().await;
        self.events.emit(SupervisorProviderEvent::Takeover {
            reason: TakeoverReason::Fault,
        });
        info!("supervisor takeover: standby promoted to main (fault)");
    }

    fn schedule_next_recycle(self: &Arc<Self>, delay_ms: u64) {
        let this = self.clone();
        let this_for_slot = self.clone();
        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            let result = this.recycle_main().await;
            let next_delay = match result {
                Ok(RecycleResult::Recycled) | Ok(RecycleResult::Canceled) => Some(0),
                Ok(RecycleResult::StandbyUnavailable) => {
                    Some(this.cfg.auto_recycle_retry_after_millis)
                }
                Err(_) => None,
            };
            if let Some(delay) = next_delay {
                if *this.status.lock().await == SupervisorStatus::Running && this.cfg.auto_recycle
                {
                    this.schedule_next_recycle(delay);
                }
            }
        });
        tokio::spawn(async move {
            *this_for_slot.recycle_timer.lock().await = Some(handle);
        });
    }

    /// §4.E recycle algorithm. Single-flight: a caller that arrives
    /// while a recycle is already in progress waits for and returns the
    /// leader's actual result rather than a guessed one.
    pub async fn recycle_main(self: &Arc<Self>) -> Result<RecycleResult, LogicError> {
        if *self.status.lock().await != SupervisorStatus::Running {
            return Err(LogicError::new("recycleMain requires a Running supervisor"));
        }

        let mut guard = self.recycling.lock().await;
        if let Some(mut rx) = guard.clone() {
            drop(guard);
            loop {
                if let Some(result) = *rx.borrow() {
                    return Ok(result);
                }
                if rx.changed().await.is_err() {
                    return Ok(RecycleResult::Canceled);
                }
            }
        }

        let (tx, rx) = watch::channel(None);
        *guard = Some(rx);
        drop(guard);

        let result = self.recycle_main_inner().await;
        let _ = tx.send(Some(result));
        *self.recycling.lock().await = None;

        self.events.emit(SupervisorProviderEvent::Recycle { result });
        info!(?result, "supervisor recycle complete");
        Ok(result)
    }

    async fn recycle_main_inner(self: &Arc<Self>) -> RecycleResult {
        let standby = self.standby().await;
        if standby.process().status().await != ProcessStatus::Running {
            return RecycleResult::StandbyUnavailable;
        }

        self.swap_roles().await;
        self.events.emit(SupervisorProviderEvent::Takeover {
            reason: TakeoverReason::Recycle,
        });
        // `standby` is now the demoted former-main; wait for it to drain.
        let demoted = standby;

        let drain_deadline = Duration::from_millis(self.cfg.recycle_drain_millis);
        let mut rx = demoted.subscribe();
        let wait_for_idle = async {
            loop {
                if demoted.handle_count().await == 0 {
                    return;
                }
                if rx.recv().await.is_err() {
                    return;
                }
            }
        };
        tokio::select! {
            _ = wait_for_idle => {}
            _ = sleep(drain_deadline) => {
                warn!("recycle drain timed out; abandoning remaining handles");
            }
        }

        if *self.status.lock().await != SupervisorStatus::Running {
            return RecycleResult::Canceled;
        }
        if demoted.role().await != Role::Standby {
            return RecycleResult::StandbyUnavailable;
        }
        if demoted.process().status().await != ProcessStatus::Running {
            return RecycleResult::Canceled;
        }

        demoted.process().stop(crate::process::StopReason::Requested).await;
        if *self.status.lock().await != SupervisorStatus::Running {
            return RecycleResult::Canceled;
        }
        let _ = demoted.process().start().await;

        RecycleResult::Recycled
    }
}

#[async_trait]
impl Provider for SupervisorProvider {
    async fn start(self: &Arc<Self>) -> Result<(), LogicError> {
        {
            let mut status = self.status.lock().await;
            if *status != SupervisorStatus::Initial {
                return Err(LogicError::new("supervisor already started"));
            }
            *status = SupervisorStatus::Starting;
        }

        let main = self.main().await;
        let standby = self.standby().await;
        let (r1, r2) = tokio::join!(main.process().start(), standby.process().start());
        r1?;
        r2?;

        *self.status.lock().await = SupervisorStatus::Running;
        info!("supervisor running");
        Ok(())
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.status.lock().await = SupervisorStatus::Closed;
        if let Some(timer) = self.recycle_timer.lock().await.take() {
            timer.abort();
        }
        let main = self.main().await;
        let standby = self.standby().await;
        tokio::join!(
            main.process().stop(crate::process::StopReason::Requested),
            standby.process().stop(crate::process::StopReason::Requested),
        );
        tokio::join!(main.close_all_handles(), standby.close_all_handles());
        info!("supervisor closed");
    }

    async fn create_handle(&self) -> Option<Handle> {
        if *self.status.lock().await != SupervisorStatus::Running {
            return None;
        }
        let main = self.main().await;
        if main.process().status().await != ProcessStatus::Running {
            return None;
        }
        let client = main.process().client().await?;
        let instance = main.clone();
        let on_close: Arc<dyn Fn(uuid::Uuid) + Send + Sync> = Arc::new(move |id| {
            let instance = instance.clone();
            tokio::spawn(async move {
                instance.remove_handle(id).await;
            });
        });
        let handle = Handle::new(client, Some(on_close));
        main.register_handle(handle.clone()).await;
        Some(handle)
    }
}

/// Wires the event subscriptions §4.E's `start` procedure describes
/// (`main_online` → schedule recycle; process `start`/`fault` → consider
/// standby promotion). Call once right after construction, before
/// [`Provider::start`].
pub fn wire_supervisor_events(supervisor: &Arc<SupervisorProvider>) {
    let this = supervisor.clone();
    tokio::spawn(async move {
        let main = this.main().await;
        let standby = this.standby().await;
        let mut main_instance_rx = main.subscribe();
        let mut standby_instance_rx = standby.subscribe();
        let mut main_process_rx = main.process().subscribe();
        let mut standby_process_rx = standby.process().subscribe();

        loop {
            tokio::select! {
                Ok(event) = main_instance_rx.recv() => {
                    if matches!(event, InstanceEvent::MainOnline) {
                        this.schedule_next_recycle(this.cfg.auto_recycle_after_uptime_millis);
                    }
                }
                Ok(event) = standby_instance_rx.recv() => {
                    if matches!(event, InstanceEvent::MainOnline) {
                        this.schedule_next_recycle(this.cfg.auto_recycle_after_uptime_millis);
                    }
                }
                Ok(event) = main_process_rx.recv() => {
                    if matches!(event, ProcessEvent::Start { .. } | ProcessEvent::Fault { .. }) {
                        this.consider_standby_promotion().await;
                    }
                }
                Ok(event) = standby_process_rx.recv() => {
                    if matches!(event, ProcessEvent::Start { .. } | ProcessEvent::Fault { .. }) {
                        this.consider_standby_promotion().await;
                    }
                }
                else => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FlatBackoff;
    use crate::process::{BrowserProcess, ProcessConfig, ProcessPolicy};
    use std::path::PathBuf;

    fn fake_process() -> Arc<BrowserProcess> {
        BrowserProcess::new(
            ProcessConfig {
                executable: PathBuf::from("/nonexistent/chrome"),
                debugging_port: 0,
                override_args: None,
                extra_args: vec![],
            },
            ProcessPolicy {
                auto_restart: false,
                startup_retry_backoff: tokio::sync::Mutex::new(Box::new(FlatBackoff::new(0))),
                runtime_restart_backoff: tokio::sync::Mutex::new(Box::new(FlatBackoff::new(0))),
            },
        )
    }

    #[tokio::test]
    async fn recycle_requires_running_supervisor() {
        let main = BrowserInstance::new(fake_process(), Role::Main);
        let standby = BrowserInstance::new(fake_process(), Role::Standby);
        let supervisor = SupervisorProvider::new(main, standby, SupervisorConfig::default());
        let result = supervisor.recycle_main().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_handle_without_running_main_returns_none() {
        let main = BrowserInstance::new(fake_process(), Role::Main);
        let standby = BrowserInstance::new(fake_process(), Role::Standby);
        let supervisor = SupervisorProvider::new(main, standby, SupervisorConfig::default());
        assert!(supervisor.create_handle().await.is_none());
    }
}
