//! Component C — Browser Process (spec §4.C). One headless-browser OS
//! process with a CDP client, the state machine and ABA-safe version
//! counter described there.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chromiumoxide::Browser;
use chromiumoxide::browser::BrowserConfig;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::cdp::CdpClient;
use crate::error::LogicError;
use crate::events::EventBus;
use crate::process::launch;

/// Fixed poll delays for the Version-endpoint readiness probe (spec §4.C
/// step 5). Not configurable: these are the reference values.
const VERSION_POLL_DELAYS_MS: &[u64] = &[100, 200, 500, 1000, 2000, 5000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Initial,
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    Faulted,
    AutoRestart,
}

#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Starting { version: u64 },
    Start { version: u64 },
    Fault { version: u64 },
    Stopping { version: u64, reason: StopReason },
    Stop { version: u64 },
}

#[derive(Debug, Clone)]
pub struct BrowserInfo {
    pub user_agent: String,
    pub web_socket_debugger_url: String,
    pub browser_version: String,
}

/// Static launch parameters for one Process (port, binary, flag
/// overrides/extras). Does not change across restarts.
pub struct ProcessConfig {
    pub executable: PathBuf,
    pub debugging_port: u16,
    pub override_args: Option<Vec<String>>,
    pub extra_args: Vec<String>,
}

/// The two restart policies spec §4.C's fault handler consults:
/// "retry on startup failure" vs. "auto-restart on running-time fault".
pub struct ProcessPolicy {
    pub auto_restart: bool,
    pub startup_retry_backoff: Mutex<Box<dyn Backoff>>,
    pub runtime_restart_backoff: Mutex<Box<dyn Backoff>>,
}

struct Inner {
    status: ProcessStatus,
    stop_reason: Option<StopReason>,
    start_count: u64,
    pid: Option<u32>,
    child: Option<Arc<Mutex<Child>>>,
    client: Option<Arc<Mutex<CdpClient>>>,
    browser_info: Option<BrowserInfo>,
}

/// One headless-browser OS process, its CDP client, and the state
/// machine of spec §4.C. Always used behind an `Arc` so the fault/
/// auto-restart continuation can hold a strong reference to itself.
pub struct BrowserProcess {
    inner: Mutex<Inner>,
    version: AtomicU64,
    stopping_guard: AtomicBool,
    events: EventBus<ProcessEvent>,
    cfg: ProcessConfig,
    policy: ProcessPolicy,
}

impl BrowserProcess {
    pub fn new(cfg: ProcessConfig, policy: ProcessPolicy) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                status: ProcessStatus::Initial,
                stop_reason: None,
                start_count: 0,
                pid: None,
                child: None,
                client: None,
                browser_info: None,
            }),
            version: AtomicU64::new(0),
            stopping_guard: AtomicBool::new(false),
            events: EventBus::new(),
            cfg,
            policy,
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> ProcessStatus {
        self.inner.lock().await.status
    }

    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.pid
    }

    pub async fn browser_info(&self) -> Option<BrowserInfo> {
        self.inner.lock().await.browser_info.clone()
    }

    pub async fn client(&self) -> Option<Arc<Mutex<CdpClient>>> {
        self.inner.lock().await.client.clone()
    }

    pub async fn start_count(&self) -> u64 {
        self.inner.lock().await.start_count
    }

    fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// §4.C Start procedure.
    pub async fn start(self: &Arc<Self>) -> Result<(), LogicError> {
        let version = {
            let mut inner = self.inner.lock().await;
            match inner.status {
                ProcessStatus::Running => return Ok(()),
                ProcessStatus::Initial | ProcessStatus::Stopped => {}
                _ => {
                    return Err(LogicError::new(format!(
                        "cannot start process in state {:?}",
                        inner.status
                    )));
                }
            }
            inner.status = ProcessStatus::Starting;
            inner.stop_reason = None;
            inner.start_count += 1;
            self.version.fetch_add(1, Ordering::SeqCst);
            self.version.load(Ordering::SeqCst)
        };
        self.events.emit(ProcessEvent::Starting { version });
        info!(version, "browser process starting");

        match self.try_start(version).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(version, error = %err, "browser process failed to start");
                self.fault(version, true).await;
                Ok(())
            }
        }
    }

    async fn try_start(self: &Arc<Self>, version: u64) -> anyhow::Result<()> {
        let args = launch::build_args(
            self.cfg.debugging_port,
            self.cfg.override_args.as_deref(),
            &self.cfg.extra_args,
        );

        let child = Command::new(&self.cfg.executable)
            .args(&args)
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();
        let child = Arc::new(Mutex::new(child));

        let info = poll_version_endpoint(self.cfg.debugging_port).await?;
        if self.current_version() != version {
            return Ok(()); // superseded; silently abort
        }

        let (browser, handler) = Browser::connect(&info.web_socket_debugger_url).await?;
        let client = Arc::new(Mutex::new(CdpClient::spawn(browser, handler)));

        if self.current_version() != version {
            client.lock().await.close().await;
            return Ok(());
        }

        // Fault on unexpected disconnect.
        {
            let this = self.clone();
            let mut disconnect_rx = client.lock().await.subscribe_disconnect();
            let watch_version = version;
            tokio::spawn(async move {
                if disconnect_rx.changed().await.is_ok() && *disconnect_rx.borrow() {
                    this.fault(watch_version, false).await;
                }
            });
        }

        // Fault (also) if the OS process exits on its own.
        {
            let this = self.clone();
            let watch_version = version;
            let child = child.clone();
            tokio::spawn(async move {
                let status = child.lock().await.wait().await;
                debug!(version = watch_version, ?status, "browser process exited");
                if this.current_version() == watch_version {
                    this.fault(watch_version, false).await;
                }
            });
        }

        let mut inner = self.inner.lock().await;
        if self.current_version() != version {
            return Ok(());
        }
        inner.pid = pid;
        inner.child = Some(child);
        inner.client = Some(client);
        inner.browser_info = Some(info);
        inner.status = ProcessStatus::Running;
        drop(inner);

        self.events.emit(ProcessEvent::Start { version });
        info!(version, "browser process running");
        Ok(())
    }

    /// Fault handling (spec §4.C). `was_starting` records whether the
    /// fault happened before the process ever reached Running.
    async fn fault(self: &Arc<Self>, version: u64, was_starting: bool) {
        if self.current_version() != version {
            return; // superseded
        }
        {
            let mut inner = self.inner.lock().await;
            if inner.status == ProcessStatus::Stopped || inner.status == ProcessStatus::Stopping {
                return;
            }
            inner.status = ProcessStatus::Faulted;
        }
        self.events.emit(ProcessEvent::Fault { version });
        error!(version, was_starting, "browser process faulted");

        self.stop_internal(StopReason::Faulted).await;

        // stop_internal bumps the version itself; re-baseline against
        // that bump rather than the version fault() was entered with,
        // or this check would always see a "mismatch" and never restart.
        let version = self.current_version();

        if !self.policy.auto_restart {
            return;
        }

        let delay_ms = if was_starting {
            self.policy.startup_retry_backoff.lock().await.next_try()
        } else {
            self.policy.runtime_restart_backoff.lock().await.next_try()
        };
        sleep(Duration::from_millis(delay_ms)).await;

        if self.current_version() != version {
            return; // a listener already restarted us during the backoff sleep
        }
        let _ = self.start().await;
    }

    /// §4.C Stop procedure, re-entrancy guarded.
    pub async fn stop(self: &Arc<Self>, reason: StopReason) {
        self.stop_internal(reason).await;
    }

    async fn stop_internal(self: &Arc<Self>, reason: StopReason) {
        if self.stopping_guard.swap(true, Ordering::SeqCst) {
            // A concurrent stop is in flight; wait for it to clear the
            // terminal state rather than double-run teardown.
            while self.stopping_guard.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(10)).await;
            }
            return;
        }

        let version = {
            let mut inner = self.inner.lock().await;
            if inner.status == ProcessStatus::Stopped {
                self.stopping_guard.store(false, Ordering::SeqCst);
                return;
            }
            inner.status = ProcessStatus::Stopping;
            inner.stop_reason = Some(reason);
            self.version.fetch_add(1, Ordering::SeqCst);
            self.current_version()
        };
        self.events.emit(ProcessEvent::Stopping { version, reason });
        info!(version, ?reason, "browser process stopping");

        let (client, child) = {
            let mut inner = self.inner.lock().await;
            (inner.client.take(), inner.child.take())
        };

        if let Some(client) = client {
            client.lock().await.close().await;
        }

        if let Some(child) = child {
            kill_process(&mut *child.lock().await).await;
        }

        {
            let mut inner = self.inner.lock().await;
            inner.status = ProcessStatus::Stopped;
            inner.pid = None;
        }
        self.stopping_guard.store(false, Ordering::SeqCst);
        self.events.emit(ProcessEvent::Stop { version });
        info!(version, "browser process stopped");
    }
}

async fn poll_version_endpoint(port: u16) -> anyhow::Result<BrowserInfo> {
    #[derive(serde::Deserialize)]
    struct VersionResponse {
        #[serde(rename = "webSocketDebuggerUrl")]
        web_socket_debugger_url: String,
        #[serde(rename = "Browser")]
        browser: String,
        #[serde(rename = "User-Agent")]
        user_agent: String,
    }

    let url = format!("http://127.0.0.1:{port}/json/version");
    let client = reqwest::Client::new();
    let mut last_err = None;

    for (i, delay) in VERSION_POLL_DELAYS_MS.iter().enumerate() {
        match client.get(&url).send().await {
            Ok(resp) => match resp.json::<VersionResponse>().await {
                Ok(v) => {
                    return Ok(BrowserInfo {
                        user_agent: v.user_agent,
                        web_socket_debugger_url: v.web_socket_debugger_url,
                        browser_version: v.browser,
                    });
                }
                Err(e) => last_err = Some(anyhow::anyhow!(e)),
            },
            Err(e) => last_err = Some(anyhow::anyhow!(e)),
        }

        let is_last = i == VERSION_POLL_DELAYS_MS.len() - 1;
        if is_last {
            break;
        }
        sleep(Duration::from_millis(*delay)).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("browser Version endpoint never became ready")))
}

/// §4.C Stop step 5: interrupt, wait up to 5s, then kill; spin until the
/// process is truly dead.
async fn kill_process(child: &mut Child) {
    let pid = child.id();

    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as i32, libc::SIGINT);
        }
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(Some(_status)) = child.try_wait() {
            return;
        }
        if let Some(pid) = pid {
            if is_process_dead(pid) {
                return;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    let _ = child.start_kill();
    loop {
        if let Ok(Some(_status)) = child.try_wait() {
            return;
        }
        if let Some(pid) = pid {
            if is_process_dead(pid) {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(target_os = "linux")]
fn is_process_dead(pid: u32) -> bool {
    let stat_path = format!("/proc/{pid}/stat");
    match std::fs::read_to_string(&stat_path) {
        Ok(contents) => contents
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .map(|state| state == "Z" || state == "X")
            .unwrap_or(true),
        Err(_) => true,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_dead(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as i32, 0) };
    ret != 0
}

#[cfg(not(unix))]
fn is_process_dead(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FlatBackoff;

    fn policy() -> ProcessPolicy {
        ProcessPolicy {
            auto_restart: true,
            startup_retry_backoff: Mutex::new(Box::new(FlatBackoff::new(0))),
            runtime_restart_backoff: Mutex::new(Box::new(FlatBackoff::new(0))),
        }
    }

    #[tokio::test]
    async fn starts_in_initial_state() {
        let process = BrowserProcess::new(
            ProcessConfig {
                executable: PathBuf::from("/nonexistent/chrome"),
                debugging_port: 0,
                override_args: None,
                extra_args: vec![],
            },
            policy(),
        );
        assert_eq!(process.status().await, ProcessStatus::Initial);
    }

    #[tokio::test]
    async fn start_on_missing_binary_faults_then_stops() {
        let process = BrowserProcess::new(
            ProcessConfig {
                executable: PathBuf::from("/nonexistent/chrome-binary-for-tests"),
                debugging_port: 65535,
                override_args: None,
                extra_args: vec![],
            },
            ProcessPolicy {
                auto_restart: false,
                startup_retry_backoff: Mutex::new(Box::new(FlatBackoff::new(0))),
                runtime_restart_backoff: Mutex::new(Box::new(FlatBackoff::new(0))),
            },
        );

        process.start().await.unwrap();
        assert_eq!(process.status().await, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn double_start_while_running_is_a_noop() {
        // Without a real Chrome binary we can only exercise the
        // precondition guard, not a live Running transition.
        let process = BrowserProcess::new(
            ProcessConfig {
                executable: PathBuf::from("/nonexistent/chrome"),
                debugging_port: 0,
                override_args: None,
                extra_args: vec![],
            },
            policy(),
        );
        {
            let mut inner = process.inner.lock().await;
            inner.status = ProcessStatus::Running;
        }
        assert!(process.start().await.is_ok());
    }

    #[tokio::test]
    async fn start_while_stopping_is_a_logic_error() {
        let process = BrowserProcess::new(
            ProcessConfig {
                executable: PathBuf::from("/nonexistent/chrome"),
                debugging_port: 0,
                override_args: None,
                extra_args: vec![],
            },
            policy(),
        );
        {
            let mut inner = process.inner.lock().await;
            inner.status = ProcessStatus::Stopping;
        }
        assert!(process.start().await.is_err());
    }
}
