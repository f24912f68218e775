//! Component F — External Provider (spec §4.F): a single logical
//! connection to a remote debugging endpoint with automatic reconnect
//! and backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chromiumoxide::Browser;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::cdp::CdpClient;
use crate::error::LogicError;
use crate::handle::Handle;
use crate::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExternalStatus {
    Initial,
    Starting,
    Running,
    Closing,
    Closed,
}

/// How to locate the remote debugging endpoint (spec §6's
/// `provider.type`: `external_static_url` or `external_host_port`).
pub enum Endpoint {
    StaticUrl(String),
    HostPort { host: String, port: u16, secure: bool },
}

impl Endpoint {
    async fn resolve_websocket_url(&self) -> anyhow::Result<String> {
        match self {
            Endpoint::StaticUrl(url) => Ok(url.clone()),
            Endpoint::HostPort { host, port, secure } => {
                let scheme = if *secure { "https" } else { "http" };
                let url = format!("{scheme}://{host}:{port}/json/version");
                #[derive(serde::Deserialize)]
                struct VersionResponse {
                    #[serde(rename = "webSocketDebuggerUrl")]
                    web_socket_debugger_url: String,
                }
                let resp = reqwest::get(&url).await?.json::<VersionResponse>().await?;
                Ok(resp.web_socket_debugger_url)
            }
        }
    }
}

pub struct ExternalProvider {
    endpoint: Endpoint,
    status: Mutex<ExternalStatus>,
    client: Mutex<Option<Arc<Mutex<CdpClient>>>>,
    handles: Arc<Mutex<std::collections::HashMap<uuid::Uuid, Handle>>>,
    closing_guard: AtomicBool,
    backoff: Mutex<Box<dyn Backoff>>,
}

impl ExternalProvider {
    pub fn new(endpoint: Endpoint, backoff: Box<dyn Backoff>) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            status: Mutex::new(ExternalStatus::Initial),
            client: Mutex::new(None),
            handles: Arc::new(Mutex::new(std::collections::HashMap::new())),
            closing_guard: AtomicBool::new(false),
            backoff: Mutex::new(backoff),
        })
    }

    async fn connect_once(&self) -> anyhow::Result<Arc<Mutex<CdpClient>>> {
        let ws_url = self.endpoint.resolve_websocket_url().await?;
        let (browser, handler) = Browser::connect(&ws_url).await?;
        Ok(Arc::new(Mutex::new(CdpClient::spawn(browser, handler))))
    }

    /// Reconnect loop: on unexpected disconnect while Running, closes the
    /// dead client and retries with backoff (reset on success).
    fn spawn_reconnect_watch(self: &Arc<Self>, client: Arc<Mutex<CdpClient>>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut rx = client.lock().await.subscribe_disconnect();
            if rx.changed().await.is_err() || !*rx.borrow() {
                return;
            }
            if *this.status.lock().await != ExternalStatus::Running {
                return;
            }
            warn!("external provider lost connection; reconnecting");
            client.lock().await.close().await;
            *this.client.lock().await = None;

            loop {
                if *this.status.lock().await != ExternalStatus::Running {
                    return;
                }
                match this.connect_once().await {
                    Ok(new_client) => {
                        this.backoff.lock().await.reset();
                        *this.client.lock().await = Some(new_client.clone());
                        info!("external provider reconnected");
                        this.spawn_reconnect_watch(new_client);
                        return;
                    }
                    Err(err) => {
                        let delay = this.backoff.lock().await.next_try();
                        warn!(error = %err, delay, "external provider reconnect failed, retrying");
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Provider for ExternalProvider {
    async fn start(self: &Arc<Self>) -> Result<(), LogicError> {
        {
            let mut status = self.status.lock().await;
            if *status != ExternalStatus::Initial {
                return Err(LogicError::new("external provider already started"));
            }
            *status = ExternalStatus::Starting;
        }

        match self.connect_once().await {
            Ok(client) => {
                *self.client.lock().await = Some(client.clone());
                *self.status.lock().await = ExternalStatus::Running;
                self.backoff.lock().await.reset();
                info!("external provider connected");
                self.spawn_reconnect_watch(client);
                Ok(())
            }
            Err(err) => {
                *self.status.lock().await = ExternalStatus::Initial;
                Err(LogicError::new(format!(
                    "external provider failed to connect: {err}"
                )))
            }
        }
    }

    async fn close(&self) {
        if self.closing_guard.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.status.lock().await = ExternalStatus::Closing;
        if let Some(client) = self.client.lock().await.take() {
            client.lock().await.close().await;
        }
        for (_, handle) in self.handles.lock().await.drain() {
            handle.close();
        }
        *self.status.lock().await = ExternalStatus::Closed;
        info!("external provider closed");
    }

    async fn create_handle(&self) -> Option<Handle> {
        if *self.status.lock().await != ExternalStatus::Running {
            return None;
        }
        let client = self.client.lock().await.clone()?;
        let handles = self.handles.clone();
        let on_close: Arc<dyn Fn(uuid::Uuid) + Send + Sync> = Arc::new(move |id| {
            let handles = handles.clone();
            tokio::spawn(async move {
                handles.lock().await.remove(&id);
            });
        });
        let handle = Handle::new(client, Some(on_close));
        self.handles.lock().await.insert(handle.id(), handle.clone());
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FlatBackoff;

    #[tokio::test]
    async fn create_handle_before_start_returns_none() {
        let provider = ExternalProvider::new(
            Endpoint::StaticUrl("ws://127.0.0.1:1/devtools/browser/x".into()),
            Box::new(FlatBackoff::new(100)),
        );
        assert!(provider.create_handle().await.is_none());
    }

    #[tokio::test]
    async fn double_start_is_a_logic_error_after_failed_connect() {
        let provider = ExternalProvider::new(
            Endpoint::StaticUrl("ws://127.0.0.1:1/devtools/browser/x".into()),
            Box::new(FlatBackoff::new(0)),
        );
        // First attempt fails (nothing listening) and resets to Initial,
        // so a second start is allowed to retry rather than erroring.
        assert!(provider.start().await.is_err());
        assert!(provider.start().await.is_err());
    }
}
