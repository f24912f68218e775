use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent};
use chromiumoxide::cdp::browser_protocol::page::EventDomContentEventFired;
use dashmap::DashSet;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{CompletionTrigger, CompletionType, TriggerContext};

/// Ready once DOMContentLoaded has fired and in-flight requests have
/// been empty for `wait_after_last_request`; any new request before
/// that quiet period elapses restarts the timer.
pub struct RequestsTrigger {
    wait_after_last_request: Duration,
    dom_content_loaded: Arc<AtomicBool>,
    pending: Arc<DashSet<String>>,
    notify: Arc<Notify>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl RequestsTrigger {
    pub fn new(wait_after_last_request: Duration) -> Self {
        Self {
            wait_after_last_request,
            dom_content_loaded: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(DashSet::new()),
            notify: Arc::new(Notify::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionTrigger for RequestsTrigger {
    async fn init(&self, ctx: &TriggerContext) -> anyhow::Result<()> {
        let mut tasks = Vec::new();

        {
            let mut stream = ctx.page.event_listener::<EventDomContentEventFired>().await?;
            let flag = self.dom_content_loaded.clone();
            let notify = self.notify.clone();
            tasks.push(tokio::spawn(async move {
                if stream.next().await.is_some() {
                    flag.store(true, Ordering::SeqCst);
                    notify.notify_waiters();
                }
            }));
        }

        {
            let mut stream = ctx.page.event_listener::<EventRequestWillBeSent>().await?;
            let pending = self.pending.clone();
            let notify = self.notify.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    if event.redirect_response.is_none() {
                        pending.insert(event.request_id.inner().to_string());
                        notify.notify_waiters();
                    }
                }
            }));
        }

        for removed_on in ["finished", "failed"] {
            let pending = self.pending.clone();
            let notify = self.notify.clone();
            if removed_on == "finished" {
                let mut stream = ctx.page.event_listener::<EventLoadingFinished>().await?;
                tasks.push(tokio::spawn(async move {
                    while let Some(event) = stream.next().await {
                        pending.remove(&event.request_id.inner().to_string());
                        notify.notify_waiters();
                    }
                }));
            } else {
                let mut stream = ctx.page.event_listener::<EventLoadingFailed>().await?;
                tasks.push(tokio::spawn(async move {
                    while let Some(event) = stream.next().await {
                        pending.remove(&event.request_id.inner().to_string());
                        notify.notify_waiters();
                    }
                }));
            }
        }

        *self.tasks.lock().unwrap() = tasks;
        Ok(())
    }

    async fn wait(&self) -> CompletionType {
        loop {
            if self.dom_content_loaded.load(Ordering::SeqCst) && self.pending.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.wait_after_last_request) => {
                        return CompletionType::RequestsQuiet;
                    }
                    _ = self.notify.notified() => {
                        continue;
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    async fn close(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}
