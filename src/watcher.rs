//! Component G — Request Watcher (spec §4.G): tracks the lifecycle of
//! every HTTP request a tab's top-level frame makes, identifying the
//! *initial* request (the one driving the page's own navigation).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
};
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Response,
    Loaded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    pub state: RequestState,
    pub status: Option<i64>,
    pub headers: Option<HashMap<String, String>>,
    pub error_text: Option<String>,
    pub request_timestamp_us: i64,
    pub response_timestamp_us: Option<i64>,
}

/// Converts a CDP monotonic timestamp (fractional seconds) to integer
/// microseconds by rounding in decimal text rather than in floating
/// point, so repeated conversions of the same value never drift.
fn seconds_to_micros(seconds: f64) -> i64 {
    let formatted = format!("{seconds:.6}");
    let (whole, frac) = formatted.split_once('.').unwrap_or((&formatted, "0"));
    let whole: i64 = whole.parse().unwrap_or(0);
    let frac: i64 = frac.parse().unwrap_or(0);
    if whole < 0 { whole * 1_000_000 - frac } else { whole * 1_000_000 + frac }
}

/// Watches a single tab's network traffic for the duration of one
/// render. Not reusable across tabs.
pub struct RequestWatcher {
    requests: Arc<DashMap<String, RequestRecord>>,
    initial_request_id: Arc<std::sync::Mutex<Option<String>>>,
    initial_tx: watch::Sender<Option<RequestRecord>>,
    initial_rx: watch::Receiver<Option<RequestRecord>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RequestWatcher {
    /// Begins watching. `only_initial` trims each of the four
    /// subscriptions once it has processed the event that settles the
    /// initial request's fate, rather than running for the tab's whole
    /// life (spec §9: only unsubscribe once the initial request is
    /// definitively past `Response`).
    pub async fn start(page: &Page, only_initial: bool) -> anyhow::Result<Arc<Self>> {
        let requests = Arc::new(DashMap::new());
        let initial_request_id = Arc::new(std::sync::Mutex::new(None));
        let (initial_tx, initial_rx) = watch::channel(None);

        let this = Arc::new(Self {
            requests: requests.clone(),
            initial_request_id: initial_request_id.clone(),
            initial_tx,
            initial_rx,
            tasks: std::sync::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let mut tasks = Vec::new();

        {
            let mut stream = page.event_listener::<EventRequestWillBeSent>().await?;
            let requests = requests.clone();
            let initial_request_id = initial_request_id.clone();
            let watcher = this.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let id = event.request_id.inner().to_string();
                    let is_redirect = event.redirect_response.is_some();
                    let is_new = !is_redirect && !requests.contains_key(&id);
                    if is_new {
                        requests.insert(
                            id.clone(),
                            RequestRecord {
                                id: id.clone(),
                                url: event.request.url.clone(),
                                method: event.request.method.clone(),
                                state: RequestState::Pending,
                                status: None,
                                headers: None,
                                error_text: None,
                                request_timestamp_us: seconds_to_micros(*event.timestamp.inner()),
                                response_timestamp_us: None,
                            },
                        );
                        let mut slot = initial_request_id.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(id);
                        }
                    }
                    if only_initial && watcher.settled_initial() {
                        break;
                    }
                }
            }));
        }

        {
            let mut stream = page.event_listener::<EventResponseReceived>().await?;
            let requests = requests.clone();
            let watcher = this.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let id = event.request_id.inner().to_string();
                    if let Some(mut record) = requests.get_mut(&id) {
                        record.state = RequestState::Response;
                        record.status = Some(event.response.status);
                        record.headers = serde_json::from_value::<HashMap<String, String>>(
                            event.response.headers.inner().clone(),
                        )
                        .ok()
                        .map(|headers| {
                            headers.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect()
                        });
                    }
                    if only_initial && watcher.settled_initial() {
                        break;
                    }
                }
            }));
        }

        {
            let mut stream = page.event_listener::<EventLoadingFinished>().await?;
            let requests = requests.clone();
            let watcher = this.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let id = event.request_id.inner().to_string();
                    let mut finished_record = None;
                    if let Some(mut record) = requests.get_mut(&id) {
                        record.state = RequestState::Loaded;
                        record.response_timestamp_us = Some(seconds_to_micros(*event.timestamp.inner()));
                        finished_record = Some(record.clone());
                    }
                    watcher.maybe_resolve_initial(&id, finished_record);
                    if only_initial && watcher.settled_initial() {
                        break;
                    }
                }
            }));
        }

        {
            let mut stream = page.event_listener::<EventLoadingFailed>().await?;
            let requests = requests.clone();
            let watcher = this.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let id = event.request_id.inner().to_string();
                    let mut failed_record = None;
                    if let Some(mut record) = requests.get_mut(&id) {
                        record.state = RequestState::Failed;
                        record.error_text = Some(event.error_text.clone());
                        record.response_timestamp_us = Some(seconds_to_micros(*event.timestamp.inner()));
                        failed_record = Some(record.clone());
                    }
                    watcher.maybe_resolve_initial(&id, failed_record);
                    if only_initial && watcher.settled_initial() {
                        break;
                    }
                }
            }));
        }

        *this.tasks.lock().unwrap() = tasks;
        Ok(this)
    }

    fn maybe_resolve_initial(&self, id: &str, record: Option<RequestRecord>) {
        let Some(record) = record else { return };
        let is_initial = self
            .initial_request_id
            .lock()
            .unwrap()
            .as_deref()
            .map(|initial| initial == id)
            .unwrap_or(false);
        if is_initial && matches!(record.state, RequestState::Loaded | RequestState::Failed) {
            let _ = self.initial_tx.send(Some(record));
        }
    }

    fn settled_initial(&self) -> bool {
        self.initial_rx.borrow().is_some()
    }

    /// All request records observed so far, newest-insertion-order not
    /// guaranteed.
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.iter().map(|entry| entry.value().clone()).collect()
    }

    /// The initial request's record, but only once it has reached
    /// `Loaded` or `Failed`.
    pub fn initial_request(&self) -> Option<RequestRecord> {
        self.initial_rx.borrow().clone()
    }

    /// Resolves once the initial request reaches `Loaded` or `Failed`.
    pub async fn initial_request_promise(&self) -> RequestRecord {
        let mut rx = self.initial_rx.clone();
        loop {
            if let Some(record) = rx.borrow().clone() {
                return record;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without ever resolving; this can only
                // happen if the watcher was closed first, which callers
                // are expected not to race against this promise.
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        trace!("request watcher closed");
    }
}

impl Drop for RequestWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_to_micros_is_exact() {
        assert_eq!(seconds_to_micros(1.5), 1_500_000);
        assert_eq!(seconds_to_micros(0.000001), 1);
        assert_eq!(seconds_to_micros(123456.654321), 123_456_654_321);
    }

    #[test]
    fn seconds_to_micros_handles_negative() {
        assert_eq!(seconds_to_micros(-1.5), -1_500_000);
    }
}
