//! Component H (dialog half) — auto-accepts every `window.alert` /
//! `confirm` / `prompt` a page raises, and provides the "magic dialog"
//! rendezvous primitive completion triggers use to signal the service
//! from inside page JavaScript (spec §4.H).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::browser_js::random_token;

pub struct DialogHandler {
    magics: Arc<DashMap<String, oneshot::Sender<()>>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DialogHandler {
    pub async fn start(page: &Page) -> anyhow::Result<Arc<Self>> {
        let magics: Arc<DashMap<String, oneshot::Sender<()>>> = Arc::new(DashMap::new());
        let mut stream = page.event_listener::<EventJavascriptDialogOpening>().await?;
        let page = page.clone();
        let magics_for_task = magics.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if let Some((_, tx)) = magics_for_task.remove(&event.default_prompt) {
                    let _ = tx.send(());
                }
                let params = HandleJavaScriptDialogParams::builder()
                    .accept(true)
                    .prompt_text(event.default_prompt.clone())
                    .build()
                    .expect("accept is the only required field");
                if let Err(err) = page.execute(params).await {
                    warn!("failed to dismiss JS dialog: {err}");
                }
            }
        });

        Ok(Arc::new(Self {
            magics,
            task: std::sync::Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        }))
    }

    /// Registers a fresh rendezvous token; the returned receiver
    /// resolves the moment a dialog carrying that token as its default
    /// prompt is observed (and auto-accepted).
    pub fn register_magic(&self) -> (String, oneshot::Receiver<()>) {
        let token = random_token();
        let (tx, rx) = oneshot::channel();
        self.magics.insert(token.clone(), tx);
        (token, rx)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for DialogHandler {
    fn drop(&mut self) {
        self.close();
    }
}
