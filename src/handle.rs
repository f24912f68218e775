//! [`Handle`] — the opaque token render requests acquire from a
//! [`crate::provider`] and release when a render completes (spec §3,
//! §4.K).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cdp::CdpClient;

type CloseCallback = Arc<dyn Fn(Uuid) + Send + Sync>;

/// A reference to a browser-wide CDP client, issued by a Provider.
/// Closing a Handle never closes the underlying client: the client may
/// be shared by other open Handles on the same browser.
#[derive(Clone)]
pub struct Handle {
    id: Uuid,
    client: Arc<Mutex<CdpClient>>,
    closed: Arc<AtomicBool>,
    on_close: Option<CloseCallback>,
}

impl Handle {
    /// `on_close` is invoked at most once, the first time the Handle
    /// transitions to closed — whether from an explicit `close()` or
    /// because the underlying client disconnected.
    pub fn new(client: Arc<Mutex<CdpClient>>, on_close: Option<CloseCallback>) -> Self {
        let id = Uuid::new_v4();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn({
            let client = client.clone();
            let closed = closed.clone();
            let on_close = on_close.clone();
            async move {
                let mut rx = client.lock().await.subscribe_disconnect();
                if rx.changed().await.is_ok()
                    && *rx.borrow()
                    && !closed.swap(true, Ordering::SeqCst)
                {
                    if let Some(cb) = on_close {
                        cb(id);
                    }
                }
            }
        });

        Self {
            id,
            client,
            closed,
            on_close,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> Arc<Mutex<CdpClient>> {
        self.client.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent. Does not touch the underlying CDP client.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(cb) = &self.on_close {
                cb(self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_idempotent_and_notifies_once() {
        let closed = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..3 {
            if !closed.swap(true, Ordering::SeqCst) {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
