use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use tokio::sync::{Mutex, oneshot};

use crate::browser_js::{capture_html_script, read_slot_expr, COMPLETION_PROMISE_SLOT, HTML_SLOT};
use super::{CompletionTrigger, CompletionType, TriggerContext};

struct Installed {
    page: Page,
    context_key: String,
    magic_rx: oneshot::Receiver<()>,
}

/// Ready when `target.addEventListener(event_name, ...)` fires once on
/// the top-level frame. Defaults (spec §9) mirror the common
/// "render done" signal convention: `target = "window"`,
/// `event_name = "prerender_done"`.
pub struct EventTrigger {
    target: String,
    event_name: String,
    installed: Mutex<Option<Installed>>,
}

impl EventTrigger {
    pub fn new(target: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            event_name: event_name.into(),
            installed: Mutex::new(None),
        }
    }

    pub fn default_trigger() -> Self {
        Self::new("window", "prerender_done")
    }
}

#[async_trait]
impl CompletionTrigger for EventTrigger {
    async fn init(&self, ctx: &TriggerContext) -> anyhow::Result<()> {
        let (token, magic_rx) = ctx.dialog_handler.register_magic();
        let capture = capture_html_script(&ctx.context_key, HTML_SLOT);
        let script = format!(
            "(function() {{ \
               {target}.addEventListener({event_name:?}, function() {{ \
                 {capture} \
                 window[{key:?}][{promise_slot:?}] = Promise.resolve(); \
                 window.prompt('', {token:?}); \
               }}, {{ once: true }}); \
             }})();",
            target = self.target,
            event_name = self.event_name,
            key = ctx.context_key,
            promise_slot = COMPLETION_PROMISE_SLOT,
            token = token,
        );
        ctx.page.evaluate_on_new_document(script).await?;
        *self.installed.lock().await = Some(Installed {
            page: ctx.page.clone(),
            context_key: ctx.context_key.clone(),
            magic_rx,
        });
        Ok(())
    }

    async fn wait(&self) -> CompletionType {
        let (page, expr) = {
            let mut guard = self.installed.lock().await;
            let Some(installed) = guard.as_mut() else {
                std::future::pending::<()>().await;
                unreachable!();
            };
            let _ = (&mut installed.magic_rx).await;
            (
                installed.page.clone(),
                read_slot_expr(&installed.context_key, COMPLETION_PROMISE_SLOT),
            )
        };
        let params = EvaluateParams::builder()
            .expression(expr)
            .await_promise(true)
            .build()
            .expect("expression is the only required field");
        let _ = page.evaluate(params).await;
        CompletionType::EventFired
    }

    async fn close(&self) {
        *self.installed.lock().await = None;
    }
}
