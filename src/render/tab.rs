//! Component J — Tab Renderer (spec §4.J): the per-request algorithm
//! that turns a [`crate::handle::Handle`] and a [`super::RenderOptions`]
//! into a [`super::RenderOutcome`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EnableParams as PageEnableParams, EventDomContentEventFired, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use futures::StreamExt;
use tracing::warn;

use crate::browser_js::{context_init_script, read_slot_expr, HTML_SLOT};
use crate::error::{ErrorKind, RenderError};
use crate::handle::Handle;
use crate::trigger::{
    AlwaysTrigger, CompletionTrigger, CompletionType, EventTrigger, NeverTrigger, RequestsTrigger,
    TriggerContext, VariableTrigger,
};
use crate::watcher::{RequestState, RequestWatcher};
use crate::dialog::DialogHandler;

use super::{CompletionTriggerConfig, RenderOptions, RenderOutcome};

/// Drives exactly one render. Calling `render` a second time on the
/// same instance is a programmer bug (spec §4.J: "idempotent ... reject
/// a second call with LogicError").
pub struct TabRenderer {
    used: AtomicBool,
}

impl Default for TabRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TabRenderer {
    pub fn new() -> Self {
        Self {
            used: AtomicBool::new(false),
        }
    }

    pub async fn render(
        &self,
        handle: &Handle,
        options: RenderOptions,
    ) -> Result<RenderOutcome, RenderError> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(RenderError::new(
                ErrorKind::Unknown,
                "TabRenderer::render called more than once",
            ));
        }

        let client = handle.client();
        let guard = client.lock().await;
        let browser = guard.browser().clone();
        drop(guard);

        let context_id = if options.fresh_browser_context {
            let params = CreateBrowserContextParams::builder().build();
            match browser.create_browser_context(params).await {
                Ok(id) => Some(id),
                Err(err) => {
                    return Err(RenderError::new(
                        ErrorKind::TabCreationFailed,
                        format!("failed to create browser context: {err}"),
                    ));
                }
            }
        } else {
            None
        };

        let page = match create_page(&browser, context_id.clone()).await {
            Ok(page) => page,
            Err(err) => {
                dispose_context(&browser, context_id).await;
                return Err(RenderError::new(
                    ErrorKind::TabCreationFailed,
                    format!("failed to create page target: {err}"),
                ));
            }
        };

        let result = self.render_in_tab(&page, &options).await;

        teardown(&browser, &page, context_id).await;

        result
    }

    async fn render_in_tab(
        &self,
        page: &Page,
        options: &RenderOptions,
    ) -> Result<RenderOutcome, RenderError> {
        let context_key = crate::browser_js::random_token();

        page.execute(NetworkEnableParams::default())
            .await
            .map_err(|e| tab_creation_failed(e))?;
        page.execute(PageEnableParams::default())
            .await
            .map_err(|e| tab_creation_failed(e))?;

        let dialog_handler = DialogHandler::start(page)
            .await
            .map_err(|e| tab_creation_failed(e))?;

        let dom_content_loaded = Arc::new(AtomicBool::new(false));
        let dom_task = {
            let mut stream = page
                .event_listener::<EventDomContentEventFired>()
                .await
                .map_err(|e| tab_creation_failed(e))?;
            let flag = dom_content_loaded.clone();
            tokio::spawn(async move {
                if stream.next().await.is_some() {
                    flag.store(true, Ordering::SeqCst);
                }
            })
        };

        page.evaluate_on_new_document(context_init_script(&context_key))
            .await
            .map_err(|e| tab_creation_failed(e))?;

        let trigger = build_trigger(&options.completion_trigger);
        let trigger_ctx = TriggerContext {
            page: page.clone(),
            dialog_handler: dialog_handler.clone(),
            context_key: context_key.clone(),
        };
        trigger
            .init(&trigger_ctx)
            .await
            .map_err(|e| tab_creation_failed(e))?;

        let watcher = RequestWatcher::start(page, true)
            .await
            .map_err(|e| tab_creation_failed(e))?;

        if let Some(script) = &options.script_to_evaluate_on_new_document {
            page.evaluate_on_new_document(script.clone())
                .await
                .map_err(|e| tab_creation_failed(e))?;
        }

        let load_result = tokio::time::timeout(
            Duration::from_millis(options.page_load_timeout_millis),
            self.load_page(page, options, &watcher, trigger.as_ref()),
        )
        .await;

        dom_task.abort();
        dialog_handler.close();
        watcher.close();
        trigger.close().await;

        let (completed, html) = match load_result {
            Ok(Ok(completion)) => {
                let completed = completion != CompletionType::PageLoadTimeout;
                let html = read_html(page, &context_key).await;
                (completed, html)
            }
            Ok(Err(render_error)) => return Err(render_error),
            Err(_timeout) => {
                if !dom_content_loaded.load(Ordering::SeqCst) || !options.allow_partial_load {
                    let initial = watcher.initial_request();
                    let http_status = initial.as_ref().and_then(|r| r.status).map(|s| s as u16);
                    let headers = initial.and_then(|r| r.headers);
                    return Err(RenderError::new(ErrorKind::Timeout, "page load timed out")
                        .with_response(http_status, headers));
                }
                let html = read_html(page, &context_key).await;
                (false, html)
            }
        };

        let initial = watcher.initial_request();
        let status = initial.as_ref().and_then(|r| r.status);
        let headers = initial.and_then(|r| r.headers).unwrap_or_default();

        Ok(RenderOutcome {
            status,
            html,
            headers,
            completed,
        })
    }

    /// Navigate, await the initial request's fate, then the completion
    /// trigger. Returns the [`CompletionType`] the trigger (or the
    /// caller's own timeout check) produced.
    async fn load_page(
        &self,
        page: &Page,
        options: &RenderOptions,
        watcher: &RequestWatcher,
        trigger: &dyn CompletionTrigger,
    ) -> Result<CompletionType, RenderError> {
        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(options.browser_width as i64)
                .height(options.browser_height as i64)
                .screen_width(options.browser_width as i64)
                .screen_height(options.browser_height as i64)
                .device_scale_factor(0.0)
                .mobile(false)
                .build()
                .expect("all required fields are set"),
        )
        .await
        .map_err(|e| tab_creation_failed(e))?;

        if let Some(user_agent) = &options.user_agent {
            page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
                .await
                .map_err(|e| tab_creation_failed(e))?;
        }

        page.execute(NavigateParams::new(options.url.clone()))
            .await
            .map_err(|e| RenderError::new(ErrorKind::TabCreationFailed, e.to_string()))?;

        let initial = watcher.initial_request_promise().await;

        if initial.state == RequestState::Failed {
            let err_text = initial.error_text.clone().unwrap_or_else(|| "request failed".into());
            return Err(RenderError::new(ErrorKind::InitialRequestFailed, err_text)
                .with_response(initial.status.map(|s| s as u16), initial.headers.clone()));
        }

        if let Some(expected) = &options.expected_status_codes {
            if let Some(status) = initial.status {
                if !expected.contains(&status) {
                    return Err(RenderError::new(
                        ErrorKind::InitialRequestStatus,
                        format!("initial request status {status} not in expected set"),
                    )
                    .with_response(Some(status as u16), initial.headers.clone()));
                }
            }
        }

        Ok(trigger.wait().await)
    }
}

fn tab_creation_failed(err: impl std::fmt::Display) -> RenderError {
    RenderError::new(ErrorKind::TabCreationFailed, err.to_string())
}

fn build_trigger(cfg: &CompletionTriggerConfig) -> Arc<dyn CompletionTrigger> {
    match cfg {
        CompletionTriggerConfig::Requests { wait_after_last_request_millis } => {
            Arc::new(RequestsTrigger::new(Duration::from_millis(*wait_after_last_request_millis)))
        }
        CompletionTriggerConfig::Event { target, event_name } => {
            Arc::new(EventTrigger::new(target.clone(), event_name.clone()))
        }
        CompletionTriggerConfig::Variable { var_name } => {
            Arc::new(VariableTrigger::new(var_name.clone()))
        }
        CompletionTriggerConfig::Always => Arc::new(AlwaysTrigger),
        CompletionTriggerConfig::Never => Arc::new(NeverTrigger),
    }
}

async fn create_page(
    browser: &chromiumoxide::Browser,
    context_id: Option<chromiumoxide::cdp::browser_protocol::browser::BrowserContextId>,
) -> anyhow::Result<Page> {
    let mut builder = CreateTargetParams::builder().url("about:blank");
    if let Some(id) = context_id {
        builder = builder.browser_context_id(id);
    }
    let params = builder.build().map_err(|e| anyhow::anyhow!(e))?;
    Ok(browser.new_page(params).await?)
}

async fn read_html(page: &Page, context_key: &str) -> String {
    let latched_expr = read_slot_expr(context_key, HTML_SLOT);
    if let Ok(result) = page.evaluate(latched_expr).await {
        if let Ok(html) = result.into_value::<String>() {
            return html;
        }
    }
    let live_expr = crate::browser_js::serialize_document_expr();
    page.evaluate(live_expr)
        .await
        .ok()
        .and_then(|r| r.into_value::<String>().ok())
        .unwrap_or_default()
}

async fn dispose_context(
    browser: &chromiumoxide::Browser,
    context_id: Option<chromiumoxide::cdp::browser_protocol::browser::BrowserContextId>,
) {
    if let Some(id) = context_id {
        if let Err(err) = browser
            .execute(DisposeBrowserContextParams::new(id))
            .await
        {
            warn!("failed to dispose browser context: {err}");
        }
    }
}

async fn teardown(
    browser: &chromiumoxide::Browser,
    page: &Page,
    context_id: Option<chromiumoxide::cdp::browser_protocol::browser::BrowserContextId>,
) {
    if let Err(err) = page.close().await {
        warn!("failed to close target: {err}");
    }
    dispose_context(browser, context_id).await;
}
