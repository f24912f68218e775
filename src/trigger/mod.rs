//! Component I — Completion Triggers (spec §4.I): pluggable "the page
//! is ready to read" detectors, all sharing the same `init`/`wait`/
//! `close` contract and all confined to the top-level frame.

pub mod always_never;
pub mod event;
pub mod requests;
pub mod variable;

pub use always_never::{AlwaysTrigger, NeverTrigger};
pub use event::EventTrigger;
pub use requests::RequestsTrigger;
pub use variable::VariableTrigger;

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::Page;

use crate::dialog::DialogHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionType {
    RequestsQuiet,
    VariableSet,
    EventFired,
    Always,
    PageLoadTimeout,
}

/// Everything a trigger needs to install its hooks and, for the
/// script-based triggers, reach into the tab's shared context object.
pub struct TriggerContext {
    pub page: Page,
    pub dialog_handler: Arc<DialogHandler>,
    pub context_key: String,
}

#[async_trait]
pub trait CompletionTrigger: Send + Sync {
    /// Installs hooks before navigation. Called once.
    async fn init(&self, ctx: &TriggerContext) -> anyhow::Result<()>;

    /// Resolves once the page is considered loaded.
    async fn wait(&self) -> CompletionType;

    /// Detaches any subscriptions. Idempotent.
    async fn close(&self);
}
