//! Components J and K (spec §4.J, §4.K): per-request tab orchestration
//! and the manager that hands it a [`crate::handle::Handle`].

pub mod manager;
pub mod tab;

pub use manager::RenderManager;
pub use tab::TabRenderer;

use std::collections::HashMap;

/// Which completion trigger a render request asked for (spec §6's
/// `completionTrigger` discriminated union).
#[derive(Debug, Clone)]
pub enum CompletionTriggerConfig {
    Requests { wait_after_last_request_millis: u64 },
    Event { target: String, event_name: String },
    Variable { var_name: String },
    Always,
    Never,
}

/// Per-request options, already merged over service defaults (spec
/// §4.K: "merges per-request options over service defaults").
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub url: String,
    pub page_load_timeout_millis: u64,
    pub browser_width: u32,
    pub browser_height: u32,
    pub allow_partial_load: bool,
    pub fresh_browser_context: bool,
    pub script_to_evaluate_on_new_document: Option<String>,
    pub expected_status_codes: Option<Vec<i64>>,
    pub completion_trigger: CompletionTriggerConfig,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub status: Option<i64>,
    pub html: String,
    pub headers: HashMap<String, String>,
    pub completed: bool,
}
