//! Wire types for the `POST /render` contract (spec §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::render::{CompletionTriggerConfig, RenderOutcome};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CompletionTriggerDto {
    Requests { wait_after_last_request_millis: Option<u64> },
    Event { target: Option<String>, event_name: Option<String> },
    Variable { var_name: String },
    Always,
    Never,
}

impl CompletionTriggerDto {
    pub fn into_config(self, default_wait_after_last_request_millis: u64) -> CompletionTriggerConfig {
        match self {
            CompletionTriggerDto::Requests { wait_after_last_request_millis } => {
                CompletionTriggerConfig::Requests {
                    wait_after_last_request_millis: wait_after_last_request_millis
                        .unwrap_or(default_wait_after_last_request_millis),
                }
            }
            CompletionTriggerDto::Event { target, event_name } => CompletionTriggerConfig::Event {
                target: target.unwrap_or_else(|| "window".to_string()),
                event_name: event_name.unwrap_or_else(|| "prerender_done".to_string()),
            },
            CompletionTriggerDto::Variable { var_name } => {
                CompletionTriggerConfig::Variable { var_name }
            }
            CompletionTriggerDto::Always => CompletionTriggerConfig::Always,
            CompletionTriggerDto::Never => CompletionTriggerConfig::Never,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequestDto {
    pub url: String,
    pub page_load_timeout_millis: Option<u64>,
    pub browser_width: Option<u32>,
    pub browser_height: Option<u32>,
    pub allow_partial_load: Option<bool>,
    pub fresh_browser_context: Option<bool>,
    pub script_to_evaluate_on_new_document: Option<String>,
    pub expected_status_codes: Option<Vec<i64>>,
    pub completion_trigger: Option<CompletionTriggerDto>,
}

#[derive(Debug, Serialize)]
pub struct RenderResponseDto {
    pub status: Option<i64>,
    pub html: String,
    pub headers: HashMap<String, String>,
    pub completed: bool,
}

impl From<RenderOutcome> for RenderResponseDto {
    fn from(outcome: RenderOutcome) -> Self {
        Self {
            status: outcome.status,
            html: outcome.html,
            headers: outcome.headers,
            completed: outcome.completed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponseDto {
    pub code: String,
    pub message: String,
}

impl From<&RenderError> for ErrorResponseDto {
    fn from(err: &RenderError) -> Self {
        Self {
            code: err.kind.code().to_string(),
            message: err.message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthzResponseDto {
    pub status: &'static str,
}
