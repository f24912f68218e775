//! Ambient stack: YAML configuration loading and the CLI surface (spec
//! §6, expanded per `SPEC_FULL.md` §2: `app`/`browser`/`render`
//! sections, `deny_unknown_fields`, `--config`/`--no-config`).

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::render::CompletionTriggerConfig;

#[derive(Debug, Parser)]
#[command(name = "render-service", about = "Renders post-JavaScript HTML over CDP")]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Ignore `--config` and run with built-in defaults.
    #[arg(long)]
    pub no_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Silent,
}

impl LogLevel {
    /// `fatal`/`silent` have no `tracing::Level` equivalent; both map
    /// to the quietest level tracing offers.
    pub fn as_env_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal | LogLevel::Silent => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

fn default_port() -> u16 {
    9222
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> LogLevel {
    LogLevel::Info
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProviderConfig {
    Internal {
        #[serde(default = "default_main_port")]
        main_port: u16,
        #[serde(default = "default_standby_port")]
        standby_port: u16,
        #[serde(default)]
        auto_recycle: bool,
        #[serde(default = "default_recycle_after_uptime_millis")]
        auto_recycle_after_uptime_millis: u64,
        #[serde(default = "default_recycle_retry_after_millis")]
        auto_recycle_retry_after_millis: u64,
        #[serde(default = "default_recycle_drain_millis")]
        recycle_drain_millis: u64,
    },
    ExternalStaticUrl {
        url: String,
    },
    ExternalHostPort {
        host: String,
        port: u16,
        #[serde(default)]
        secure: bool,
    },
}

fn default_main_port() -> u16 {
    9223
}
fn default_standby_port() -> u16 {
    9224
}
fn default_recycle_after_uptime_millis() -> u64 {
    1_800_000
}
fn default_recycle_retry_after_millis() -> u64 {
    30_000
}
fn default_recycle_drain_millis() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    pub user_agent: Option<String>,
    pub provider: ProviderConfig,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    800
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum CompletionTriggerFileConfig {
    Requests {
        #[serde(default = "default_wait_after_last_request_millis")]
        wait_after_last_request_millis: u64,
    },
    Event {
        #[serde(default = "default_event_target")]
        target: String,
        #[serde(default = "default_event_name")]
        event_name: String,
    },
    Variable {
        var_name: String,
    },
    Always,
    Never,
}

fn default_wait_after_last_request_millis() -> u64 {
    500
}
fn default_event_target() -> String {
    "window".to_string()
}
fn default_event_name() -> String {
    "prerender_done".to_string()
}

impl From<CompletionTriggerFileConfig> for CompletionTriggerConfig {
    fn from(cfg: CompletionTriggerFileConfig) -> Self {
        match cfg {
            CompletionTriggerFileConfig::Requests { wait_after_last_request_millis } => {
                CompletionTriggerConfig::Requests { wait_after_last_request_millis }
            }
            CompletionTriggerFileConfig::Event { target, event_name } => {
                CompletionTriggerConfig::Event { target, event_name }
            }
            CompletionTriggerFileConfig::Variable { var_name } => {
                CompletionTriggerConfig::Variable { var_name }
            }
            CompletionTriggerFileConfig::Always => CompletionTriggerConfig::Always,
            CompletionTriggerFileConfig::Never => CompletionTriggerConfig::Never,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(default = "default_page_load_timeout_millis")]
    pub page_load_timeout_millis: u64,
    #[serde(default)]
    pub allow_partial_load: bool,
    #[serde(default)]
    pub fresh_browser_context: bool,
    pub expected_status_codes: Option<Vec<i64>>,
    #[serde(default = "default_completion_trigger")]
    pub completion_trigger: CompletionTriggerFileConfig,
}

fn default_page_load_timeout_millis() -> u64 {
    30_000
}
fn default_completion_trigger() -> CompletionTriggerFileConfig {
    CompletionTriggerFileConfig::Requests { wait_after_last_request_millis: default_wait_after_last_request_millis() }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_app")]
    pub app: AppConfig,
    pub browser: BrowserConfig,
    #[serde(default = "default_render")]
    pub render: RenderConfig,
}

fn default_app() -> AppConfig {
    AppConfig { port: default_port(), host: default_host(), log_level: default_log_level() }
}
fn default_render() -> RenderConfig {
    RenderConfig {
        page_load_timeout_millis: default_page_load_timeout_millis(),
        allow_partial_load: false,
        fresh_browser_context: false,
        expected_status_codes: None,
        completion_trigger: default_completion_trigger(),
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Built-in defaults used with `--no-config`: an internal provider
    /// on the reference ports, no explicit `chrome` binary override
    /// (resolved at startup from `$PATH`/well-known locations).
    pub fn builtin_default() -> Self {
        Config {
            app: default_app(),
            browser: BrowserConfig {
                width: default_width(),
                height: default_height(),
                user_agent: None,
                provider: ProviderConfig::Internal {
                    main_port: default_main_port(),
                    standby_port: default_standby_port(),
                    auto_recycle: false,
                    auto_recycle_after_uptime_millis: default_recycle_after_uptime_millis(),
                    auto_recycle_retry_after_millis: default_recycle_retry_after_millis(),
                    recycle_drain_millis: default_recycle_drain_millis(),
                },
            },
            render: default_render(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_internal_config() {
        let yaml = r#"
browser:
  provider:
    type: internal
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.app.port, 9222);
        assert!(matches!(config.browser.provider, ProviderConfig::Internal { .. }));
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let yaml = r#"
browser:
  provider:
    type: internal
bogus: true
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
