use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use render_service::backoff::{TieredBackoff, TieredEntry};
use render_service::config::{Cli, Config, ProviderConfig};
use render_service::http::{build_router, AppState};
use render_service::process::{
    find_browser_executable, BrowserInstance, BrowserProcess, ProcessConfig, ProcessPolicy, Role,
};
use render_service::provider::external::{Endpoint, ExternalProvider};
use render_service::provider::supervisor::{wire_supervisor_events, SupervisorConfig, SupervisorProvider};
use render_service::provider::Provider;
use render_service::render::RenderManager;

/// The reference retry table: fast retries while a process is flapping,
/// settling to a slow poll once it's clearly not coming back.
fn default_backoff() -> Box<dyn render_service::backoff::Backoff> {
    Box::new(
        TieredBackoff::new(vec![
            TieredEntry { tries_threshold: 0, ms: 500 },
            TieredEntry { tries_threshold: 3, ms: 2_000 },
            TieredEntry { tries_threshold: 8, ms: 10_000 },
        ])
        .expect("backoff table is non-empty"),
    )
}

fn process_config(executable: PathBuf, port: u16) -> ProcessConfig {
    ProcessConfig {
        executable,
        debugging_port: port,
        override_args: None,
        extra_args: Vec::new(),
    }
}

fn process_policy() -> ProcessPolicy {
    ProcessPolicy {
        auto_restart: true,
        startup_retry_backoff: Mutex::new(default_backoff()),
        runtime_restart_backoff: Mutex::new(default_backoff()),
    }
}

/// Builds the configured [`Provider`] and wires up any supervisor event
/// plumbing it needs before `start()` is called.
fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn Provider>> {
    match &config.browser.provider {
        ProviderConfig::Internal {
            main_port,
            standby_port,
            auto_recycle,
            auto_recycle_after_uptime_millis,
            auto_recycle_retry_after_millis,
            recycle_drain_millis,
        } => {
            let executable = find_browser_executable()?;
            let main_process = BrowserProcess::new(
                process_config(executable.clone(), *main_port),
                process_policy(),
            );
            let standby_process = BrowserProcess::new(
                process_config(executable, *standby_port),
                process_policy(),
            );
            let main = BrowserInstance::new(main_process, Role::Main);
            let standby = BrowserInstance::new(standby_process, Role::Standby);
            let supervisor = SupervisorProvider::new(
                main,
                standby,
                SupervisorConfig {
                    auto_recycle: *auto_recycle,
                    auto_recycle_after_uptime_millis: *auto_recycle_after_uptime_millis,
                    auto_recycle_retry_after_millis: *auto_recycle_retry_after_millis,
                    recycle_drain_millis: *recycle_drain_millis,
                },
            );
            wire_supervisor_events(&supervisor);
            Ok(supervisor)
        }
        ProviderConfig::ExternalStaticUrl { url } => {
            Ok(ExternalProvider::new(Endpoint::StaticUrl(url.clone()), default_backoff()))
        }
        ProviderConfig::ExternalHostPort { host, port, secure } => Ok(ExternalProvider::new(
            Endpoint::HostPort { host: host.clone(), port: *port, secure: *secure },
            default_backoff(),
        )),
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = if cli.no_config {
        Config::builtin_default()
    } else {
        Config::load(&cli.config)?
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.app.log_level.as_env_filter_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.app.host,
        port = config.app.port,
        "starting render service"
    );

    let provider = build_provider(&config)?;
    let manager = Arc::new(RenderManager::new(provider));
    manager.start().await?;

    let state = AppState {
        manager: manager.clone(),
        defaults: Arc::new(config.render.clone()),
        browser_width: config.browser.width,
        browser_height: config.browser.height,
        user_agent: config.browser.user_agent.clone(),
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "render service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.stop().await;
    tracing::info!("render service shut down cleanly");
    Ok(())
}
