mod apply;
mod config;
mod error;
mod routes;

use std::process::ExitCode;

use apply::{Applier, ApplySummary};
use config::Config;
use error::AppResult;

/// Exit status after SIGINT/SIGTERM
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    // Initialize logging; stdout is reserved for the dry-run plan and the
    // completion marker
    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("starting add-ip-rules service");

    // The kernel work is a single blocking pass; signals only end the
    // process, they never cut a netlink request short.
    let dry_run = config.dry_run;
    let work = tokio::task::spawn_blocking(move || apply_config(&config));

    let result = tokio::select! {
        joined = work => match joined {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        },
        signal = shutdown_signal() => {
            tracing::warn!("received {}, exiting before all entries were applied", signal);
            tracing::info!("stopping add-ip-rules service");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    };

    let code = match result {
        Ok(summary) => {
            tracing::info!("{}", summary.describe(dry_run));
            if !dry_run {
                println!("done!");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            tracing::error!("{}", e.user_message());
            ExitCode::from(e.exit_code())
        }
    };

    tracing::info!("stopping add-ip-rules service");
    code
}

fn apply_config(config: &Config) -> AppResult<ApplySummary> {
    let network = config.read_network_config()?;
    apply_network(config, &network)
}

#[cfg(target_os = "linux")]
fn apply_network(config: &Config, network: &routes::NetworkConfig) -> AppResult<ApplySummary> {
    use apply::dry_run::DryRunBackend;
    use apply::netlink::NetlinkBackend;

    let backend = NetlinkBackend::new()?;

    if config.dry_run {
        Applier::new(DryRunBackend::new(backend, std::io::stdout())).apply(network)
    } else {
        Applier::new(backend).apply(network)
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_network(_config: &Config, _network: &routes::NetworkConfig) -> AppResult<ApplySummary> {
    Err(error::AppError::Netlink(
        "rtnetlink is only available on Linux".to_string(),
    ))
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::warn!("Failed to listen for SIGINT: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}
