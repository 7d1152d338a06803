use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{signal, time};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use greenhouse_client::{
    advisory::AdvisoryClient,
    config::Config,
    control::ControlService,
    dashboard::{Dashboard, DashboardEvent},
    dispatch::{Dispatcher, WorkerPool},
    gateway,
    status::{Classification, StatusReport},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env; variables may also come from the environment
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let gateway = gateway::connect(&config).context("Failed to build hub gateway")?;
    let advisory = AdvisoryClient::from_config(&config).context("Failed to build advisory client")?;
    let pool = WorkerPool::new(config.worker_pool_size);
    let (events, presenter) = Dispatcher::start(log_event);

    let dashboard = Dashboard::new(gateway.clone(), advisory, pool, events);

    dashboard.refresh();
    dashboard.fetch_history(config.history_hours);
    dashboard.start_live_updates();

    if config.automation_enabled {
        let control = ControlService::new(gateway, dashboard.cache().clone(), config.control_interval);
        tokio::spawn(control.run());
    } else {
        info!("Automation disabled; monitoring only");
    }

    shutdown_signal().await;

    dashboard.stop_live_updates();
    drop(dashboard);
    if time::timeout(Duration::from_secs(5), presenter).await.is_err() {
        warn!("Pending operations still running at shutdown");
    }

    Ok(())
}

fn log_event(event: DashboardEvent) {
    match event {
        DashboardEvent::Snapshot { snapshot, report } => {
            let StatusReport { temperature, humidity, activity, active_relays, recommendations } =
                report;
            let advice: Vec<&str> = recommendations.iter().map(|r| r.as_str()).collect();
            let line = format!(
                "{:.1}°C {} | {:.1}% {} | {} ({} relays on) | {}",
                snapshot.temperature,
                temperature,
                snapshot.humidity,
                humidity,
                activity,
                active_relays,
                advice.join(", ")
            );
            if temperature == Classification::Optimal && humidity == Classification::Optimal {
                info!(hub_connected = snapshot.device_connected, "{line}");
            } else {
                warn!(hub_connected = snapshot.device_connected, "{line}");
            }
        }
        DashboardEvent::RelayCommand { relay, desired, outcome } => match outcome {
            Ok(accepted) => info!(relay = %relay, state = desired, accepted, "Relay command finished"),
            Err(e) => warn!(relay = %relay, state = desired, "{}", e.user_message()),
        },
        DashboardEvent::Thresholds(outcome) => match outcome {
            Ok(_) => info!("Threshold update accepted"),
            Err(e) => warn!("{}", e.user_message()),
        },
        DashboardEvent::History(outcome) => match outcome {
            Ok(history) => {
                info!(hours = history.hours, points = history.len(), "History available")
            }
            Err(e) => warn!(error = %e, "History unavailable"),
        },
        DashboardEvent::AdvisoryStarted => info!("Image analysis started"),
        DashboardEvent::AdvisoryFinished(outcome) => match outcome {
            Ok(analysis) => info!(placeholder = analysis.is_placeholder, "{}", analysis.text),
            Err(e) => warn!("{}", e.user_message()),
        },
        DashboardEvent::Error(e) => error!(error = %e, "{}", e.user_message()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
