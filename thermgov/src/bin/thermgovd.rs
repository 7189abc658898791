//! Thermal governor daemon.
//!
//! Reads its settings from the environment (see [`DaemonConfig`]), starts
//! the control loop and the HTTP API, and runs until SIGINT or SIGTERM.
//! The CPU frequency ceiling is handed back before exiting.

use anyhow::Result;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use thermgov::api::{self, SharedState};
use thermgov::backend::{Backend, BackendKind, sim::SimHandle, sysfs};
use thermgov::config::DaemonConfig;
use thermgov::thermal::{Governor, Poller};
use thermgov::tracing::{self, prelude::*};

const SIM_CORES: usize = 4;

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = DaemonConfig::from_env()?;
    let thermal = config.load_thermal_config()?;
    info!(
        backend = %config.backend,
        sensor_id = thermal.sensor_id,
        poll_ms = thermal.poll_ms,
        shutdown_temp_c = thermal.shutdown_temp_c,
        "Starting thermgovd"
    );

    let backend = match config.backend {
        BackendKind::Sysfs => sysfs::backend(&config.sysfs_root, config.shutdown_grace)?,
        BackendKind::Sim => sim_backend(),
    };

    let governor = Governor::new(thermal, backend)?;
    let (poller, handle) = Poller::new(governor);

    let shutdown = CancellationToken::new();
    let poller_task = tokio::spawn(poller.run(shutdown.clone()));
    let api_task = tokio::spawn(api::serve(
        config.api_addr,
        SharedState::new(handle),
        shutdown.clone(),
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    shutdown.cancel();

    match api_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API task panicked"),
    }
    if let Err(e) = poller_task.await {
        error!(error = %e, "Governor task panicked");
    }

    info!("thermgovd stopped");
    Ok(())
}

fn sim_backend() -> Backend {
    warn!(cores = SIM_CORES, "Using simulated hardware");
    SimHandle::new(SIM_CORES).backend()
}
