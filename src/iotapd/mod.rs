use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use bpf_common::{BpfContext, bpf_fs};
use bpf_filtering::{
    BpfTables,
    config::{Config as FilterConfig, FILTERING_CONFIG},
    controller::start_controller,
    initializer::setup_filter,
};
use engine_api::server::{self, EngineAPIContext};
use iotap_core::{Bus, EventCounters};
use nix::unistd::geteuid;
use rw_monitor::monitor::{monitor_task, watch_drops};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::{mpsc, watch},
};

use crate::cli::iotapd::IotapDaemonOpts;

mod config;

pub use config::{DaemonConfig, GENERAL_CONFIG, IotapConfig};

/// Load the configuration file and the `[iotap]` section. Runs before the
/// logger is set up, since the section may name a log file.
pub fn load_config(options: &IotapDaemonOpts) -> Result<(IotapConfig, DaemonConfig)> {
    ensure!(geteuid().is_root(), "You must run this as root user!!!");

    let config = if let Some(custom_file) = &options.config_file {
        IotapConfig::with_custom_file(custom_file)?
    } else {
        IotapConfig::new()?
    };
    let daemon_config = DaemonConfig::try_from(&config.get_module_config(GENERAL_CONFIG))
        .with_context(|| format!("Invalid [{GENERAL_CONFIG}] configuration"))?;
    Ok((config, daemon_config))
}

pub async fn iotap_daemon_run(config: IotapConfig, daemon_config: DaemonConfig) -> Result<()> {
    log::debug!("Configuration loaded from {}", config.config_file().display());
    log::trace!("{daemon_config:?}");

    bpf_fs::check_or_mount_bpf_fs()?;

    bpf_common::bump_memlock_rlimit()?;

    let filter_config = FilterConfig::try_from(&config.get_module_config(FILTERING_CONFIG))
        .with_context(|| format!("Invalid [{FILTERING_CONFIG}] configuration"))?;
    let monitor_config =
        rw_monitor::Config::try_from(&config.get_module_config(rw_monitor::MODULE_NAME))
            .with_context(|| format!("Invalid [{}] configuration", rw_monitor::MODULE_NAME))?;

    let bus = Bus::new();
    let counters = Arc::new(EventCounters::default());

    // Fresh maps suppress everything, records can't flow before setup_filter
    let (tx_events, rx_events) = mpsc::channel(daemon_config.channel_capacity);
    let ctx = BpfContext::new(daemon_config.perf_pages);
    let mut program = rw_monitor::program(ctx, &monitor_config, tx_events)
        .await
        .context("Error loading the probe")?;

    let mut tables = BpfTables::load(&mut program)?;
    setup_filter(&mut tables, &filter_config).context("Error initializing the filters")?;

    watch_drops(
        &mut program,
        daemon_config.drop_poll_interval,
        counters.clone(),
    )
    .await?;

    let (tx_shutdown, rx_shutdown) = watch::channel(());
    let monitor = tokio::spawn(monitor_task(
        rx_events,
        bus.clone(),
        counters.clone(),
        monitor_config,
        rx_shutdown,
    ));

    let probe = start_controller(tables, counters);

    let server_handle = server::run_api_server(
        EngineAPIContext { bus, probe },
        daemon_config.api_socket_path.as_deref(),
    )?;

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sig_int.recv() => log::trace!("SIGINT received"),
        _ = sig_term.recv() => log::trace!("SIGTERM received"),
        _ = sig_hup.recv() => log::trace!("SIGHUP received"),
    }

    log::info!("Terminating the Engine Api Server...");
    server_handle.stop().await;

    log::info!("Terminating iotap Daemon...");
    drop(tx_shutdown);
    if let Err(err) = monitor.await {
        log::warn!("Event monitor didn't terminate cleanly: {err}");
    }
    // Detaches the probes and stops the perf readers
    drop(program);

    Ok(())
}
