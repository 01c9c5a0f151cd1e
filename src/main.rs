// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the pressure leak-test monitor

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

use pressure_monitor::config::{self, Config};
use pressure_monitor::daemon::Daemon;
use pressure_monitor::monitor::DeviceController;
use pressure_monitor::persistence::LogQuery;

/// Modbus TCP monitor for a pressure leak-test controller
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Controller address
    #[arg(long)]
    device_address: Option<String>,

    /// Controller Modbus TCP port
    #[arg(long)]
    device_port: Option<u16>,

    /// Modbus unit identifier
    #[arg(long)]
    unit_id: Option<u8>,

    /// Start polling when the daemon is launched
    #[arg(long)]
    autostart: Option<bool>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the monitor until Ctrl-C (default)
    Run,
    /// Read the register block once and print the snapshot as JSON
    Status,
    /// Assert Start and release Stop
    Start,
    /// Assert Stop and release Start
    Stop,
    /// Write the pressure setpoint
    Setpoint {
        /// Setpoint value
        value: f32,
    },
    /// Zero the counters and release Start and Stop
    Reset,
    /// Release Start and Stop and zero the setpoint
    ResetAll,
    /// Browse the error log
    Logs {
        /// Only lines containing this text (case-insensitive)
        #[arg(long)]
        filter: Option<String>,
        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Lines per page
        #[arg(long, default_value_t = pressure_monitor::persistence::DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Oldest entries first
        #[arg(long)]
        asc: bool,
    },
    /// Empty the error log
    ClearLogs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;
    config.apply_args(
        args.device_address.clone(),
        args.device_port,
        args.unit_id,
        args.autostart,
    );

    let command = args.command.unwrap_or(Command::Run);
    let controller = Arc::new(match command {
        // A one-off status read must leave the stored counters and log alone
        Command::Status => DeviceController::observer_from_config(&config),
        _ => DeviceController::from_config(&config),
    });

    match command {
        Command::Run => run_daemon(&config, controller).await,
        Command::Logs {
            filter,
            page,
            page_size,
            asc,
        } => {
            let page = controller.query_logs(&LogQuery {
                filter,
                page,
                page_size,
                ascending: asc,
            })?;
            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }
        Command::ClearLogs => {
            controller.clear_logs()?;
            println!("Error log cleared");
            Ok(())
        }
        command => {
            controller
                .connect()
                .await
                .with_context(|| format!("Failed to reach {}", config.device.address))?;
            let result = run_one_shot(&controller, command).await;
            controller.shutdown().await;
            result
        }
    }
}

async fn run_daemon(config: &Config, controller: Arc<DeviceController>) -> Result<()> {
    info!("Starting in daemon mode");
    let mut daemon = Daemon::new();
    daemon.launch(config, controller).await?;

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }
    daemon.shutdown();
    daemon.join().await
}

async fn run_one_shot(controller: &DeviceController, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            controller.poll_once().await?;
            println!("{}", serde_json::to_string_pretty(&controller.snapshot())?);
        }
        Command::Start => controller.start().await?,
        Command::Stop => controller.stop().await?,
        Command::Setpoint { value } => controller.set_setpoint(value).await?,
        Command::Reset => controller.reset_status().await?,
        Command::ResetAll => controller.reset_all().await?,
        other => anyhow::bail!("{:?} does not run against the device", other),
    }
    Ok(())
}
