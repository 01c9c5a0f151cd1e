// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::time::{self, Duration};

use pressure_monitor::modbus::simulator::serve;
use pressure_monitor::modbus::{
    PressureCellSimulation, RegisterBank, RegisterMap, DEFAULT_BASE_ADDRESS,
};

/// Simulated leak-test controller served over Modbus TCP
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Port to bind
    #[clap(long, default_value = "5020")]
    port: u16,

    /// First holding register of the block
    #[clap(long, default_value_t = DEFAULT_BASE_ADDRESS)]
    base_address: u16,

    /// Process model tick in milliseconds
    #[clap(long, default_value = "100")]
    tick_ms: u64,

    /// Every Nth cycle ends with a leak (0 disables failures)
    #[clap(long, default_value = "4")]
    fail_every: u32,

    /// Ticks spent holding pressure before the verdict
    #[clap(long, default_value = "10")]
    hold_ticks: u32,

    /// Peak pressure noise amplitude
    #[clap(long, default_value = "0.01", value_parser = parse_noise)]
    noise: f32,
}

/// Largest accepted noise amplitude
const MAX_NOISE: f32 = 1000.0;

fn parse_noise(arg: &str) -> Result<f32, String> {
    let noise: f32 = arg.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=MAX_NOISE).contains(&noise) {
        Ok(noise)
    } else {
        Err(format!("noise must be between 0 and {MAX_NOISE}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let map = RegisterMap::checked(args.base_address).with_context(|| {
        format!(
            "Register block starting at {} runs past the end of the address space",
            args.base_address
        )
    })?;
    let bank = RegisterBank::for_map(&map);

    let mut cell = PressureCellSimulation::new(map, bank.clone());
    cell.fail_every = args.fail_every;
    cell.hold_ticks = args.hold_ticks;
    cell.noise = args.noise;

    let bind = format!("{}:{}", args.address, args.port);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    let tick = Duration::from_millis(args.tick_ms.max(1));
    tokio::spawn(async move {
        let mut ticker = time::interval(tick);
        loop {
            ticker.tick().await;
            cell.step();
        }
    });

    tokio::select! {
        result = serve(listener, bank) => result.context("Modbus server stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal, stopping simulator"),
    }
    Ok(())
}
