// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use clap::Parser;
use tokio::time::Duration;

use pressure_monitor::modbus::{
    FieldBusTransport, FieldKind, RegisterMap, RegisterValue, TcpTransport, DEFAULT_BASE_ADDRESS,
};

/// Read the leak-test controller register block once and print every field
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Controller address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Controller Modbus TCP port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Modbus unit identifier
    #[clap(long, default_value = "1")]
    unit_id: u8,

    /// First holding register of the block
    #[clap(long, default_value_t = DEFAULT_BASE_ADDRESS)]
    base_address: u16,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "1000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let map = RegisterMap::new(args.base_address);
    let timeout = Duration::from_millis(args.timeout_ms);

    let mut transport = TcpTransport::new(args.address, args.port, timeout, timeout);
    println!("Connecting to Modbus server at {}", transport.endpoint());
    transport.connect().await?;

    println!(
        "Reading {} holding registers starting at address {}",
        map.block_length(),
        map.base_address()
    );
    let block = transport
        .read_block(args.unit_id, map.base_address(), map.block_length())
        .await?;
    println!("Raw register values: {:?}", block);

    for spec in map.fields() {
        let address = map.address_of(spec.field);
        match map.decode(spec, &block) {
            Ok(RegisterValue::Int(v)) => {
                println!("Register {}: {:?} = {}", address, spec.field, v)
            }
            Ok(RegisterValue::Float(v)) => println!(
                "Registers {}-{}: {:?} = {:.4}",
                address,
                address + FieldKind::Float32.span() - 1,
                spec.field,
                v
            ),
            Err(e) => println!("Register {}: {}", address, e),
        }
    }

    transport.disconnect().await?;
    Ok(())
}
