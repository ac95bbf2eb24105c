//! TappyBLE echo example
//!
//! Finds the nearest TappyBLE reader, connects, sends the bytes given on the
//! command line and prints everything the reader sends back.
//!
//! Run with: cargo run --example tappy_echo -- 00 01 FF
//!
//! To pick a reader by name and change the chunk size:
//!   cargo run --example tappy_echo -- --name TAPPYBLE-1A2B --packet-size 17 00 01

use std::sync::Arc;
use std::time::Duration;

use tappy_ble::{
    Communicator, CommunicatorConfig, ConnectionState, Error, PhaseTimeouts, Result,
    TappyScanner,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,tappy_ble=debug")
        .init();

    println!("TappyBLE Echo");
    println!("=============\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut target_name = None;
    let mut packet_size = tappy_ble::DEFAULT_PACKET_SIZE;
    let mut payload = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                target_name = args.get(i + 1).cloned();
                i += 1;
            }
            "--packet-size" => {
                let value = args.get(i + 1).cloned().unwrap_or_default();
                packet_size = value.parse().map_err(|_| Error::InvalidParameter {
                    name: "packet-size".to_string(),
                    value,
                })?;
                i += 1;
            }
            byte => {
                payload.push(u8::from_str_radix(byte, 16).map_err(|_| {
                    Error::InvalidParameter {
                        name: "byte".to_string(),
                        value: byte.to_string(),
                    }
                })?);
            }
        }
        i += 1;
    }

    let config = CommunicatorConfig::new()
        .with_packet_size(packet_size)
        .with_timeouts(PhaseTimeouts {
            connect: Some(Duration::from_secs(10)),
            discovery: Some(Duration::from_secs(10)),
            ..PhaseTimeouts::default()
        });
    config.validate()?;

    let scanner = TappyScanner::with_filter(config.advertisement_filter()).await?;
    scanner.start_scanning().await?;

    println!("Scanning for Tappy readers...");
    tokio::time::sleep(Duration::from_secs(5)).await;
    scanner.stop_scanning().await?;

    // Pick the requested reader, or the one with the strongest signal
    let discovered = scanner.discovered();
    let found = match target_name {
        Some(ref name) => discovered
            .values()
            .find(|event| event.advertisement.local_name.as_deref() == Some(name.as_str())),
        None => discovered
            .values()
            .max_by_key(|event| event.advertisement.rssi.unwrap_or(i16::MIN)),
    };

    let Some(found) = found else {
        println!("No Tappy found");
        return Ok(());
    };

    println!(
        "Found {} ({}), RSSI {:?}",
        found.advertisement.local_name.as_deref().unwrap_or("?"),
        found.identifier,
        found.advertisement.rssi
    );

    let comm = Communicator::with_config(Arc::new(scanner.peripheral(found)), config)?;

    comm.set_data_callback(|data| {
        println!("<- {:02X?}", data);
    });
    comm.set_error_callback(|e| {
        eprintln!("!! {}", e);
    });
    let _state_handle = comm.on_state_changed(|state| {
        if state == ConnectionState::Idle {
            println!("Session closed");
        }
    });

    println!("Connecting...");
    comm.connect().await?;
    println!("Connected\n");

    if !payload.is_empty() {
        println!("-> {:02X?}", payload);
        comm.send(&payload).await?;
    }

    println!("Listening for 10 seconds, press Ctrl+C to stop early");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(10)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    comm.disconnect().await?;
    println!("Done");

    Ok(())
}
