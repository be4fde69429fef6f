//! Console BLE communicator example
//!
//! Scans for a peripheral advertising the Heart Rate service, connects to
//! it, prints every received value and sends one text message once a write
//! channel is available.
//!
//! Run with: cargo run --example ble_console
//!
//! To send a custom message:
//!   cargo run --example ble_console -- --message "Hello Android"
//!
//! To discover every service instead of the Heart Rate profile:
//!   cargo run --example ble_console -- --all

use ble_communicator::{
    BtleplugAdapter, Result, Session, SessionConfig, SessionController, SessionStateKind,
    HEART_RATE_SERVICE,
};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,ble_communicator=debug")
        .init();

    println!("BLE Communicator");
    println!("================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let message = args
        .iter()
        .position(|arg| arg == "--message")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "Hello from Rust".to_string());
    let config = if args.iter().any(|arg| arg == "--all") {
        SessionConfig::capability_based()
    } else {
        SessionConfig::new()
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let adapter = BtleplugAdapter::new(events_tx).await?;
    let session = Session::spawn(SessionController::with_config(adapter, config), events_rx);
    let mut changes = session.subscribe_snapshots();

    // The adapter may still be powering up
    tokio::time::sleep(Duration::from_millis(500)).await;
    session.start_scan()?;
    println!("Scanning for peripherals...\n");

    let mut connect_requested = false;
    let mut attempt_started = false;
    let mut message_sent = false;
    let mut last_status = String::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            change = changes.recv() => {
                let snapshot = match change {
                    Ok(snapshot) => snapshot,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if snapshot.status != last_status {
                    println!("[{}] {}", snapshot.state, snapshot.status);
                    last_status = snapshot.status.clone();
                }

                match snapshot.state {
                    SessionStateKind::Connecting | SessionStateKind::Connected => attempt_started = true,
                    // A failed or dropped link lands back here, scan or no scan
                    SessionStateKind::Idle | SessionStateKind::Scanning if attempt_started => {
                        match &snapshot.last_error {
                            Some(e) => println!("\nConnection ended: {}", e),
                            None => println!("\nConnection ended"),
                        }
                        break;
                    }
                    _ => {}
                }

                if !connect_requested && snapshot.state == SessionStateKind::Scanning {
                    let target = snapshot
                        .peripherals
                        .iter()
                        .find(|p| p.advertises(HEART_RATE_SERVICE))
                        .or_else(|| snapshot.peripherals.first());

                    if let Some(peripheral) = target {
                        println!("\n{}", snapshot.details.get(&peripheral.id).map(String::as_str).unwrap_or(""));
                        session.connect(&peripheral.id)?;
                        connect_requested = true;
                    }
                }

                if snapshot.state == SessionStateKind::Connected && snapshot.can_send && !message_sent {
                    session.send(&message)?;
                    message_sent = true;
                }
            }
        }
    }

    session.shutdown()?;

    // Give the adapter a moment to report the disconnect
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("Final state: {}", session.snapshot().state);

    Ok(())
}
