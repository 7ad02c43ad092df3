//! # Session Simulator
//!
//! Drives a simulated bill recycler and coin recycler through a short
//! session and prints the resulting views and activity log.
//!
//! ## Usage
//! ```bash
//! # Default run
//! cargo run -p cashlink-session --bin cashlink-sim
//!
//! # Custom config file, JSON output
//! cargo run -p cashlink-session --bin cashlink-sim -- --config ./session.toml --json
//!
//! # More logging
//! RUST_LOG=cashlink=trace cargo run -p cashlink-session --bin cashlink-sim
//! ```

use cashlink_core::{RouteChangeMode, UnitKind};
use cashlink_session::{DenominationRouter, SessionConfig, SessionController, SimulatedDevice};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cashlink=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--json" | "-j" => json = true,
            "--help" | "-h" => {
                println!("Cashlink Session Simulator");
                println!();
                println!("Usage: cashlink-sim [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Session config file (default: platform config dir)");
                println!("  -j, --json           Print unit views as JSON");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    init_tracing();

    let config = SessionConfig::load_or_default(config_path);
    info!(currency = config.currency(), "Starting simulated session");

    let bill = Arc::new(SimulatedDevice::bill_recycler(config.currency()));
    let coin = Arc::new(SimulatedDevice::coin_recycler(config.currency()));
    let controller = SessionController::new(config, bill.clone(), coin.clone())?;
    let router = DenominationRouter::new(controller.clone());

    controller.set_visible(true);
    controller.connect(UnitKind::Bill).await?;
    controller.connect(UnitKind::Coin).await?;
    controller.enable(UnitKind::Bill).await?;

    // a customer inserts two 10s and a 50
    bill.deposit(1000, 2);
    bill.deposit(5000, 1);
    bill.push_status(Some("ACCEPTING"));
    bill.push_status(Some("IDLE"));
    tokio::time::sleep(Duration::from_secs(3)).await;

    // change: one 5 back, then route 50s to payout in edit mode
    if let Err(e) = controller.dispense(UnitKind::Bill, 500).await {
        println!("dispense failed: {e}");
    }
    router
        .toggle_recyclable(UnitKind::Bill, 5000, true, RouteChangeMode::Buffered)
        .await?;
    router.apply_pending_routes(UnitKind::Bill).await?;

    controller.set_active_unit(UnitKind::Coin);
    coin.deposit(200, 2);
    tokio::time::sleep(Duration::from_secs(3)).await;

    for unit in UnitKind::ALL {
        let view = controller.view(unit);
        if json {
            println!("{}", serde_json::to_string_pretty(&view)?);
        } else {
            println!(
                "{:<5} {:?} id={} enabled={} events={} session={} total={} delta={}",
                unit,
                view.phase,
                view.device_id.as_deref().unwrap_or("-"),
                view.enabled,
                view.event_count,
                view.session.session_display(),
                view.session.total_display(),
                view.baseline.delta_display(),
            );
        }
    }

    println!();
    println!("Activity log");
    println!("============");
    for entry in controller.activity_log() {
        println!("{entry}");
    }

    controller.shutdown().await;
    Ok(())
}
