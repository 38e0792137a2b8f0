pub mod channel;
pub mod config;
pub mod console;
pub mod controller;
pub mod dispatch;
pub mod lifecycle;
pub mod scheduler;
pub mod session;

use crate::config::ClientConfig;
use crate::controller::gamepad::{GamepadBackend, GilrsBackend, NoGamepads};
use crate::controller::keyboard;
use crate::session::{ControllerSession, SessionIo};
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

// gilrs handles are not Send, so the session runs on this thread
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let config = ClientConfig::load_or_default()
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    info!("Dispatch mode: {}", config.dispatch.tick_mode());

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Ctrl-C received");
        ctrl_c.cancel();
    });

    let channel = channel::mqtt::connect(&config.broker)
        .map_err(|e| eyre!("Failed to connect to broker: {}", e))?;

    let pads: Box<dyn GamepadBackend> = match GilrsBackend::new() {
        Ok(backend) => Box::new(backend),
        Err(e) => {
            warn!("Gamepads unavailable: {}", e);
            Box::new(NoGamepads)
        }
    };

    let (key_tx, key_rx) = mpsc::channel(256);
    if let Err(e) = keyboard::spawn_key_feed(&config.keyboard, key_tx) {
        warn!("Keyboard unavailable: {}", e);
    }

    let (command_tx, command_rx) = mpsc::channel(16);
    let _console = console::spawn_console(command_tx, config.dispatch.refresh_hz);

    let io = SessionIo::new(
        channel,
        pads,
        key_rx,
        command_rx,
        shutdown,
        &config.polling,
    );
    let session = ControllerSession::create(
        io,
        config.broker.client_id.clone(),
        config.polling.clone(),
        config.dispatch.tick_mode(),
    );
    let reason = session::run_sessions(session).await;
    info!("Exiting ({:?})", reason);

    // let the transport flush a final shutdown request
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
