//! Hub ("clacker") firmware.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin clacker`
//! - **ESP32**: `cargo espflash flash --bin clacker --features esp32 --release`
//!
//! ## Host runs
//!
//! The buttons are driven from the console (type `help`). `CLACK_HTTP_PORT`,
//! `CLACK_PEER_PORT`, `CLACK_DNS_PORT`, `CLACK_DATA_DIR`, `CLACK_MAC` and
//! `CLACK_TEAM` select ports, storage and identity of the simulated board.
//!
//! ## Endpoints
//!
//! - `GET /status`, `GET /ping`
//! - `GET|POST|PUT|DELETE /register/<mac>`

use claymore_clacker::captive::CaptivePortal;
use claymore_clacker::config::{RuntimeConfig, HUB_BASE_NAME, MAX_TRIGGER_UNITS};
use claymore_clacker::device::{self, boot_wipe_requested, HubButton, HubController, RESET_CLICKS};
use claymore_clacker::gesture::{ButtonWatcher, GestureConfig};
use claymore_clacker::health::HealthConfig;
use claymore_clacker::http::HttpServer;
use claymore_clacker::indicator::{animate, Mode};
use claymore_clacker::link::HttpPeerLink;
use claymore_clacker::network::plan::{format_mac, hostname_for};
use claymore_clacker::network::{NetworkRoleManager, Radio, RoleTiming};
use claymore_clacker::platform::{spawn_console, ConsoleCommand, HubBoard, HELP_TEXT};
use claymore_clacker::registry::{DeviceRegistry, Role, Storage};
use log::{error, info, warn};
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::task::{spawn_local, JoinHandle, LocalSet};
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error>;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(not(feature = "esp32"))]
mod board {
    use super::BoxError;
    use claymore_clacker::config::{RuntimeConfig, HUB_BASE_NAME};
    use claymore_clacker::network::plan::hostname_for;
    use claymore_clacker::network::{HostRadio, Radio};
    use claymore_clacker::platform::host::{self, HostReset};
    use claymore_clacker::platform::HubBoard;
    use claymore_clacker::registry::{registry_file_name, FileStorage};

    pub type Reset = HostReset;

    pub fn bring_up(config: &RuntimeConfig) -> Result<(HubBoard, HostRadio, FileStorage), BoxError> {
        let radio = HostRadio::new(config.mac, config.scan.clone(), config.hub_addr);
        let hostname = hostname_for(HUB_BASE_NAME, &radio.hardware_address());
        let storage = FileStorage::new(config.data_dir.join(registry_file_name(&hostname)));
        Ok((host::hub_board(config.team), radio, storage))
    }
}

#[cfg(feature = "esp32")]
mod board {
    use super::BoxError;
    use claymore_clacker::config::RuntimeConfig;
    use claymore_clacker::platform::esp::{self, EspRadio, EspReset, NvsStorage};
    use claymore_clacker::platform::HubBoard;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    pub type Reset = EspReset;

    pub fn bring_up(_config: &RuntimeConfig) -> Result<(HubBoard, EspRadio, NvsStorage), BoxError> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;
        let board = esp::hub_board()?;
        let radio = EspRadio::new(peripherals.modem, sysloop, nvs.clone())?;
        Ok((board, radio, NvsStorage::open(nvs)?))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== Clacker hub starting ===");

    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host");

    let cancel = CancellationToken::new();

    #[cfg(not(feature = "esp32"))]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
                cancel.cancel();
            }
        });
    }

    let local = LocalSet::new();
    if let Err(e) = local.run_until(run(cancel)).await {
        error!("Hub stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(cancel: CancellationToken) -> Result<(), BoxError> {
    let config = RuntimeConfig::from_env();
    let (board, radio, mut storage) = board::bring_up(&config)?;
    let mac = radio.hardware_address();
    let hostname = hostname_for(HUB_BASE_NAME, &mac);
    info!("Hub {} ({})", hostname, format_mac(&mac));

    if let Some(last) = board.last_slot_button() {
        if boot_wipe_requested(&board.fire_button, &last) {
            warn!("Fire and slot {} held at boot: wiping registry", MAX_TRIGGER_UNITS);
            storage.remove()?;
        }
    }

    let mut registry = DeviceRegistry::open(storage, MAX_TRIGGER_UNITS)?;
    let indicators = board.indicators();
    let team = device::settle_team(
        &mut registry,
        Role::Hub,
        &format_mac(&mac),
        board.switch_team(),
        &indicators,
    )?;

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(spawn_local(animate(indicators.clone(), cancel.clone())));
    device::self_test(&indicators).await;

    // Bring up the access point on the quietest channel group.
    let mut manager = NetworkRoleManager::new(radio, RoleTiming::default());
    let Some((ssid, address)) =
        device::bring_up_access_point(&mut manager, team, &cancel).await
    else {
        info!("Hub stopped before the access point came up");
        return Ok(());
    };
    registry.update_identity(|id| {
        id.hostname = Some(hostname.clone());
        id.ssid = Some(ssid.clone());
        id.ip = Some(address);
    })?;
    board.status_led.borrow_mut().set_mode(Mode::On);
    info!("Hub {} up at http://{}:{}/", ssid, address, config.http_port);

    let health = HealthConfig::default();
    let link = HttpPeerLink::new(config.peer_port, health.call_timeout)?;
    let HubBoard {
        status_led,
        slot_leds,
        slot_buttons,
        fire_button,
        ..
    } = board;
    let hub = HubController::new(
        registry,
        status_led,
        slot_leds,
        link,
        board::Reset::default(),
        health.call_timeout,
    );

    let (events, gestures) = mpsc::unbounded_channel();
    for (slot, button) in slot_buttons.iter().enumerate() {
        let watcher = ButtonWatcher::new(HubButton::Slot(slot), Rc::clone(button), GestureConfig::default());
        tasks.push(spawn_local(watcher.run(events.clone(), cancel.clone())));
    }
    if let Some(last) = slot_buttons.last() {
        let reset = ButtonWatcher::new(
            HubButton::Slot(slot_buttons.len() - 1),
            Rc::clone(last),
            GestureConfig::with_click_target(RESET_CLICKS),
        );
        tasks.push(spawn_local(reset.run(events.clone(), cancel.clone())));
    }
    let fire = ButtonWatcher::new(HubButton::Fire, fire_button, GestureConfig::default());
    tasks.push(spawn_local(fire.run(events.clone(), cancel.clone())));
    tasks.push(spawn_local(Rc::clone(&hub).run(gestures, cancel.clone())));

    match HttpServer::bind(None, config.http_port) {
        Ok(server) => tasks.push(spawn_local(server.serve(Rc::clone(&hub), cancel.clone()))),
        Err(e) => warn!("HTTP server unavailable: {}", e),
    }
    tasks.push(spawn_local(
        CaptivePortal::new(address, config.dns_port).run(cancel.clone()),
    ));

    let (commands, mut console) = mpsc::unbounded_channel();
    spawn_console(commands);
    println!("Type 'help' for commands");

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = console.recv() => command,
        };
        match command {
            Some(ConsoleCommand::Press { button, gesture }) => {
                if events.send((button, gesture)).is_err() {
                    warn!("Gesture dispatcher is gone");
                }
            }
            Some(ConsoleCommand::Status) => match serde_json::to_string_pretty(&hub.status()) {
                Ok(doc) => println!("{}", doc),
                Err(e) => warn!("Status encode failed: {}", e),
            },
            Some(ConsoleCommand::Door(_)) => println!("The hub has no door sensor"),
            Some(ConsoleCommand::Help) => println!("{}", HELP_TEXT),
            Some(ConsoleCommand::Unknown(msg)) if !msg.is_empty() => println!("{}", msg),
            Some(ConsoleCommand::Unknown(_)) => {}
            // Console closed; keep serving until cancelled.
            None => cancel.cancelled().await,
        }
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!("Task failed: {}", e);
        }
    }
    if let Err(e) = manager.disconnect() {
        warn!("Radio shutdown failed: {}", e);
    }
    info!("Hub stopped");
    Ok(())
}
