//! Trigger unit ("claymore") firmware.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin claymore`
//! - **ESP32**: `cargo espflash flash --bin claymore --features esp32 --release`
//!
//! ## Host runs
//!
//! The door contact is driven from the console (`door open|closed`) and
//! `fire` fires the servo. `CLACK_SCAN` lists the hubs the simulated radio
//! sees, `CLACK_HUB_ADDR` and `CLACK_PEER_PORT` locate the hub's HTTP server.
//!
//! ## Endpoints
//!
//! - `GET /status`, `GET /ping`
//! - `POST /clack`, `GET|POST /fire`

use claymore_clacker::config::{RuntimeConfig, TRIGGER_BASE_NAME};
use claymore_clacker::device::{self, DoorState, TriggerController, TriggerSession};
use claymore_clacker::health::{HealthConfig, HealthMonitor};
use claymore_clacker::http::HttpServer;
use claymore_clacker::indicator::animate;
use claymore_clacker::link::HttpPeerLink;
use claymore_clacker::network::plan::{format_mac, hostname_for};
use claymore_clacker::network::{NetworkRoleManager, Radio, RoleTiming};
use claymore_clacker::platform::{spawn_console, ConsoleCommand, TriggerBoard, HELP_TEXT};
use claymore_clacker::registry::{DeviceRegistry, Role};
use log::{error, info, warn};
use std::cell::RefCell;
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
    use claymore_clacker::config::{RuntimeConfig, TRIGGER_BASE_NAME};
    use claymore_clacker::health::HealthConfig;
    use claymore_clacker::hw::SimLine;
    use claymore_clacker::network::plan::hostname_for;
    use claymore_clacker::network::{HostRadio, Radio};
    use claymore_clacker::platform::host::{self, HostReset, HostWatchdog};
    use claymore_clacker::platform::TriggerBoard;
    use claymore_clacker::registry::{registry_file_name, FileStorage};

    /// Host handle on the simulated door contact.
    pub type Door = Option<SimLine>;

    pub struct Parts {
        pub board: TriggerBoard,
        pub radio: HostRadio,
        pub storage: FileStorage,
        pub door: Door,
    }

    pub fn bring_up(config: &RuntimeConfig) -> Result<Parts, BoxError> {
        let radio = HostRadio::new(config.mac, config.scan.clone(), config.hub_addr);
        let hostname = hostname_for(TRIGGER_BASE_NAME, &radio.hardware_address());
        let storage = FileStorage::new(config.data_dir.join(registry_file_name(&hostname)));
        let (board, door) = host::trigger_board(config.team, config.standalone);
        Ok(Parts {
            board,
            radio,
            storage,
            door: Some(door),
        })
    }

    pub fn supervision(health: &HealthConfig) -> Result<(HostWatchdog, HostReset), BoxError> {
        Ok((HostWatchdog::start(health.watchdog_timeout), HostReset))
    }
}

#[cfg(feature = "esp32")]
mod board {
    use super::BoxError;
    use claymore_clacker::config::RuntimeConfig;
    use claymore_clacker::health::HealthConfig;
    use claymore_clacker::platform::esp::{self, EspRadio, EspReset, EspWatchdog, NvsStorage};
    use claymore_clacker::platform::TriggerBoard;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    /// The real door is read from GPIO; there is nothing to drive.
    pub type Door = ();

    pub struct Parts {
        pub board: TriggerBoard,
        pub radio: EspRadio,
        pub storage: NvsStorage,
        pub door: Door,
    }

    pub fn bring_up(_config: &RuntimeConfig) -> Result<Parts, BoxError> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;
        let board = esp::trigger_board(peripherals.ledc.timer0, peripherals.ledc.channel0)?;
        let radio = EspRadio::new(peripherals.modem, sysloop, nvs.clone())?;
        Ok(Parts {
            board,
            radio,
            storage: NvsStorage::open(nvs)?,
            door: (),
        })
    }

    pub fn supervision(health: &HealthConfig) -> Result<(EspWatchdog, EspReset), BoxError> {
        Ok((EspWatchdog::start(health.watchdog_timeout)?, EspReset))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== Claymore trigger unit starting ===");

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
        error!("Trigger unit stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(cancel: CancellationToken) -> Result<(), BoxError> {
    let config = RuntimeConfig::from_env();
    let board::Parts {
        board,
        radio,
        storage,
        door,
    } = board::bring_up(&config)?;
    let mac = radio.hardware_address();
    let hostname = hostname_for(TRIGGER_BASE_NAME, &mac);
    info!("Trigger unit {} ({})", hostname, format_mac(&mac));

    let mut registry = DeviceRegistry::open(storage, 0)?;
    let indicators = board.indicators();
    let team = device::settle_team(
        &mut registry,
        Role::Trigger,
        &format_mac(&mac),
        board.switch_team(),
        &indicators,
    )?;
    if registry.identity().hostname.as_deref() != Some(hostname.as_str()) {
        registry.update_identity(|id| id.hostname = Some(hostname.clone()))?;
    }

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(spawn_local(animate(indicators.clone(), cancel.clone())));
    device::self_test(&indicators).await;

    let TriggerBoard {
        signal,
        armed,
        servo,
        door: door_line,
        standalone,
        ..
    } = board;
    let trigger = TriggerController::new(Rc::clone(&signal), armed, servo, door_line, standalone, team);
    if trigger.is_standalone() {
        info!("Standalone switch closed");
    }
    tasks.push(spawn_local(Rc::clone(&trigger).watch_door(cancel.clone())));

    match HttpServer::bind(None, config.http_port) {
        Ok(server) => tasks.push(spawn_local(server.serve(Rc::clone(&trigger), cancel.clone()))),
        Err(e) => warn!("HTTP server unavailable: {}", e),
    }

    // The health loop joins the hub, registers and keeps the link alive.
    let health = HealthConfig::default();
    let link = HttpPeerLink::new(config.peer_port, health.call_timeout)?;
    let manager = NetworkRoleManager::new(radio, RoleTiming::default());
    let session = TriggerSession::new(
        manager,
        Rc::new(RefCell::new(registry)),
        link,
        hostname,
        team,
        health.call_timeout,
    );
    let (watchdog, reset) = board::supervision(&health)?;
    let monitor = HealthMonitor::new(session, watchdog, reset, signal, health)?;
    tasks.push(spawn_local(monitor.run(cancel.clone())));

    let (commands, mut console) = mpsc::unbounded_channel();
    spawn_console(commands);
    println!("Type 'help' for commands");

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = console.recv() => command,
        };
        match command {
            Some(ConsoleCommand::Press { .. }) => match trigger.fire() {
                Ok(()) => println!("clack"),
                Err(e) => println!("{}", e),
            },
            Some(ConsoleCommand::Door(state)) => set_door(&door, state),
            Some(ConsoleCommand::Status) => match serde_json::to_string_pretty(&trigger.status()) {
                Ok(doc) => println!("{}", doc),
                Err(e) => warn!("Status encode failed: {}", e),
            },
            Some(ConsoleCommand::Help) => println!("{}", HELP_TEXT),
            Some(ConsoleCommand::Unknown(msg)) if !msg.is_empty() => println!("{}", msg),
            Some(ConsoleCommand::Unknown(_)) => {}
            // Console closed; keep running until cancelled.
            None => cancel.cancelled().await,
        }
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!("Task failed: {}", e);
        }
    }
    info!("Trigger unit stopped");
    Ok(())
}

#[cfg(not(feature = "esp32"))]
fn set_door(door: &board::Door, state: DoorState) {
    if let Some(line) = door {
        line.press(state == DoorState::Closed);
        println!("door {:?}", state);
    }
}

#[cfg(feature = "esp32")]
fn set_door(_door: &board::Door, _state: DoorState) {
    println!("The door is read from its sensor");
}
