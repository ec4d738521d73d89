//! Board constants and runtime configuration.
//!
//! Pin numbers are ESP32 GPIO numbers. All buttons and switches are wired
//! to ground with internal pull-ups, so a pressed button reads low.

use crate::indicator::Color;
use crate::network::host::{parse_mac, parse_scan_list};
use crate::network::AccessPoint;
use crate::registry::default_data_dir;
use log::warn;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Base name of the hub ("clacker").
pub const HUB_BASE_NAME: &str = "clacker";

/// Base name of a trigger unit ("claymore").
pub const TRIGGER_BASE_NAME: &str = "claymore";

/// Number of trigger units one hub can pair with.
pub const MAX_TRIGGER_UNITS: usize = 4;

/// HTTP port served by both boards.
pub const HTTP_PORT: u16 = 80;

/// DNS port answered by the hub's captive portal.
pub const DNS_PORT: u16 = 53;

/// Subnet mask of the hub's access point.
pub const AP_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// How long a slot LED shows a peer's door state.
pub const STATUS_DISPLAY: Duration = Duration::from_millis(3500);

/// How long a lit slot LED stays on after a status press clears it.
pub const CLACK_DISPLAY: Duration = Duration::from_millis(4500);

/// The trigger returns to ready this long after firing.
pub const TRIGGER_RESET: Duration = Duration::from_millis(3500);

/// Door sensor poll period on trigger units.
pub const DOOR_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Each step of the power-on LED test.
pub const SELF_TEST_STEP: Duration = Duration::from_secs(1);

/// Servo PWM frequency.
pub const SERVO_FREQ_HZ: u32 = 50;

/// Servo duty limits on a 16-bit scale.
pub const SERVO_MIN: u16 = 1400;
pub const SERVO_MAX: u16 = 8400;

/// Servo position that releases the trigger.
pub const SERVO_FIRE: u16 = SERVO_MIN;

/// Servo resting position.
pub const SERVO_READY: u16 = SERVO_MAX;

/// Hub board pins.
pub mod hub_pins {
    pub const STATUS_RED: i32 = 25;
    pub const STATUS_GREEN: i32 = 26;
    /// `(red, green)` per slot LED.
    pub const SLOT_LEDS: [(i32, i32); 4] = [(32, 33), (27, 14), (12, 13), (15, 2)];
    pub const SLOT_BUTTONS: [i32; 4] = [4, 16, 17, 5];
    pub const FIRE_BUTTON: i32 = 18;
    /// Low selects team A (red).
    pub const TEAM_SWITCH: i32 = 19;
}

/// Trigger unit pins.
pub mod trigger_pins {
    pub const SIGNAL_RED: i32 = 13;
    pub const SIGNAL_GREEN: i32 = 14;
    pub const ARMED_RED: i32 = 16;
    pub const ARMED_GREEN: i32 = 19;
    /// Low selects standalone (access point) mode.
    pub const STANDALONE_SWITCH: i32 = 23;
    /// Low selects team A (red).
    pub const TEAM_SWITCH: i32 = 18;
    /// Low when the door is closed.
    pub const DOOR_SENSOR: i32 = 21;
    pub const SERVO: i32 = 22;
}

/// Settings for host runs, read from `CLACK_*` environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory holding the registry file (`CLACK_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Port this device serves HTTP on (`CLACK_HTTP_PORT`).
    pub http_port: u16,
    /// Port peers serve HTTP on (`CLACK_PEER_PORT`).
    pub peer_port: u16,
    /// Captive portal DNS port (`CLACK_DNS_PORT`).
    pub dns_port: u16,
    /// Gateway reported by the host radio after joining (`CLACK_HUB_ADDR`).
    pub hub_addr: Ipv4Addr,
    /// Simulated MAC address (`CLACK_MAC`).
    pub mac: Option<[u8; 6]>,
    /// Simulated scan results (`CLACK_SCAN`, `ssid:channel:rssi,...`).
    pub scan: Vec<AccessPoint>,
    /// Position of the simulated team switch (`CLACK_TEAM`).
    pub team: Color,
    /// Position of the simulated standalone switch (`CLACK_STANDALONE`).
    pub standalone: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().unwrap_or_else(|_| PathBuf::from(".claymore-clacker")),
            http_port: HTTP_PORT,
            peer_port: HTTP_PORT,
            dns_port: DNS_PORT,
            hub_addr: Ipv4Addr::LOCALHOST,
            mac: None,
            scan: Vec::new(),
            team: Color::Red,
            standalone: false,
        }
    }
}

impl RuntimeConfig {
    /// Read the environment, keeping defaults for unset or invalid values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("CLACK_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        parse_var(&lookup, "CLACK_HTTP_PORT", &mut config.http_port);
        parse_var(&lookup, "CLACK_PEER_PORT", &mut config.peer_port);
        parse_var(&lookup, "CLACK_DNS_PORT", &mut config.dns_port);
        parse_var(&lookup, "CLACK_HUB_ADDR", &mut config.hub_addr);
        parse_var(&lookup, "CLACK_TEAM", &mut config.team);
        parse_var(&lookup, "CLACK_STANDALONE", &mut config.standalone);

        if let Some(raw) = lookup("CLACK_MAC") {
            match parse_mac(&raw) {
                Some(mac) => config.mac = Some(mac),
                None => warn!("Ignoring CLACK_MAC={:?}: expected AA:BB:CC:DD:EE:FF", raw),
            }
        }
        if let Some(raw) = lookup("CLACK_SCAN") {
            match parse_scan_list(&raw) {
                Ok(list) => config.scan = list,
                Err(e) => warn!("Ignoring CLACK_SCAN: {}", e),
            }
        }
        config
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(e) => warn!("Ignoring {}={:?}: {}", key, raw, e),
        }
    }
}
