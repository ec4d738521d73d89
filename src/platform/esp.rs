//! ESP32 drivers.
//!
//! GPIO lines, the LEDC servo, the WiFi radio, the task watchdog and NVS
//! storage, each implementing the matching platform-independent trait.

use super::{HubBoard, TriggerBoard};
use crate::config::{hub_pins, trigger_pins, SERVO_FREQ_HZ};
use crate::health::{SystemReset, Watchdog};
use crate::hw::{Actuator, InputLine, OutputLine};
use crate::indicator::{shared, Color, DualColorIndicator, SharedIndicator};
use crate::network::{AccessPoint, IpConfig, NetworkError, NetworkPlan, Radio, Security};
use crate::registry::Storage;
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_hal::ledc::config::TimerConfig;
use esp_idf_hal::ledc::{LedcDriver, LedcTimerDriver, Resolution, CHANNEL0, TIMER0};
use esp_idf_hal::modem::Modem;
use esp_idf_hal::units::FromValueType;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
    EspWifi,
};
use esp_idf_sys::EspError;
use log::{error, info, warn};
use std::io;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

/// NVS namespace holding the registry document.
const NVS_NAMESPACE: &str = "clack";

/// NVS key of the registry document.
const REGISTRY_KEY: &str = "registry";

/// Largest registry document read back from NVS.
const MAX_DOCUMENT: usize = 4096;

/// Stations an access point accepts; one per trigger unit plus a phone.
const AP_MAX_CONNECTIONS: u16 = 5;

// ==== GPIO ====

/// Push-pull output pin.
pub struct EspOutput(PinDriver<'static, AnyOutputPin, Output>);

impl EspOutput {
    pub fn new(gpio: i32) -> Result<Self, EspError> {
        // SAFETY: each GPIO number is claimed once, from the board tables.
        let pin = unsafe { AnyOutputPin::new(gpio) };
        let mut driver = PinDriver::output(pin)?;
        driver.set_low()?;
        Ok(Self(driver))
    }
}

impl OutputLine for EspOutput {
    fn set_level(&mut self, high: bool) {
        let result = if high {
            self.0.set_high()
        } else {
            self.0.set_low()
        };
        if let Err(e) = result {
            warn!("GPIO {} write failed: {:?}", self.0.pin(), e);
        }
    }
}

/// Input pin with the internal pull-up enabled.
pub struct EspInput(PinDriver<'static, AnyIOPin, Input>);

impl EspInput {
    pub fn new(gpio: i32) -> Result<Self, EspError> {
        // SAFETY: see `EspOutput::new`.
        let pin = unsafe { AnyIOPin::new(gpio) };
        let mut driver = PinDriver::input(pin)?;
        driver.set_pull(Pull::Up)?;
        Ok(Self(driver))
    }
}

impl InputLine for EspInput {
    fn is_high(&self) -> bool {
        self.0.is_high()
    }
}

fn indicator((red, green): (i32, i32), team: Color) -> Result<SharedIndicator, EspError> {
    Ok(shared(DualColorIndicator::new(
        EspOutput::new(red)?,
        EspOutput::new(green)?,
        team,
    )))
}

// ==== Servo ====

/// Hobby servo on LEDC channel 0 at 50 Hz.
pub struct EspServo(LedcDriver<'static>);

impl EspServo {
    pub fn new(timer: TIMER0, channel: CHANNEL0, gpio: i32) -> Result<Self, EspError> {
        let timer = LedcTimerDriver::new(
            timer,
            &TimerConfig::new()
                .frequency(SERVO_FREQ_HZ.Hz().into())
                .resolution(Resolution::Bits14),
        )?;
        // SAFETY: see `EspOutput::new`.
        let pin = unsafe { AnyOutputPin::new(gpio) };
        Ok(Self(LedcDriver::new(channel, timer, pin)?))
    }
}

impl Actuator for EspServo {
    fn set_duty_u16(&mut self, duty: u16) {
        let max = self.0.get_max_duty();
        let scaled = (u64::from(duty) * u64::from(max) / u64::from(u16::MAX)) as u32;
        if let Err(e) = self.0.set_duty(scaled) {
            warn!("Servo duty {} failed: {:?}", duty, e);
        }
    }
}

// ==== Boards ====

/// The hub's GPIO lines. The team colour is read before the LEDs are lit.
pub fn hub_board() -> Result<HubBoard, EspError> {
    let team_switch = EspInput::new(hub_pins::TEAM_SWITCH)?;
    let team = Color::from_switch(team_switch.is_high());

    let slot_leds = hub_pins::SLOT_LEDS
        .iter()
        .map(|&pins| indicator(pins, team))
        .collect::<Result<Vec<_>, _>>()?;
    let slot_buttons = hub_pins::SLOT_BUTTONS
        .iter()
        .map(|&gpio| EspInput::new(gpio).map(|input| Rc::new(input) as Rc<dyn InputLine>))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HubBoard {
        status_led: indicator((hub_pins::STATUS_RED, hub_pins::STATUS_GREEN), team)?,
        slot_leds,
        slot_buttons,
        fire_button: Rc::new(EspInput::new(hub_pins::FIRE_BUTTON)?),
        team_switch: Box::new(team_switch),
    })
}

/// The trigger unit's GPIO lines and servo.
pub fn trigger_board(timer: TIMER0, channel: CHANNEL0) -> Result<TriggerBoard, EspError> {
    let team_switch = EspInput::new(trigger_pins::TEAM_SWITCH)?;
    let team = Color::from_switch(team_switch.is_high());

    Ok(TriggerBoard {
        signal: indicator((trigger_pins::SIGNAL_RED, trigger_pins::SIGNAL_GREEN), team)?,
        armed: indicator((trigger_pins::ARMED_RED, trigger_pins::ARMED_GREEN), team)?,
        servo: Box::new(EspServo::new(timer, channel, trigger_pins::SERVO)?),
        door: Box::new(EspInput::new(trigger_pins::DOOR_SENSOR)?),
        standalone: Box::new(EspInput::new(trigger_pins::STANDALONE_SWITCH)?),
        team_switch: Box::new(team_switch),
    })
}

// ==== WiFi ====

/// WiFi driver in either access point or station mode.
pub struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
    mac: [u8; 6],
}

impl EspRadio {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self, EspError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
        let mac = esp_wifi.sta_netif().get_mac()?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self { wifi, mac })
    }

    /// Scanning needs a started station interface.
    fn ensure_station(&mut self) -> Result<(), EspError> {
        if !self.wifi.is_started()? {
            self.wifi
                .set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
            self.wifi.start()?;
        }
        Ok(())
    }

    fn auth_method(plan: &NetworkPlan) -> AuthMethod {
        match plan.security {
            Security::Open => AuthMethod::None,
            Security::Wpa2Personal => AuthMethod::WPA2Personal,
        }
    }

    fn restart_with(&mut self, config: &Configuration) -> Result<(), NetworkError> {
        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.wifi.set_configuration(config)?;
        self.wifi.start()?;
        Ok(())
    }
}

impl Radio for EspRadio {
    fn hardware_address(&self) -> [u8; 6] {
        self.mac
    }

    fn scan(&mut self) -> Result<Vec<AccessPoint>, NetworkError> {
        self.ensure_station()?;
        let found = self.wifi.scan()?;
        Ok(found
            .into_iter()
            .map(|ap| AccessPoint {
                hidden: ap.ssid.is_empty(),
                ssid: ap.ssid.to_string(),
                bssid: ap.bssid,
                channel: ap.channel,
                rssi: ap.signal_strength,
                security: match ap.auth_method {
                    None | Some(AuthMethod::None) => Security::Open,
                    Some(_) => Security::Wpa2Personal,
                },
            })
            .collect())
    }

    fn start_host(&mut self, plan: &NetworkPlan) -> Result<(), NetworkError> {
        info!("Starting access point {} on channel {}", plan.ssid, plan.channel);
        let config = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: plan
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| NetworkError::Driver("SSID does not fit".into()))?,
            password: plan
                .password()
                .unwrap_or("")
                .try_into()
                .map_err(|_| NetworkError::Driver("password does not fit".into()))?,
            auth_method: Self::auth_method(plan),
            channel: plan.channel,
            max_connections: AP_MAX_CONNECTIONS,
            ..Default::default()
        });
        self.restart_with(&config)
    }

    fn host_address(&self) -> Option<Ipv4Addr> {
        let netif = self.wifi.wifi().ap_netif();
        match netif.is_up() {
            Ok(true) => netif.get_ip_info().ok().map(|info| info.ip),
            _ => None,
        }
    }

    fn start_client(&mut self, plan: &NetworkPlan) -> Result<(), NetworkError> {
        info!("Joining {} on channel {}", plan.ssid, plan.channel);
        let config = Configuration::Client(ClientConfiguration {
            ssid: plan
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| NetworkError::Driver("SSID does not fit".into()))?,
            password: plan
                .password()
                .unwrap_or("")
                .try_into()
                .map_err(|_| NetworkError::Driver("password does not fit".into()))?,
            auth_method: Self::auth_method(plan),
            channel: Some(plan.channel),
            ..Default::default()
        });
        self.restart_with(&config)?;
        // Non-blocking: the manager polls `client_config` for the outcome.
        self.wifi.wifi_mut().connect()?;
        Ok(())
    }

    fn client_config(&self) -> Option<IpConfig> {
        let wifi = self.wifi.wifi();
        if !wifi.is_connected().unwrap_or(false) || !wifi.sta_netif().is_up().unwrap_or(false) {
            return None;
        }
        let info = wifi.sta_netif().get_ip_info().ok()?;
        if info.ip.is_unspecified() {
            return None;
        }
        Some(IpConfig {
            address: info.ip,
            gateway: info.subnet.gateway,
        })
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        if self.wifi.is_connected()? {
            self.wifi.disconnect()?;
        }
        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        Ok(())
    }
}

// ==== Watchdog and reset ====

/// Task watchdog subscription of the runtime thread.
pub struct EspWatchdog;

impl EspWatchdog {
    /// Configure the task watchdog and subscribe the calling task.
    pub fn start(timeout: Duration) -> Result<Self, EspError> {
        let config = esp_idf_sys::esp_task_wdt_config_t {
            timeout_ms: timeout.as_millis() as u32,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        // ESP-IDF may already have started it from sdkconfig.
        let rc = unsafe { esp_idf_sys::esp_task_wdt_init(&config) };
        if rc == esp_idf_sys::ESP_ERR_INVALID_STATE {
            esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_task_wdt_reconfigure(&config) })?;
        } else {
            esp_idf_sys::esp!(rc)?;
        }
        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_task_wdt_add(core::ptr::null_mut()) })?;
        info!("Task watchdog armed ({:?})", timeout);
        Ok(Self)
    }
}

impl Watchdog for EspWatchdog {
    fn feed(&mut self) {
        let _ = unsafe { esp_idf_sys::esp_task_wdt_reset() };
    }
}

/// Software reset of the chip.
#[derive(Debug, Default)]
pub struct EspReset;

impl SystemReset for EspReset {
    fn reset(&mut self, reason: &str) -> ! {
        error!("Resetting: {}", reason);
        esp_idf_hal::reset::restart()
    }
}

// ==== NVS ====

/// Registry document stored as one NVS blob.
pub struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStorage {
    pub fn open(partition: EspDefaultNvsPartition) -> Result<Self, EspError> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }
}

fn nvs_error(e: EspError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("NVS: {:?}", e))
}

impl Storage for NvsStorage {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_DOCUMENT];
        let found = self.nvs.get_raw(REGISTRY_KEY, &mut buf).map_err(nvs_error)?;
        Ok(found.map(<[u8]>::to_vec))
    }

    fn store(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.len() > MAX_DOCUMENT {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("document of {} bytes exceeds {}", bytes.len(), MAX_DOCUMENT),
            ));
        }
        self.nvs.set_raw(REGISTRY_KEY, bytes).map_err(nvs_error)?;

        // Read back to catch silent flash write failures.
        let mut verify = vec![0u8; MAX_DOCUMENT];
        match self.nvs.get_raw(REGISTRY_KEY, &mut verify).map_err(nvs_error)? {
            Some(read) if read == bytes => Ok(()),
            Some(_) => {
                error!("Registry verification failed: data mismatch after save");
                Err(io::Error::new(io::ErrorKind::InvalidData, "NVS read-back mismatch"))
            }
            None => {
                error!("Registry not found after save");
                Err(io::Error::new(io::ErrorKind::NotFound, "NVS read-back missing"))
            }
        }
    }

    fn remove(&mut self) -> io::Result<()> {
        self.nvs.remove(REGISTRY_KEY).map_err(nvs_error)?;
        Ok(())
    }
}
