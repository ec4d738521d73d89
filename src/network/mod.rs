//! Network role orchestration.
//!
//! The radio is brought up either as an access point (the hub) or as a
//! station joining a hub (trigger units). This module provides the
//! platform-independent pieces:
//!
//! - [`scan`] - access point ordering, filtering and channel selection
//! - [`plan`] - validated radio configuration and device naming
//! - [`manager`] - [`NetworkRoleManager`] driving a [`Radio`] implementation
//! - [`host`] - a [`Radio`] backed by the host OS (no real radio)
//!
//! The ESP32 radio lives in `platform::esp`.
//!
//! # Example
//!
//! ```ignore
//! let mut manager = NetworkRoleManager::new(HostRadio::from_env(), RoleTiming::default());
//! let report = manager.scan(Some(&["clacker", "RED"][..]))?;
//! let plan = NetworkPlan::host("clacker_RED_EF", None, report.recommended_channel)?;
//! let address = manager.start_as_host(&plan).await?;
//! ```

use std::fmt;
use std::net::Ipv4Addr;

pub mod host;
mod manager;
pub mod plan;
pub mod scan;

pub use host::HostRadio;
pub use manager::{NetworkRoleManager, RoleTiming};
pub use plan::{NetworkPlan, PlanError, RadioRole};
pub use scan::{best_channel, ScanReport};

#[cfg(test)]
pub(crate) use manager::test_support;

/// Link-layer security of an access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    #[default]
    Open,
    Wpa2Personal,
}

impl Security {
    pub fn is_open(self) -> bool {
        self == Security::Open
    }
}

/// One access point seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub channel: u8,
    /// Signal strength in dBm.
    pub rssi: i8,
    pub security: Security,
    pub hidden: bool,
}

/// Addresses obtained after joining a network as a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpConfig {
    pub address: Ipv4Addr,
    /// Presumed to be the hub.
    pub gateway: Ipv4Addr,
}

/// Radio driver abstraction.
///
/// Activation and association are asynchronous on real hardware: the
/// `start_*` calls only begin the operation, and the manager polls
/// [`Radio::host_address`] / [`Radio::client_config`] until they report
/// success.
pub trait Radio {
    /// Factory MAC address of the station interface.
    fn hardware_address(&self) -> [u8; 6];

    /// Scan for visible access points (blocking on hardware).
    fn scan(&mut self) -> Result<Vec<AccessPoint>, NetworkError>;

    /// Begin bringing the radio up as an access point.
    fn start_host(&mut self, plan: &NetworkPlan) -> Result<(), NetworkError>;

    /// Own address once the access point is active.
    fn host_address(&self) -> Option<Ipv4Addr>;

    /// Begin joining the network described by `plan`.
    fn start_client(&mut self, plan: &NetworkPlan) -> Result<(), NetworkError>;

    /// Addresses once associated and configured.
    fn client_config(&self) -> Option<IpConfig>;

    /// Leave the current network and stop the radio.
    fn disconnect(&mut self) -> Result<(), NetworkError>;
}

/// Network errors.
#[derive(Debug)]
pub enum NetworkError {
    /// The plan failed validation.
    InvalidPlan(PlanError),
    /// No visible network matched the filter.
    NoCandidates { filter: String },
    /// The station did not associate within the retry budget.
    AssociationTimeout { ssid: String, attempts: u32 },
    /// Radio driver failure.
    Driver(String),
    /// Generic I/O error.
    Io(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPlan(e) => write!(f, "invalid network plan: {}", e),
            Self::NoCandidates { filter } => write!(f, "no network matching '{}'", filter),
            Self::AssociationTimeout { ssid, attempts } => {
                write!(f, "no association with {} after {} polls", ssid, attempts)
            }
            Self::Driver(msg) => write!(f, "radio error: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPlan(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<PlanError> for NetworkError {
    fn from(e: PlanError) -> Self {
        Self::InvalidPlan(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for NetworkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Driver(format!("ESP error: {:?}", e))
    }
}
