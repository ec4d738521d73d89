//! Radio configuration and device naming.
//!
//! # Example
//!
//! ```
//! use claymore_clacker::network::{NetworkPlan, RadioRole};
//! use claymore_clacker::network::plan::{derived_password, hub_ssid};
//! use claymore_clacker::indicator::Color;
//!
//! let ssid = hub_ssid(Color::Red, &[0x24, 0x0a, 0xc4, 0x12, 0x34, 0xef]);
//! assert_eq!(ssid, "clacker_RED_EF");
//! assert_eq!(derived_password(&ssid), "clacker_RED");
//!
//! let plan = NetworkPlan::host(ssid, None, 6).unwrap();
//! assert_eq!(plan.role, RadioRole::Host);
//! assert!(plan.is_open());
//! ```

use super::Security;
use crate::config::HUB_BASE_NAME;
use crate::indicator::Color;
use std::fmt;
use zeroize::Zeroizing;

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum password length for WPA2.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Which side of the link the radio plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioRole {
    /// Access point other devices join.
    Host,
    /// Station joining a host.
    Client,
}

/// Everything needed to bring the radio up in one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub role: RadioRole,
    pub ssid: String,
    /// `None` means an open network.
    pub password: Option<Zeroizing<String>>,
    pub channel: u8,
    pub security: Security,
}

impl NetworkPlan {
    /// Access point plan. No password means an open network.
    pub fn host(
        ssid: impl Into<String>,
        password: Option<&str>,
        channel: u8,
    ) -> Result<Self, PlanError> {
        Self::build(RadioRole::Host, ssid.into(), password, channel)
    }

    /// Station plan for joining `ssid` on `channel`.
    pub fn client(
        ssid: impl Into<String>,
        password: Option<&str>,
        channel: u8,
    ) -> Result<Self, PlanError> {
        Self::build(RadioRole::Client, ssid.into(), password, channel)
    }

    fn build(
        role: RadioRole,
        ssid: String,
        password: Option<&str>,
        channel: u8,
    ) -> Result<Self, PlanError> {
        let password = password
            .filter(|p| !p.is_empty())
            .map(|p| Zeroizing::new(p.to_string()));
        let security = if password.is_some() {
            Security::Wpa2Personal
        } else {
            Security::Open
        };
        let plan = Self {
            role,
            ssid,
            password,
            channel,
            security,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Validate against 802.11 limits.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.ssid.is_empty() {
            return Err(PlanError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(PlanError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        if let Some(password) = &self.password {
            if password.len() < MIN_PASSWORD_LEN {
                return Err(PlanError::PasswordTooShort {
                    len: password.len(),
                    min: MIN_PASSWORD_LEN,
                });
            }
            if password.len() > MAX_PASSWORD_LEN {
                return Err(PlanError::PasswordTooLong {
                    len: password.len(),
                    max: MAX_PASSWORD_LEN,
                });
            }
        }

        if !(1..=14).contains(&self.channel) {
            return Err(PlanError::InvalidChannel(self.channel));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.password.is_none()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().map(String::as_str)
    }
}

/// Plan validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Channel outside 1..=14.
    InvalidChannel(u8),
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::InvalidChannel(channel) => write!(f, "invalid channel: {}", channel),
        }
    }
}

impl std::error::Error for PlanError {}

/// `AA:BB:CC:DD:EE:FF`
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Last two hex digits of a MAC address.
pub fn mac_suffix(mac: &[u8; 6]) -> String {
    format!("{:02X}", mac[5])
}

/// `<base>_<last two hex digits>`, e.g. `claymore_3C`.
pub fn hostname_for(base: &str, mac: &[u8; 6]) -> String {
    format!("{}_{}", base, mac_suffix(mac))
}

/// SSID a hub advertises for `team`, e.g. `clacker_RED_EF`.
pub fn hub_ssid(team: Color, mac: &[u8; 6]) -> String {
    format!("{}_{}_{}", HUB_BASE_NAME, team, mac_suffix(mac))
}

/// Password convention for secured hubs: the SSID without its last three
/// characters.
pub fn derived_password(ssid: &str) -> String {
    let keep = ssid.chars().count().saturating_sub(3);
    ssid.chars().take(keep).collect()
}
