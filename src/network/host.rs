//! Host radio.
//!
//! On host systems the OS handles networking. This radio pretends to be an
//! access point or station: "starting" as a host reports the machine's
//! local address, and "joining" succeeds for any SSID in the configured
//! scan list, reporting the configured hub address as gateway.

use super::{AccessPoint, IpConfig, NetworkError, NetworkPlan, Radio, Security};
use log::info;
use std::net::{IpAddr, Ipv4Addr};

/// Host radio backed by the OS network stack.
#[derive(Debug, Clone)]
pub struct HostRadio {
    mac: [u8; 6],
    visible: Vec<AccessPoint>,
    gateway: Ipv4Addr,
    host: Option<Ipv4Addr>,
    client: Option<IpConfig>,
}

impl HostRadio {
    /// Create a host radio.
    ///
    /// `visible` is what every scan reports; `gateway` is the hub address
    /// handed out when a station join succeeds.
    pub fn new(mac: Option<[u8; 6]>, visible: Vec<AccessPoint>, gateway: Ipv4Addr) -> Self {
        Self {
            mac: mac.unwrap_or_else(pseudo_mac),
            visible,
            gateway,
            host: None,
            client: None,
        }
    }

    /// Get the primary local IPv4 address.
    ///
    /// This uses a trick: create a UDP socket and "connect" to a public IP
    /// (doesn't actually send anything), then check which local address was chosen.
    fn detect_local_ip() -> Option<Ipv4Addr> {
        use std::net::UdpSocket;

        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    }

    fn local_ip() -> Ipv4Addr {
        Self::detect_local_ip().unwrap_or(Ipv4Addr::LOCALHOST)
    }
}

impl Radio for HostRadio {
    fn hardware_address(&self) -> [u8; 6] {
        self.mac
    }

    fn scan(&mut self) -> Result<Vec<AccessPoint>, NetworkError> {
        Ok(self.visible.clone())
    }

    fn start_host(&mut self, plan: &NetworkPlan) -> Result<(), NetworkError> {
        let ip = Self::local_ip();
        info!("Host radio advertising {} on channel {} at {}", plan.ssid, plan.channel, ip);
        self.client = None;
        self.host = Some(ip);
        Ok(())
    }

    fn host_address(&self) -> Option<Ipv4Addr> {
        self.host
    }

    fn start_client(&mut self, plan: &NetworkPlan) -> Result<(), NetworkError> {
        self.host = None;
        if self.visible.iter().any(|ap| ap.ssid == plan.ssid) {
            let address = Self::local_ip();
            info!("Host radio joined {}, gateway {}", plan.ssid, self.gateway);
            self.client = Some(IpConfig {
                address,
                gateway: self.gateway,
            });
        } else {
            self.client = None;
        }
        Ok(())
    }

    fn client_config(&self) -> Option<IpConfig> {
        self.client
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.host = None;
        self.client = None;
        Ok(())
    }
}

/// Locally administered MAC derived from the process id.
fn pseudo_mac() -> [u8; 6] {
    let pid = std::process::id().to_be_bytes();
    [0x02, 0x00, pid[0], pid[1], pid[2], pid[3]]
}

/// Parse `AA:BB:CC:DD:EE:FF` (case-insensitive).
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.trim().split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

/// Parse a simulated scan list: `ssid:channel:rssi[:secured],...`.
pub fn parse_scan_list(s: &str) -> Result<Vec<AccessPoint>, String> {
    let mut list = Vec::new();
    for (index, item) in s.split(',').map(str::trim).filter(|i| !i.is_empty()).enumerate() {
        let fields: Vec<&str> = item.split(':').collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(format!("bad entry {:?}", item));
        }
        let channel = fields[1]
            .parse()
            .map_err(|_| format!("bad channel in {:?}", item))?;
        let rssi = fields[2]
            .parse()
            .map_err(|_| format!("bad rssi in {:?}", item))?;
        let security = match fields.get(3) {
            Some(&"secured") => Security::Wpa2Personal,
            Some(&"open") | None => Security::Open,
            Some(other) => return Err(format!("bad security {:?}", other)),
        };
        list.push(AccessPoint {
            ssid: fields[0].to_string(),
            bssid: [0x02, 0x00, 0x00, 0x00, 0x00, index as u8],
            channel,
            rssi,
            security,
            hidden: fields[0].is_empty(),
        });
    }
    Ok(list)
}
