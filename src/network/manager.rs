//! Radio role manager.

use super::plan::{NetworkPlan, RadioRole};
use super::scan::ScanReport;
use super::{IpConfig, NetworkError, Radio};
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::sleep;

/// Polls between re-issuing an access point start.
const HOST_RESTART_POLLS: u32 = 40;

/// Poll timing for radio bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTiming {
    /// Delay between "is the access point active" polls.
    pub active_poll: Duration,
    /// Delay between "is the station associated" polls.
    pub association_poll: Duration,
    /// Association polls before giving up.
    pub association_attempts: u32,
}

impl Default for RoleTiming {
    fn default() -> Self {
        Self {
            active_poll: Duration::from_millis(50),
            association_poll: Duration::from_millis(500),
            association_attempts: 10,
        }
    }
}

/// Brings a [`Radio`] up as host or client.
#[derive(Debug)]
pub struct NetworkRoleManager<R> {
    radio: R,
    timing: RoleTiming,
    role: Option<RadioRole>,
}

impl<R: Radio> NetworkRoleManager<R> {
    pub fn new(radio: R, timing: RoleTiming) -> Self {
        Self {
            radio,
            timing,
            role: None,
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn hardware_address(&self) -> [u8; 6] {
        self.radio.hardware_address()
    }

    pub fn role(&self) -> Option<RadioRole> {
        self.role
    }

    /// Scan, order strongest first and recommend a channel.
    ///
    /// With a filter only SSIDs containing every token are returned.
    pub fn scan(&mut self, filter: Option<&[&str]>) -> Result<ScanReport, NetworkError> {
        let visible = self.radio.scan()?;
        let report = ScanReport::new(visible, filter);
        info!(
            "Scan: {} candidates, recommended channel {}",
            report.access_points.len(),
            report.recommended_channel
        );
        for ap in &report.access_points {
            debug!("  {} ch{} {}dBm {:?}", ap.ssid, ap.channel, ap.rssi, ap.security);
        }
        Ok(report)
    }

    /// Bring the radio up as an access point and return its own address.
    ///
    /// Waits until the radio reports active, restarting activation
    /// periodically; it does not give up.
    pub async fn start_as_host(&mut self, plan: &NetworkPlan) -> Result<Ipv4Addr, NetworkError> {
        plan.validate()?;
        if plan.role != RadioRole::Host {
            return Err(NetworkError::Driver("host start with a client plan".into()));
        }

        info!(
            "Starting access point {} on channel {} ({})",
            plan.ssid,
            plan.channel,
            if plan.is_open() { "open" } else { "secured" }
        );
        self.role = Some(RadioRole::Host);
        self.radio.start_host(plan)?;

        let mut polls = 0u32;
        loop {
            if let Some(address) = self.radio.host_address() {
                info!("Access point active at {}", address);
                return Ok(address);
            }
            polls += 1;
            if polls % HOST_RESTART_POLLS == 0 {
                warn!("Access point still inactive after {} polls, restarting", polls);
                self.radio.start_host(plan)?;
            }
            sleep(self.timing.active_poll).await;
        }
    }

    /// Join a network as a station and return own and gateway addresses.
    ///
    /// Fails with [`NetworkError::AssociationTimeout`] after
    /// [`RoleTiming::association_attempts`] polls; callers retry the whole
    /// scan and connect cycle.
    pub async fn connect_as_client(&mut self, plan: &NetworkPlan) -> Result<IpConfig, NetworkError> {
        plan.validate()?;
        if plan.role != RadioRole::Client {
            return Err(NetworkError::Driver("client connect with a host plan".into()));
        }

        info!("Joining {} on channel {}", plan.ssid, plan.channel);
        self.role = Some(RadioRole::Client);
        self.radio.start_client(plan)?;

        for _ in 0..self.timing.association_attempts {
            if let Some(config) = self.radio.client_config() {
                info!("Joined {}: address {}, gateway {}", plan.ssid, config.address, config.gateway);
                return Ok(config);
            }
            sleep(self.timing.association_poll).await;
        }
        if let Some(config) = self.radio.client_config() {
            return Ok(config);
        }

        if let Err(e) = self.radio.disconnect() {
            warn!("Disconnect after failed join: {}", e);
        }
        self.role = None;
        Err(NetworkError::AssociationTimeout {
            ssid: plan.ssid.clone(),
            attempts: self.timing.association_attempts,
        })
    }

    /// Whether the radio is up in its current role.
    pub fn is_associated(&self) -> bool {
        match self.role {
            Some(RadioRole::Host) => self.radio.host_address().is_some(),
            Some(RadioRole::Client) => self.radio.client_config().is_some(),
            None => false,
        }
    }

    pub fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.role = None;
        self.radio.disconnect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeRadio;
    use super::*;
    use crate::network::scan::ap;

    #[tokio::test(start_paused = true)]
    async fn test_start_as_host_waits_for_active() {
        let radio = FakeRadio::with_visible(vec![]);
        radio.state.borrow_mut().polls_until_ready = 3;
        let mut manager = NetworkRoleManager::new(radio.clone(), RoleTiming::default());

        let plan = NetworkPlan::host("clacker_RED_3C", None, 6).unwrap();
        let address = manager.start_as_host(&plan).await.unwrap();
        assert_eq!(address, Ipv4Addr::new(192, 168, 4, 1));
        assert!(manager.is_associated());
        assert_eq!(manager.role(), Some(RadioRole::Host));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_activation_is_restarted() {
        let radio = FakeRadio::with_visible(vec![]);
        radio.state.borrow_mut().polls_until_ready = HOST_RESTART_POLLS + 5;
        let mut manager = NetworkRoleManager::new(radio.clone(), RoleTiming::default());

        let plan = NetworkPlan::host("clacker_RED_3C", None, 6).unwrap();
        manager.start_as_host(&plan).await.unwrap();
        assert_eq!(radio.state.borrow().starts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_as_client() {
        let radio = FakeRadio::with_visible(vec![ap("clacker_RED_EF", 6, -40)]);
        radio.state.borrow_mut().polls_until_ready = 2;
        let mut manager = NetworkRoleManager::new(radio, RoleTiming::default());

        let plan = NetworkPlan::client("clacker_RED_EF", None, 6).unwrap();
        let config = manager.connect_as_client(&plan).await.unwrap();
        assert_eq!(config.gateway, Ipv4Addr::new(192, 168, 4, 1));
        assert!(manager.is_associated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_as_client_times_out() {
        let radio = FakeRadio::with_visible(vec![]);
        let mut manager = NetworkRoleManager::new(radio, RoleTiming::default());

        let started = tokio::time::Instant::now();
        let plan = NetworkPlan::client("clacker_RED_EF", None, 6).unwrap();
        let err = manager.connect_as_client(&plan).await.unwrap_err();
        assert!(matches!(err, NetworkError::AssociationTimeout { attempts: 10, .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(5000));
        assert!(!manager.is_associated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_plan_role_rejected() {
        let mut manager = NetworkRoleManager::new(FakeRadio::default(), RoleTiming::default());
        let plan = NetworkPlan::client("clacker_RED_EF", None, 6).unwrap();
        assert!(manager.start_as_host(&plan).await.is_err());
    }

    #[test]
    fn test_scan_filters() {
        let radio = FakeRadio::with_visible(vec![
            ap("clacker_RED_EF", 1, -60),
            ap("clacker_GREEN_01", 1, -30),
            ap("other", 1, -50),
        ]);
        let mut manager = NetworkRoleManager::new(radio, RoleTiming::default());
        let report = manager.scan(Some(&["clacker", "red"][..])).unwrap();
        assert_eq!(report.access_points.len(), 1);
        assert_eq!(report.recommended_channel, 6);
    }
}
