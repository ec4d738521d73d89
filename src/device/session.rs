//! The trigger unit's link to its hub.
//!
//! A reconnect is the whole cycle: pick a hub from a fresh scan, join it,
//! register, and persist what was learned. The health loop drives it through
//! [`LinkSupervisor`].

use crate::config::HUB_BASE_NAME;
use crate::health::{LinkSupervisor, ReconnectError};
use crate::indicator::Color;
use crate::link::{LinkError, PeerLink, RegisterOutcome};
use crate::network::plan::derived_password;
use crate::network::{AccessPoint, NetworkError, NetworkPlan, NetworkRoleManager, Radio};
use crate::registry::{DeviceRegistry, HubLink, Registration, RegistryEntry, Storage};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::future::Future;
use std::io;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::timeout;
use zeroize::Zeroizing;

/// Session state of a trigger unit.
pub struct TriggerSession<R, S: Storage, P> {
    manager: NetworkRoleManager<R>,
    registry: Rc<RefCell<DeviceRegistry<S>>>,
    link: P,
    mac: String,
    hostname: String,
    team: Color,
    call_timeout: Duration,
    hub: Option<Ipv4Addr>,
}

impl<R, S, P> TriggerSession<R, S, P>
where
    R: Radio,
    S: Storage,
    P: PeerLink,
{
    pub fn new(
        manager: NetworkRoleManager<R>,
        registry: Rc<RefCell<DeviceRegistry<S>>>,
        link: P,
        hostname: impl Into<String>,
        team: Color,
        call_timeout: Duration,
    ) -> Self {
        let mac = crate::network::plan::format_mac(&manager.hardware_address());
        Self {
            manager,
            registry,
            link,
            mac,
            hostname: hostname.into(),
            team,
            call_timeout,
            hub: None,
        }
    }

    /// Address of the hub currently joined.
    pub fn hub(&self) -> Option<Ipv4Addr> {
        self.hub
    }

    pub fn manager(&self) -> &NetworkRoleManager<R> {
        &self.manager
    }

    /// Hubs to try, strongest first.
    ///
    /// Only hubs of our team are considered. A cached hub that is still
    /// visible is the only candidate; one that has vanished is forgotten.
    pub fn select_hubs(&mut self) -> Result<Vec<AccessPoint>, ReconnectError> {
        let team = self.team.as_str();
        let filter = [HUB_BASE_NAME, team];
        let report = self.manager.scan(Some(&filter[..]))?;

        let cached = self.registry.borrow().hub_link().map(|link| link.ssid.clone());
        if let Some(ssid) = cached {
            if let Some(ap) = report.find(&ssid) {
                info!("Cached hub {} is visible", ap.ssid);
                return Ok(vec![ap.clone()]);
            }
            warn!("Cached hub {} is not visible, forgetting it", ssid);
            self.registry.borrow_mut().set_hub_link(None)?;
        }

        if report.access_points.is_empty() {
            return Err(NetworkError::NoCandidates {
                filter: filter.join(" "),
            }
            .into());
        }
        Ok(report.access_points)
    }

    /// Join the first candidate that lets us in. Returns own address and
    /// the hub's.
    async fn join(&mut self, candidates: &[AccessPoint]) -> Result<(Ipv4Addr, Ipv4Addr), ReconnectError> {
        let mut last_error = None;
        for ap in candidates {
            let password = if ap.security.is_open() {
                None
            } else {
                let cached = self
                    .registry
                    .borrow()
                    .hub_link()
                    .filter(|link| link.ssid == ap.ssid)
                    .and_then(|link| link.password.clone());
                Some(cached.unwrap_or_else(|| Zeroizing::new(derived_password(&ap.ssid))))
            };

            let secret = password.as_ref().map(|p| p.as_str());
            let plan = match NetworkPlan::client(ap.ssid.clone(), secret, ap.channel) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!("Skipping {}: {}", ap.ssid, e);
                    last_error = Some(NetworkError::from(e));
                    continue;
                }
            };

            match self.manager.connect_as_client(&plan).await {
                Ok(ip) => {
                    let link = HubLink {
                        ssid: ap.ssid.clone(),
                        password,
                        secured: !ap.security.is_open(),
                        ip: Some(ip.gateway),
                    };
                    let mut registry = self.registry.borrow_mut();
                    registry.set_hub_link(Some(link))?;
                    if registry.identity().ip != Some(ip.address) {
                        registry.update_identity(|id| id.ip = Some(ip.address))?;
                    }
                    return Ok((ip.address, ip.gateway));
                }
                Err(e) => {
                    warn!("Could not join {}: {}", ap.ssid, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or(NetworkError::NoCandidates {
                filter: String::new(),
            })
            .into())
    }

    /// GET, then POST (or PUT when already known), then GET again.
    async fn register(&self, hub: Ipv4Addr, own: Ipv4Addr) -> Result<RegistryEntry, ReconnectError> {
        let registration = Registration {
            team: Some(self.team),
            network_address: Some(own),
            hostname: Some(self.hostname.clone()),
        };

        match self.call(self.link.fetch_registration(hub, &self.mac)).await? {
            Some(entry) => debug!("Hub knows us in slot {}", entry.slot_index),
            None => debug!("Hub does not know us yet"),
        }

        match self.call(self.link.register(hub, &self.mac, &registration)).await? {
            RegisterOutcome::Created(entry) => info!("Registered in slot {}", entry.slot_index),
            RegisterOutcome::Exists => {
                let entry = self
                    .call(self.link.update_registration(hub, &self.mac, &registration))
                    .await?;
                info!("Registration refreshed in slot {}", entry.slot_index);
            }
            RegisterOutcome::Full => {
                warn!("Hub {} has no free slot", hub);
                return Err(ReconnectError::Rejected);
            }
        }

        self.call(self.link.fetch_registration(hub, &self.mac))
            .await?
            .ok_or_else(|| {
                ReconnectError::Link(LinkError::UnexpectedReply(
                    "registration missing after register".into(),
                ))
            })
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T, LinkError>>) -> Result<T, LinkError> {
        timeout(self.call_timeout, fut).await?
    }
}

impl<R, S, P> LinkSupervisor for TriggerSession<R, S, P>
where
    R: Radio,
    S: Storage,
    P: PeerLink,
{
    fn is_associated(&self) -> bool {
        self.hub.is_some() && self.manager.is_associated()
    }

    async fn reconnect(&mut self) -> Result<Option<u8>, ReconnectError> {
        self.hub = None;
        if self.manager.role().is_some() {
            if let Err(e) = self.manager.disconnect() {
                debug!("Disconnect before rejoin: {}", e);
            }
        }

        let candidates = self.select_hubs()?;
        let (own, hub) = self.join(&candidates).await?;
        let entry = self.register(hub, own).await?;
        self.hub = Some(hub);
        info!("Linked to hub {} as #{}", hub, entry.assigned_id);
        Ok(Some(entry.assigned_id))
    }

    async fn ping(&mut self) -> Result<(), LinkError> {
        let hub = self
            .hub
            .ok_or_else(|| LinkError::Io(io::Error::from(io::ErrorKind::NotConnected)))?;
        self.call(self.link.ping(hub)).await
    }
}
