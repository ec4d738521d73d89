//! Hub (base) controller.
//!
//! Maps slot and fire button gestures to calls on the registered trigger
//! units, renders the results on the slot indicators, and serves the
//! registration routes the trigger units call.
//!
//! # Gestures
//!
//! | Button          | Gesture        | Action                                        |
//! |-----------------|----------------|-----------------------------------------------|
//! | slot `i`        | single         | status check of unit `i`                      |
//! | slot `i`        | double         | ping, then toggle the slot LED Blink / Off    |
//! | slot `i`        | long           | ping, then toggle the slot LED Alternate / Off|
//! | fire            | single         | status check of every unit                    |
//! | fire            | double / long  | clack every unit whose LED is Alternate       |
//! | last slot       | 5 clicks       | wipe the registry and reset                   |

use super::DoorState;
use crate::config::{CLACK_DISPLAY, STATUS_DISPLAY};
use crate::gesture::Gesture;
use crate::health::SystemReset;
use crate::http::{register_target, HttpMethod, Reply, Routes};
use crate::hw::InputLine;
use crate::indicator::{Color, Mode, SharedIndicator};
use crate::link::{LinkError, PeerLink};
use crate::network::plan::hub_ssid;
use crate::network::{NetworkError, NetworkPlan, NetworkRoleManager, Radio};
use crate::registry::{DeviceRegistry, Registration, RegistryEntry, RegistryError, Storage};
use crate::timer::ResetTimer;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::cell::{Ref, RefCell};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Clicks on the last slot button that wipe the registry.
pub const RESET_CLICKS: u8 = 5;

/// First delay between access point bring-up attempts.
const BRING_UP_BACKOFF: Duration = Duration::from_millis(500);
/// Longest delay between access point bring-up attempts.
const BRING_UP_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// A physical button on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubButton {
    Fire,
    Slot(usize),
}

/// Fire and last-slot buttons both held while booting.
pub fn boot_wipe_requested(fire: &impl InputLine, last_slot: &impl InputLine) -> bool {
    fire.is_pressed() && last_slot.is_pressed()
}

/// `GET /status` document of the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStatus {
    pub team: Color,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
    pub status: String,
    pub slots: Vec<SlotStatus>,
}

/// One slot in [`HubStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub slot: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u8>,
    pub led: String,
}

/// The hub's dispatcher.
pub struct HubController<S: Storage, P, R> {
    registry: RefCell<DeviceRegistry<S>>,
    status_led: SharedIndicator,
    slot_leds: Vec<SharedIndicator>,
    timers: RefCell<Vec<ResetTimer>>,
    link: P,
    reset: RefCell<R>,
    call_timeout: Duration,
}

impl<S, P, R> HubController<S, P, R>
where
    S: Storage + 'static,
    P: PeerLink + 'static,
    R: SystemReset + 'static,
{
    /// One slot LED per registry slot.
    pub fn new(
        registry: DeviceRegistry<S>,
        status_led: SharedIndicator,
        slot_leds: Vec<SharedIndicator>,
        link: P,
        reset: R,
        call_timeout: Duration,
    ) -> Rc<Self> {
        if slot_leds.len() != registry.capacity() {
            warn!(
                "{} slot LEDs for {} registry slots",
                slot_leds.len(),
                registry.capacity()
            );
        }
        let timers = slot_leds.iter().map(|_| ResetTimer::new()).collect();
        Rc::new(Self {
            registry: RefCell::new(registry),
            status_led,
            slot_leds,
            timers: RefCell::new(timers),
            link,
            reset: RefCell::new(reset),
            call_timeout,
        })
    }

    pub fn registry(&self) -> Ref<'_, DeviceRegistry<S>> {
        self.registry.borrow()
    }

    pub fn slot_led(&self, slot: usize) -> Option<&SharedIndicator> {
        self.slot_leds.get(slot)
    }

    pub fn team(&self) -> Color {
        self.registry.borrow().identity().team.unwrap_or_default()
    }

    /// Dispatch gestures until cancelled. Each gesture runs as its own task
    /// so a slow unit never holds up the buttons.
    pub async fn run(
        self: Rc<Self>,
        mut events: UnboundedReceiver<(HubButton, Gesture)>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some((button, gesture)) = event else {
                break;
            };
            tokio::task::spawn_local(Rc::clone(&self).handle_gesture(button, gesture));
        }
        for timer in self.timers.borrow_mut().iter_mut() {
            timer.cancel();
        }
        debug!("Hub dispatcher stopped");
    }

    /// Carry out the action bound to `gesture` on `button`.
    pub async fn handle_gesture(self: Rc<Self>, button: HubButton, gesture: Gesture) {
        info!("{:?} {:?}", button, gesture);
        match (button, gesture) {
            (HubButton::Fire, Gesture::SinglePress) => self.check_all().await,
            (HubButton::Fire, Gesture::DoublePress | Gesture::LongPress) => self.fire_armed().await,
            (HubButton::Slot(slot), Gesture::SinglePress) => self.check_slot(slot).await,
            (HubButton::Slot(slot), Gesture::DoublePress) => self.ping_toggle(slot, Mode::Blink).await,
            (HubButton::Slot(slot), Gesture::LongPress) => self.ping_toggle(slot, Mode::Alternate).await,
            (HubButton::Slot(slot), Gesture::MultiPress(RESET_CLICKS))
                if slot + 1 == self.slot_leds.len() =>
            {
                self.wipe_and_reset()
            }
            (button, gesture) => debug!("No action for {:?} {:?}", button, gesture),
        }
    }

    /// Address of the unit registered in `slot`.
    fn unit_address(&self, slot: usize) -> Option<Ipv4Addr> {
        self.registry
            .borrow()
            .slot(slot)
            .and_then(|entry| entry.network_address)
    }

    /// Status check of every registered unit, concurrently.
    async fn check_all(self: Rc<Self>) {
        let tasks: Vec<_> = (0..self.slot_leds.len())
            .filter(|&slot| self.unit_address(slot).is_some())
            .map(|slot| tokio::task::spawn_local(Rc::clone(&self).check_slot(slot)))
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Status task failed: {}", e);
            }
        }
    }

    /// Show the door state of one unit, or turn a lit slot LED off.
    async fn check_slot(self: Rc<Self>, slot: usize) {
        let (Some(address), Some(led)) = (self.unit_address(slot), self.slot_leds.get(slot)) else {
            debug!("Slot {} has no unit", slot);
            return;
        };

        if led.borrow().mode() != Mode::Off {
            debug!("Slot {} LED busy ({}), clearing later", slot, led.borrow().get_state().label());
            self.clear_later(slot, CLACK_DISPLAY);
            return;
        }

        match self.call(self.link.status(address)).await {
            Ok(status) => {
                let color = match status.door {
                    DoorState::Open => Color::Red,
                    DoorState::Closed => Color::Green,
                };
                info!("Slot {} door {:?}", slot, status.door);
                {
                    let mut led = led.borrow_mut();
                    led.set_primary_color(color);
                    led.set_mode(Mode::On);
                }
                self.clear_later(slot, STATUS_DISPLAY);
            }
            Err(e) => self.unit_failed(slot, "status", &e),
        }
    }

    /// Ping a unit and toggle its slot LED between `mode` and Off.
    async fn ping_toggle(self: Rc<Self>, slot: usize, mode: Mode) {
        let (Some(address), Some(led)) = (self.unit_address(slot), self.slot_leds.get(slot)) else {
            debug!("Slot {} has no unit", slot);
            return;
        };
        self.cancel_clear(slot);

        match self.call(self.link.ping(address)).await {
            Ok(()) => {
                let team = self.team();
                let mut led = led.borrow_mut();
                led.set_primary_color(team);
                if led.mode() == mode {
                    led.set_mode(Mode::Off);
                } else {
                    led.set_mode(mode);
                }
                debug!("Slot {} LED {}", slot, led.get_state().label());
            }
            Err(e) => self.unit_failed(slot, "ping", &e),
        }
    }

    /// Clack every unit whose slot LED shows Alternate.
    async fn fire_armed(self: Rc<Self>) {
        let armed: Vec<(usize, Ipv4Addr)> = self
            .slot_leds
            .iter()
            .enumerate()
            .filter(|(_, led)| led.borrow().mode() == Mode::Alternate)
            .filter_map(|(slot, _)| self.unit_address(slot).map(|address| (slot, address)))
            .collect();
        if armed.is_empty() {
            info!("No slot selected");
            return;
        }

        let tasks: Vec<_> = armed
            .into_iter()
            .map(|(slot, address)| {
                let this = Rc::clone(&self);
                tokio::task::spawn_local(async move {
                    match this.call(this.link.fire(address)).await {
                        Ok(()) => info!("Slot {} clacked", slot),
                        Err(e) => warn!("Slot {} clack failed: {}", slot, e),
                    }
                    this.cancel_clear(slot);
                    this.slot_leds[slot].borrow_mut().set_mode(Mode::Off);
                })
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Clack task failed: {}", e);
            }
        }
    }

    fn wipe_and_reset(&self) {
        warn!("Reset gesture: wiping registry");
        if let Err(e) = self.registry.borrow_mut().wipe() {
            error!("Registry wipe failed: {}", e);
        }
        self.reset.borrow_mut().reset("registry wiped by reset gesture");
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, LinkError>>,
    ) -> Result<T, LinkError> {
        timeout(self.call_timeout, fut).await?
    }

    fn unit_failed(&self, slot: usize, what: &str, e: &LinkError) {
        warn!("Slot {} {} failed: {}", slot, what, e);
        self.cancel_clear(slot);
        if let Some(led) = self.slot_leds.get(slot) {
            led.borrow_mut().set_mode(Mode::Off);
        }
    }

    /// Turn the slot LED off after `delay`, back in the team colour.
    fn clear_later(&self, slot: usize, delay: Duration) {
        let Some(led) = self.slot_leds.get(slot) else {
            return;
        };
        let led = Rc::clone(led);
        let team = self.team();
        if let Some(timer) = self.timers.borrow_mut().get_mut(slot) {
            timer.schedule(delay, move || {
                let mut led = led.borrow_mut();
                led.set_mode(Mode::Off);
                led.set_primary_color(team);
            });
        }
    }

    fn cancel_clear(&self, slot: usize) {
        if let Some(timer) = self.timers.borrow_mut().get_mut(slot) {
            timer.cancel();
        }
    }

    /// Snapshot for `GET /status`.
    pub fn status(&self) -> HubStatus {
        let registry = self.registry.borrow();
        let identity = registry.identity();
        let slots = self
            .slot_leds
            .iter()
            .enumerate()
            .map(|(slot, led)| {
                let entry = registry.slot(slot);
                SlotStatus {
                    slot,
                    mac: entry.map(|e| e.hardware_address.clone()),
                    ip: entry.and_then(|e| e.network_address),
                    id: entry.map(|e| e.assigned_id),
                    led: led.borrow().get_state().label(),
                }
            })
            .collect();
        HubStatus {
            team: identity.team.unwrap_or_default(),
            ssid: identity.ssid.clone(),
            ip: identity.ip,
            status: self.status_led.borrow().get_state().label(),
            slots,
        }
    }

    fn register(&self, method: &HttpMethod, mac: &str, body: &[u8]) -> Reply {
        let registration = || parse_registration(body);
        let result: Result<RegistryEntry, Reply> = match method {
            HttpMethod::Get => {
                return match self.registry.borrow().get(mac) {
                    Some(entry) => Reply::json(200, entry),
                    None => registry_error(RegistryError::NotFound),
                }
            }
            HttpMethod::Post => registration().and_then(|r| {
                self.registry
                    .borrow_mut()
                    .create(mac, &r)
                    .map_err(registry_error)
            }),
            HttpMethod::Put => registration().and_then(|r| {
                self.registry
                    .borrow_mut()
                    .update(mac, &r)
                    .map_err(registry_error)
            }),
            HttpMethod::Delete => {
                return match self.registry.borrow_mut().delete(mac) {
                    Ok(_) => Reply::message(200, "successfully deleted"),
                    Err(e) => registry_error(e),
                }
            }
            _ => return Reply::method_not_allowed(),
        };
        match result {
            Ok(entry) => Reply::json(200, &entry),
            Err(reply) => reply,
        }
    }
}

impl<S, P, R> Routes for HubController<S, P, R>
where
    S: Storage + 'static,
    P: PeerLink + 'static,
    R: SystemReset + 'static,
{
    fn handle(&self, method: &HttpMethod, path: &str, body: &[u8]) -> Reply {
        if let Some(mac) = register_target(path) {
            return self.register(method, mac, body);
        }
        match (method, path) {
            (HttpMethod::Get, "/") => Reply::redirect("/status"),
            (HttpMethod::Get, "/ping") => Reply::text(200, "pong"),
            (HttpMethod::Get, "/status") => Reply::json(200, &self.status()),
            (_, "/" | "/ping" | "/status") => Reply::method_not_allowed(),
            _ => Reply::not_found(),
        }
    }
}

/// Registration body; an empty body registers with defaults.
fn parse_registration(body: &[u8]) -> Result<Registration, Reply> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Registration::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| Reply::message(400, &format!("invalid registration: {}", e)))
}

/// Scan, then start the team's access point on the quietest channel group.
///
/// Radio failures are retried with a growing delay for as long as it takes.
/// Returns the SSID and own address, or `None` once cancelled.
pub async fn bring_up_access_point<R: Radio>(
    manager: &mut NetworkRoleManager<R>,
    team: Color,
    cancel: &CancellationToken,
) -> Option<(String, Ipv4Addr)> {
    let ssid = hub_ssid(team, &manager.hardware_address());
    let mut backoff = BRING_UP_BACKOFF;
    let mut attempt = 1u32;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = start_access_point(manager, &ssid) => result,
        };
        match result {
            Ok(address) => return Some((ssid, address)),
            Err(e) => warn!(
                "Access point {} bring-up failed (attempt {}): {}, retrying in {:?}",
                ssid, attempt, e, backoff
            ),
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(BRING_UP_BACKOFF_MAX);
        attempt += 1;
    }
}

async fn start_access_point<R: Radio>(
    manager: &mut NetworkRoleManager<R>,
    ssid: &str,
) -> Result<Ipv4Addr, NetworkError> {
    let report = manager.scan(None)?;
    let plan = NetworkPlan::host(ssid, None, report.recommended_channel)?;
    manager.start_as_host(&plan).await
}

fn registry_error(e: RegistryError) -> Reply {
    if e.status_code() >= 500 {
        error!("Registry request failed: {}", e);
    }
    Reply::message(e.status_code(), &e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::sim_indicator;
    use crate::health::test_support::PanicReset;
    use crate::hw::SimLine;
    use crate::link::test_support::FakeLink;
    use crate::network::scan::ap;
    use crate::network::test_support::FakeRadio;
    use crate::network::RoleTiming;
    use crate::registry::test_support::MemoryStorage;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    type Hub = HubController<MemoryStorage, FakeLink, PanicReset>;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn unit(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 4, 16 + n)
    }

    fn hub(link: &FakeLink) -> Rc<Hub> {
        let mut registry = DeviceRegistry::open(MemoryStorage::default(), 4).unwrap();
        registry
            .update_identity(|id| {
                id.team = Some(Color::Red);
                id.ssid = Some("clacker_RED_EF".into());
            })
            .unwrap();
        let (status, _, _) = sim_indicator("status", Color::Red);
        let slots = (0..4).map(|_| sim_indicator("slot", Color::Red).0).collect();
        HubController::new(
            registry,
            status,
            slots,
            link.clone(),
            PanicReset,
            Duration::from_secs(2),
        )
    }

    fn post(hub: &Hub, mac: &str, body: &str) -> Reply {
        hub.handle(&HttpMethod::Post, &format!("/register/{}", mac), body.as_bytes())
    }

    fn pair(hub: &Hub, n: u8) {
        let body = format!(r#"{{"ip":"{}"}}"#, unit(n));
        let reply = post(hub, &format!("AA:00:00:00:00:0{}", n), &body);
        assert_eq!(reply.status, 200);
    }

    fn mode(hub: &Hub, slot: usize) -> Mode {
        hub.slot_led(slot).unwrap().borrow().mode()
    }

    // ==== Route Tests ====

    #[test]
    fn test_register_delete_reregister() {
        let link = FakeLink::new(4);
        let hub = hub(&link);

        let reply = post(&hub, MAC, r#"{"team":"RED","ip":"192.168.4.16","url":"http://x"}"#);
        assert_eq!(reply.status, 200);
        let entry: RegistryEntry = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(entry.slot_index, 0);
        assert_eq!(entry.assigned_id, 1);

        let again = post(&hub, MAC, r#"{"team":"RED"}"#);
        assert_eq!(again.status, 403);
        assert!(again.body.contains("message"));

        let path = format!("/register/{}", MAC.to_lowercase());
        let deleted = hub.handle(&HttpMethod::Delete, &path, b"");
        assert_eq!(deleted.status, 200);

        let reply = post(&hub, MAC, r#"{"team":"RED"}"#);
        assert_eq!(reply.status, 200);
        let entry: RegistryEntry = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(entry.slot_index, 0);
    }

    #[test]
    fn test_register_errors() {
        let link = FakeLink::new(4);
        let hub = hub(&link);
        let path = format!("/register/{}", MAC);

        assert_eq!(hub.handle(&HttpMethod::Get, &path, b"").status, 404);
        assert_eq!(hub.handle(&HttpMethod::Put, &path, b"{}").status, 404);
        assert_eq!(hub.handle(&HttpMethod::Delete, &path, b"").status, 404);
        assert_eq!(post(&hub, MAC, "not json").status, 400);
        assert_eq!(hub.handle(&HttpMethod::Patch, &path, b"").status, 405);

        for n in 0..4 {
            pair(&hub, n);
        }
        let full = post(&hub, MAC, "");
        assert_eq!(full.status, 405);
        assert!(full.body.contains("Maximum number of devices reached"));
    }

    #[test]
    fn test_update_keeps_slot_and_hub_team() {
        let link = FakeLink::new(4);
        let hub = hub(&link);
        pair(&hub, 0);
        pair(&hub, 1);

        let path = "/register/aa:00:00:00:00:01";
        let reply = hub.handle(&HttpMethod::Put, path, br#"{"team":"GREEN","ip":"10.0.0.9"}"#);
        assert_eq!(reply.status, 200);
        let entry: RegistryEntry = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(entry.slot_index, 1);
        assert_eq!(entry.team, Color::Red);
        assert_eq!(entry.network_address, Some(Ipv4Addr::new(10, 0, 0, 9)));

        let fetched = hub.handle(&HttpMethod::Get, path, b"");
        assert_eq!(fetched.body, reply.body);
    }

    #[test]
    fn test_ping_status_and_unknown_routes() {
        let link = FakeLink::new(4);
        let hub = hub(&link);
        pair(&hub, 2);

        let pong = hub.handle(&HttpMethod::Get, "/ping", b"");
        assert_eq!((pong.status, pong.body.as_str()), (200, "pong"));

        let status = hub.handle(&HttpMethod::Get, "/status", b"");
        let doc: serde_json::Value = serde_json::from_str(&status.body).unwrap();
        assert_eq!(doc["team"], "RED");
        assert_eq!(doc["ssid"], "clacker_RED_EF");
        assert_eq!(doc["slots"][0]["mac"], "AA:00:00:00:00:02");
        assert_eq!(doc["slots"][0]["id"], 1);
        assert_eq!(doc["slots"][1]["led"], "OFF");
        assert!(doc["slots"][1].get("mac").is_none());

        assert_eq!(hub.handle(&HttpMethod::Get, "/", b"").location.as_deref(), Some("/status"));
        assert_eq!(hub.handle(&HttpMethod::Post, "/ping", b"").status, 405);
        assert_eq!(hub.handle(&HttpMethod::Get, "/nothing", b"").status, 404);
    }

    // ==== Gesture Tests ====

    #[tokio::test(start_paused = true)]
    async fn test_status_check_shows_door_then_clears() {
        LocalSet::new()
            .run_until(async {
                let link = FakeLink::new(4);
                link.state.borrow_mut().doors.insert(unit(0), DoorState::Open);
                let hub = hub(&link);
                pair(&hub, 0);

                Rc::clone(&hub).handle_gesture(HubButton::Slot(0), Gesture::SinglePress).await;
                let state = hub.slot_led(0).unwrap().borrow().get_state();
                assert_eq!((state.mode, state.primary), (Mode::On, Color::Red));

                link.state.borrow_mut().doors.insert(unit(0), DoorState::Closed);
                sleep(STATUS_DISPLAY + Duration::from_millis(10)).await;
                assert_eq!(mode(&hub, 0), Mode::Off);

                Rc::clone(&hub).handle_gesture(HubButton::Fire, Gesture::SinglePress).await;
                let state = hub.slot_led(0).unwrap().borrow().get_state();
                assert_eq!((state.mode, state.primary), (Mode::On, Color::Green));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_check_on_lit_led_only_clears() {
        LocalSet::new()
            .run_until(async {
                let link = FakeLink::new(4);
                let hub = hub(&link);
                pair(&hub, 0);
                hub.slot_led(0).unwrap().borrow_mut().set_mode(Mode::Blink);

                Rc::clone(&hub).handle_gesture(HubButton::Slot(0), Gesture::SinglePress).await;
                assert_eq!(mode(&hub, 0), Mode::Blink);

                sleep(CLACK_DISPLAY - Duration::from_millis(100)).await;
                assert_eq!(mode(&hub, 0), Mode::Blink);
                sleep(Duration::from_millis(200)).await;
                assert_eq!(mode(&hub, 0), Mode::Off);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_and_fire() {
        LocalSet::new()
            .run_until(async {
                let link = FakeLink::new(4);
                let hub = hub(&link);
                pair(&hub, 0);
                pair(&hub, 1);

                Rc::clone(&hub).handle_gesture(HubButton::Slot(1), Gesture::LongPress).await;
                assert_eq!(mode(&hub, 1), Mode::Alternate);
                Rc::clone(&hub).handle_gesture(HubButton::Slot(0), Gesture::DoublePress).await;
                assert_eq!(mode(&hub, 0), Mode::Blink);

                Rc::clone(&hub).handle_gesture(HubButton::Fire, Gesture::DoublePress).await;
                assert_eq!(link.state.borrow().fired, vec![unit(1)]);
                assert_eq!(mode(&hub, 1), Mode::Off);
                assert_eq!(mode(&hub, 0), Mode::Blink);

                // Second double press on slot 0 toggles back off.
                Rc::clone(&hub).handle_gesture(HubButton::Slot(0), Gesture::DoublePress).await;
                assert_eq!(mode(&hub, 0), Mode::Off);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_unit_turns_led_off() {
        LocalSet::new()
            .run_until(async {
                let link = FakeLink::new(4);
                let hub = hub(&link);
                pair(&hub, 0);
                pair(&hub, 1);
                link.state.borrow_mut().unreachable.insert(unit(0));
                link.state.borrow_mut().silent.insert(unit(1));
                hub.slot_led(0).unwrap().borrow_mut().set_mode(Mode::Blink);
                hub.slot_led(1).unwrap().borrow_mut().set_mode(Mode::Alternate);

                Rc::clone(&hub).handle_gesture(HubButton::Slot(0), Gesture::LongPress).await;
                assert_eq!(mode(&hub, 0), Mode::Off);

                let start = tokio::time::Instant::now();
                Rc::clone(&hub).handle_gesture(HubButton::Fire, Gesture::LongPress).await;
                let waited = start.elapsed();
                assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
                assert_eq!(mode(&hub, 1), Mode::Off);
                assert!(link.state.borrow().fired.is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_slot_ignored() {
        LocalSet::new()
            .run_until(async {
                let link = FakeLink::new(4);
                let hub = hub(&link);
                Rc::clone(&hub).handle_gesture(HubButton::Slot(2), Gesture::LongPress).await;
                assert_eq!(mode(&hub, 2), Mode::Off);
                assert!(link.state.borrow().pings.is_empty());

                // Five clicks on any other slot do nothing.
                Rc::clone(&hub)
                    .handle_gesture(HubButton::Slot(0), Gesture::MultiPress(RESET_CLICKS))
                    .await;
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "device reset")]
    async fn test_reset_gesture_wipes_and_resets() {
        LocalSet::new()
            .run_until(async {
                let link = FakeLink::new(4);
                let hub = hub(&link);
                pair(&hub, 0);
                Rc::clone(&hub)
                    .handle_gesture(HubButton::Slot(3), Gesture::MultiPress(RESET_CLICKS))
                    .await;
            })
            .await;
    }

    #[test]
    fn test_boot_wipe_combo() {
        let fire = SimLine::released("fire");
        let slot = SimLine::released("slot4");
        assert!(!boot_wipe_requested(&fire, &slot));
        fire.press(true);
        assert!(!boot_wipe_requested(&fire, &slot));
        slot.press(true);
        assert!(boot_wipe_requested(&fire, &slot));
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_point_bring_up_retries_scan_failures() {
        LocalSet::new()
            .run_until(async {
                let radio = FakeRadio::with_visible(vec![ap("other", 1, -50)]);
                radio.state.borrow_mut().fail_scan = true;
                let mut manager = NetworkRoleManager::new(radio.clone(), RoleTiming::default());
                let cancel = CancellationToken::new();
                let task = tokio::task::spawn_local(async move {
                    bring_up_access_point(&mut manager, Color::Green, &cancel).await
                });

                // Attempts at 0, 0.5, 1.5 and 3.5 s; the next is due at 7.5 s.
                sleep(Duration::from_millis(7000)).await;
                assert_eq!(radio.state.borrow().scans, 4);
                assert!(radio.state.borrow().starts.is_empty());

                radio.state.borrow_mut().fail_scan = false;
                let (ssid, address) = task.await.unwrap().unwrap();
                assert_eq!(ssid, "clacker_GREEN_3C");
                assert_eq!(address, Ipv4Addr::new(192, 168, 4, 1));
                assert_eq!(radio.state.borrow().starts.len(), 1);
                assert_eq!(radio.state.borrow().starts[0].channel, 6);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_point_bring_up_stops_on_cancel() {
        let radio = FakeRadio::with_visible(vec![]);
        radio.state.borrow_mut().fail_scan = true;
        let mut manager = NetworkRoleManager::new(radio, RoleTiming::default());
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let (result, _) = tokio::join!(
            bring_up_access_point(&mut manager, Color::Red, &cancel),
            async move {
                sleep(Duration::from_secs(30)).await;
                stop.cancel();
            }
        );
        assert!(result.is_none());
    }
}
