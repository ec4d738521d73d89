//! Trigger unit controller: servo, door sensor, indicators and routes.

use super::{DoorState, TriggerState, TriggerStatus};
use crate::config::{DOOR_POLL_INTERVAL, SERVO_FIRE, SERVO_READY, TRIGGER_RESET};
use crate::http::{HttpMethod, Reply, Routes};
use crate::hw::{Actuator, InputLine};
use crate::indicator::{Color, Mode, SharedIndicator};
use crate::timer::ResetTimer;
use log::{debug, info, warn};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fire request refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireError {
    /// The previous firing has not been reset yet.
    NotReady,
}

impl FireError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotReady => 409,
        }
    }
}

impl fmt::Display for FireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "trigger not ready"),
        }
    }
}

impl std::error::Error for FireError {}

/// The trigger unit's hardware and firing state.
pub struct TriggerController {
    signal: SharedIndicator,
    armed: SharedIndicator,
    servo: Rc<RefCell<Box<dyn Actuator>>>,
    door: Box<dyn InputLine>,
    standalone: Box<dyn InputLine>,
    team: Cell<Color>,
    reset: RefCell<ResetTimer>,
}

impl TriggerController {
    /// Takes the servo to its ready position.
    pub fn new(
        signal: SharedIndicator,
        armed: SharedIndicator,
        servo: impl Actuator + 'static,
        door: impl InputLine + 'static,
        standalone: impl InputLine + 'static,
        team: Color,
    ) -> Rc<Self> {
        let mut servo: Box<dyn Actuator> = Box::new(servo);
        servo.set_duty_u16(SERVO_READY);
        Rc::new(Self {
            signal,
            armed,
            servo: Rc::new(RefCell::new(servo)),
            door: Box::new(door),
            standalone: Box::new(standalone),
            team: Cell::new(team),
            reset: RefCell::new(ResetTimer::new()),
        })
    }

    pub fn signal(&self) -> &SharedIndicator {
        &self.signal
    }

    pub fn armed(&self) -> &SharedIndicator {
        &self.armed
    }

    pub fn is_firing(&self) -> bool {
        self.reset.borrow().is_pending()
    }

    pub fn door(&self) -> DoorState {
        DoorState::from_contact(self.door.is_pressed())
    }

    /// Running without a hub (standalone switch closed).
    pub fn is_standalone(&self) -> bool {
        self.standalone.is_pressed()
    }

    /// Swing the servo and flash both indicators until the reset timer
    /// puts everything back.
    pub fn fire(&self) -> Result<(), FireError> {
        if self.is_firing() {
            warn!("Fire refused: still resetting");
            return Err(FireError::NotReady);
        }

        let signal_before = self.signal.borrow().save_snapshot();
        let armed_before = self.armed.borrow().save_snapshot();
        self.signal.borrow_mut().set_mode(Mode::Alternate);
        self.armed.borrow_mut().set_mode(Mode::Alternate);
        self.servo.borrow_mut().set_duty_u16(SERVO_FIRE);
        info!("CLACK");

        let servo = Rc::clone(&self.servo);
        let signal = Rc::clone(&self.signal);
        let armed = Rc::clone(&self.armed);
        self.reset.borrow_mut().schedule(TRIGGER_RESET, move || {
            servo.borrow_mut().set_duty_u16(SERVO_READY);
            signal.borrow_mut().restore_snapshot(signal_before);
            armed.borrow_mut().restore_snapshot(armed_before);
            info!("Trigger ready");
        });
        Ok(())
    }

    pub fn status(&self) -> TriggerStatus {
        TriggerStatus {
            door: self.door(),
            team: self.team.get(),
            standalone: self.is_standalone(),
            armed: self.armed.borrow().get_state().label(),
            signal: self.signal.borrow().get_state().label(),
            trigger: if self.is_firing() {
                TriggerState::Firing
            } else {
                TriggerState::Ready
            },
        }
    }

    /// Show the door on the armed indicator: On when closed, Off when open.
    pub fn poll_door(&self) {
        if self.is_firing() {
            return;
        }
        let team = self.team.get();
        self.signal.borrow_mut().set_primary_color(team);

        let wanted = match self.door() {
            DoorState::Closed => Mode::On,
            DoorState::Open => Mode::Off,
        };
        let mut armed = self.armed.borrow_mut();
        armed.set_primary_color(team);
        if armed.mode() != wanted {
            debug!("Door {:?}", self.door());
            armed.set_mode(wanted);
        }
    }

    /// Poll the door until cancelled.
    pub async fn watch_door(self: Rc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(DOOR_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll_door(),
            }
        }
        self.reset.borrow_mut().cancel();
    }

    fn fire_reply(&self) -> Reply {
        match self.fire() {
            Ok(()) => Reply::text(200, "clack"),
            Err(e) => Reply::message(e.status_code(), &e.to_string()),
        }
    }
}

impl Routes for TriggerController {
    fn handle(&self, method: &HttpMethod, path: &str, _body: &[u8]) -> Reply {
        match (method, path) {
            (HttpMethod::Get, "/") => Reply::redirect("/status"),
            (HttpMethod::Get, "/ping") => Reply::text(200, "pong"),
            (HttpMethod::Get, "/status") => Reply::json(200, &self.status()),
            (HttpMethod::Post, "/clack") => self.fire_reply(),
            (HttpMethod::Get | HttpMethod::Post, "/fire") => self.fire_reply(),
            (_, "/" | "/ping" | "/status" | "/clack" | "/fire") => Reply::method_not_allowed(),
            _ => Reply::not_found(),
        }
    }
}
