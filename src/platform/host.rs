//! Simulated boards for host runs.
//!
//! Lines are [`SimLine`]s; the handles the console needs (the door contact)
//! are returned next to the board.

use super::{HubBoard, TriggerBoard};
use crate::config::MAX_TRIGGER_UNITS;
use crate::health::{SystemReset, Watchdog};
use crate::hw::{InputLine, SimLine, SimServo};
use crate::indicator::{shared, Color, DualColorIndicator, SharedIndicator};
use log::{error, trace};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exit status after a requested reset.
pub const RESET_EXIT_CODE: i32 = 3;

/// Exit status when the watchdog expires.
pub const WATCHDOG_EXIT_CODE: i32 = 4;

fn sim_indicator(name: &'static str, team: Color) -> SharedIndicator {
    shared(DualColorIndicator::new(
        SimLine::new(name, false),
        SimLine::new(name, false),
        team,
    ))
}

fn team_switch(team: Color) -> SimLine {
    SimLine::new("team", team == Color::Green)
}

/// A hub with every button released.
pub fn hub_board(team: Color) -> HubBoard {
    let slot_buttons = (0..MAX_TRIGGER_UNITS)
        .map(|_| Rc::new(SimLine::released("slot")) as Rc<dyn InputLine>)
        .collect();
    HubBoard {
        status_led: sim_indicator("status", team),
        slot_leds: (0..MAX_TRIGGER_UNITS)
            .map(|_| sim_indicator("slot", team))
            .collect(),
        slot_buttons,
        fire_button: Rc::new(SimLine::released("fire")),
        team_switch: Box::new(team_switch(team)),
    }
}

/// A trigger unit with the door open. Returns the door handle too.
pub fn trigger_board(team: Color, standalone: bool) -> (TriggerBoard, SimLine) {
    let door = SimLine::released("door");
    let standalone_switch = SimLine::released("standalone");
    standalone_switch.press(standalone);
    let board = TriggerBoard {
        signal: sim_indicator("signal", team),
        armed: sim_indicator("armed", team),
        servo: Box::new(SimServo::new()),
        door: Box::new(door.clone()),
        standalone: Box::new(standalone_switch),
        team_switch: Box::new(team_switch(team)),
    };
    (board, door)
}

/// Watchdog backed by a monitor thread.
///
/// The monitor exits the process when the last feed is older than the
/// timeout, which catches a stalled runtime thread the same way the task
/// watchdog does on hardware.
pub struct HostWatchdog {
    started: Instant,
    last_feed_ms: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
}

impl HostWatchdog {
    pub fn start(timeout: Duration) -> Self {
        let started = Instant::now();
        let last_feed_ms = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));

        let seen = Arc::clone(&last_feed_ms);
        let stop = Arc::clone(&stopped);
        let check = (timeout / 4).max(Duration::from_millis(50));
        let spawned = std::thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(check);
                    let idle = started.elapsed().saturating_sub(Duration::from_millis(
                        seen.load(Ordering::Relaxed),
                    ));
                    if idle > timeout {
                        error!("Watchdog expired after {:?} without a feed", idle);
                        std::process::exit(WATCHDOG_EXIT_CODE);
                    }
                }
            });
        if let Err(e) = spawned {
            error!("Watchdog thread unavailable: {}", e);
        }

        Self {
            started,
            last_feed_ms,
            stopped,
        }
    }
}

impl Watchdog for HostWatchdog {
    fn feed(&mut self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_feed_ms.store(now, Ordering::Relaxed);
        trace!("watchdog fed at {} ms", now);
    }
}

impl Drop for HostWatchdog {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// Reset by exiting; a process supervisor restarts the simulated board.
#[derive(Debug, Default)]
pub struct HostReset;

impl SystemReset for HostReset {
    fn reset(&mut self, reason: &str) -> ! {
        error!("Resetting: {}", reason);
        std::process::exit(RESET_EXIT_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_board_layout() {
        let board = hub_board(Color::Green);
        assert_eq!(board.slot_leds.len(), MAX_TRIGGER_UNITS);
        assert_eq!(board.slot_buttons.len(), MAX_TRIGGER_UNITS);
        assert_eq!(board.indicators().len(), MAX_TRIGGER_UNITS + 1);
        assert_eq!(board.switch_team(), Color::Green);
        assert!(!board.fire_button.is_pressed());
        assert!(board.last_slot_button().is_some());
    }

    #[test]
    fn test_trigger_board_door_handle() {
        let (board, door) = trigger_board(Color::Red, true);
        assert_eq!(board.switch_team(), Color::Red);
        assert!(board.standalone.is_pressed());
        assert!(!board.door.is_pressed());
        door.press(true);
        assert!(board.door.is_pressed());
    }

    #[test]
    fn test_watchdog_fed_keeps_running() {
        let mut watchdog = HostWatchdog::start(Duration::from_secs(5));
        for _ in 0..5 {
            watchdog.feed();
            std::thread::sleep(Duration::from_millis(20));
        }
        watchdog.feed();
    }
}
