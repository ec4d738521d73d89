//! Board bring-up.
//!
//! The binaries ask the platform for a board description, then hand its
//! lines to the controllers. On the host every line is simulated and the
//! [`console`] stands in for the buttons; on ESP32 the lines are GPIO and
//! PWM drivers.

pub mod console;
#[cfg(feature = "esp32")]
pub mod esp;
#[cfg(not(feature = "esp32"))]
pub mod host;

pub use console::{spawn_console, ConsoleCommand, HELP_TEXT};

use crate::hw::{Actuator, InputLine};
use crate::indicator::{Color, SharedIndicator};
use std::rc::Rc;

/// Lines of the hub board.
pub struct HubBoard {
    pub status_led: SharedIndicator,
    pub slot_leds: Vec<SharedIndicator>,
    /// Shared because the last one is sampled by two watchers.
    pub slot_buttons: Vec<Rc<dyn InputLine>>,
    pub fire_button: Rc<dyn InputLine>,
    pub team_switch: Box<dyn InputLine>,
}

impl HubBoard {
    /// Status LED first, then the slot LEDs.
    pub fn indicators(&self) -> Vec<SharedIndicator> {
        std::iter::once(Rc::clone(&self.status_led))
            .chain(self.slot_leds.iter().cloned())
            .collect()
    }

    pub fn switch_team(&self) -> Color {
        Color::from_switch(self.team_switch.is_high())
    }

    pub fn last_slot_button(&self) -> Option<Rc<dyn InputLine>> {
        self.slot_buttons.last().cloned()
    }
}

/// Lines of a trigger unit board.
pub struct TriggerBoard {
    pub signal: SharedIndicator,
    pub armed: SharedIndicator,
    pub servo: Box<dyn Actuator>,
    pub door: Box<dyn InputLine>,
    pub standalone: Box<dyn InputLine>,
    pub team_switch: Box<dyn InputLine>,
}

impl TriggerBoard {
    pub fn indicators(&self) -> Vec<SharedIndicator> {
        vec![Rc::clone(&self.signal), Rc::clone(&self.armed)]
    }

    pub fn switch_team(&self) -> Color {
        Color::from_switch(self.team_switch.is_high())
    }
}
