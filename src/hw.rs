//! Hardware line abstractions.
//!
//! The core modules never touch GPIO or PWM peripherals directly. They drive
//! these small traits instead, which are implemented by the ESP32 drivers in
//! `platform::esp` and by the simulated lines below on the host.
//!
//! All inputs on both boards are wired active-low with pull-ups: a pressed
//! button or a closed door reads low.

use std::cell::Cell;
use std::rc::Rc;

/// Level read from an input wired with a pull-up when the contact is closed.
pub const PRESSED: bool = false;

/// A digital output line.
pub trait OutputLine {
    /// Drive the line high (`true`) or low (`false`).
    fn set_level(&mut self, high: bool);
}

/// A digital input line.
pub trait InputLine {
    /// Read the current level.
    fn is_high(&self) -> bool;

    /// True when the contact is closed (line pulled low).
    fn is_pressed(&self) -> bool {
        self.is_high() == PRESSED
    }
}

/// A PWM-driven actuator (the trigger servo).
pub trait Actuator {
    /// Set the duty cycle on a 16-bit scale (0..=65535).
    fn set_duty_u16(&mut self, duty: u16);
}

impl<T: OutputLine + ?Sized> OutputLine for Box<T> {
    fn set_level(&mut self, high: bool) {
        (**self).set_level(high)
    }
}

impl<T: InputLine + ?Sized> InputLine for Box<T> {
    fn is_high(&self) -> bool {
        (**self).is_high()
    }
}

impl<T: InputLine + ?Sized> InputLine for Rc<T> {
    fn is_high(&self) -> bool {
        (**self).is_high()
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn set_duty_u16(&mut self, duty: u16) {
        (**self).set_duty_u16(duty)
    }
}

/// Simulated GPIO line backed by a shared cell.
///
/// Clones share the same level, so a test (or the host console) can hold one
/// clone and flip it while the component under test owns another.
#[derive(Debug, Clone)]
pub struct SimLine {
    name: &'static str,
    level: Rc<Cell<bool>>,
}

impl SimLine {
    /// Create a line with the given initial level.
    pub fn new(name: &'static str, high: bool) -> Self {
        Self {
            name,
            level: Rc::new(Cell::new(high)),
        }
    }

    /// An input that idles high (released contact with pull-up).
    pub fn released(name: &'static str) -> Self {
        Self::new(name, !PRESSED)
    }

    /// Current level.
    pub fn level(&self) -> bool {
        self.level.get()
    }

    /// Set the level from outside (test or console side).
    pub fn set(&self, high: bool) {
        self.level.set(high);
    }

    /// Close or open the simulated contact.
    pub fn press(&self, pressed: bool) {
        self.level.set(if pressed { PRESSED } else { !PRESSED });
    }

    /// Line name, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl OutputLine for SimLine {
    fn set_level(&mut self, high: bool) {
        if self.level.get() != high {
            log::trace!("{} -> {}", self.name, if high { "high" } else { "low" });
        }
        self.level.set(high);
    }
}

impl InputLine for SimLine {
    fn is_high(&self) -> bool {
        self.level.get()
    }
}

/// Simulated servo recording the last duty written.
#[derive(Debug, Clone, Default)]
pub struct SimServo {
    duty: Rc<Cell<u16>>,
}

impl SimServo {
    /// Create a servo at duty zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last duty written.
    pub fn duty(&self) -> u16 {
        self.duty.get()
    }
}

impl Actuator for SimServo {
    fn set_duty_u16(&mut self, duty: u16) {
        log::debug!("servo duty -> {}", duty);
        self.duty.set(duty);
    }
}
