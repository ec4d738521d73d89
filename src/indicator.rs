//! Dual-color indicator state machine.
//!
//! Each indicator is a red/green LED pair driven by two independent output
//! lines. Exactly one [`Mode`] is active at a time; periodic modes advance
//! one phase step per [`DualColorIndicator::tick`], which the owning task
//! calls every [`INDICATOR_TICK`].
//!
//! # Timing
//!
//! | Mode        | Pattern (1 tick = 250 ms)                                  |
//! |-------------|------------------------------------------------------------|
//! | `Off`       | both lines low                                             |
//! | `On`        | primary color steady                                       |
//! | `Blink`     | primary color 2 ticks on, 2 ticks off                      |
//! | `Alternate` | primary color 2 ticks, other color 2 ticks                 |
//! | `Count(n)`  | n pulses (1 tick on, 1 tick off), then a 4 tick pause      |
//!
//! # Example
//!
//! ```
//! use claymore_clacker::hw::SimLine;
//! use claymore_clacker::indicator::{Color, DualColorIndicator, Lit, Mode};
//!
//! let red = SimLine::new("red", false);
//! let green = SimLine::new("green", false);
//! let mut led = DualColorIndicator::new(red.clone(), green.clone(), Color::Green);
//!
//! let before = led.save_snapshot();
//! led.set_mode(Mode::Alternate);
//! led.restore_snapshot(before);
//! assert_eq!(led.lit(), Lit::Dark);
//! ```

use crate::hw::OutputLine;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Period of one indicator phase step.
pub const INDICATOR_TICK: Duration = Duration::from_millis(250);

/// Ticks per half-period for `Blink` and `Alternate`.
const HALF_PERIOD_TICKS: u16 = 2;

/// Dark ticks after each `Count(n)` burst.
const COUNT_PAUSE_TICKS: u16 = 4;

/// Team / LED color. Team A is red, team B is green.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Color {
    #[default]
    Red,
    Green,
}

impl Color {
    /// The opposing team color.
    pub fn other(self) -> Self {
        match self {
            Self::Red => Self::Green,
            Self::Green => Self::Red,
        }
    }

    /// Team selected by the A/B switch level (low = team A).
    pub fn from_switch(high: bool) -> Self {
        if high {
            Self::Green
        } else {
            Self::Red
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "RED",
            Self::Green => "GREEN",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RED" => Ok(Self::Red),
            "GREEN" => Ok(Self::Green),
            _ => Err(UnknownColor(s.to_string())),
        }
    }
}

/// Error parsing a [`Color`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownColor(pub String);

impl fmt::Display for UnknownColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown color: {}", self.0)
    }
}

impl std::error::Error for UnknownColor {}

/// Visual mode of an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Off,
    On,
    Blink,
    Alternate,
    /// Render a small integer as a repeating burst of pulses.
    Count(u8),
}

impl Mode {
    /// Number of ticks before the pattern repeats.
    fn cycle_ticks(self) -> u16 {
        match self {
            Self::Off | Self::On => 1,
            Self::Blink | Self::Alternate => HALF_PERIOD_TICKS * 2,
            Self::Count(n) => u16::from(n) * 2 + COUNT_PAUSE_TICKS,
        }
    }
}

/// What the LED pair is physically showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lit {
    /// Both lines low (resting state).
    Dark,
    /// Exactly one line high.
    Color(Color),
    /// Both lines high; the LED then glows red only. No [`Mode`] drives
    /// this, it exists for decoding raw line levels.
    Contested,
}

impl Lit {
    /// Decode line levels.
    pub fn from_lines(red: bool, green: bool) -> Self {
        match (red, green) {
            (false, false) => Self::Dark,
            (true, false) => Self::Color(Color::Red),
            (false, true) => Self::Color(Color::Green),
            (true, true) => Self::Contested,
        }
    }

    /// Line levels as `(red, green)`.
    pub fn lines(self) -> (bool, bool) {
        match self {
            Self::Dark => (false, false),
            Self::Color(Color::Red) => (true, false),
            Self::Color(Color::Green) => (false, true),
            Self::Contested => (true, true),
        }
    }
}

/// Complete observable state of one indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorState {
    pub primary: Color,
    pub mode: Mode,
    /// Tick position within the current mode's cycle.
    pub phase: u16,
}

impl IndicatorState {
    /// What the lines show in this state.
    pub fn lit(&self) -> Lit {
        let primary = Lit::Color(self.primary);
        match self.mode {
            Mode::Off => Lit::Dark,
            Mode::On => primary,
            Mode::Blink => {
                if (self.phase / HALF_PERIOD_TICKS) % 2 == 0 {
                    primary
                } else {
                    Lit::Dark
                }
            }
            Mode::Alternate => {
                if (self.phase / HALF_PERIOD_TICKS) % 2 == 0 {
                    primary
                } else {
                    Lit::Color(self.primary.other())
                }
            }
            Mode::Count(n) => {
                if self.phase < u16::from(n) * 2 && self.phase % 2 == 0 {
                    primary
                } else {
                    Lit::Dark
                }
            }
        }
    }

    /// Flat label used by status documents, e.g. `BLINK_RED` or `COUNT_3_GREEN`.
    pub fn label(&self) -> String {
        match self.mode {
            Mode::Off => "OFF".to_string(),
            Mode::On => format!("ON_{}", self.primary),
            Mode::Blink => format!("BLINK_{}", self.primary),
            Mode::Alternate => format!("ALTERNATE_{}", self.primary),
            Mode::Count(n) => format!("COUNT_{}_{}", n, self.primary),
        }
    }
}

/// Opaque saved indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSnapshot(IndicatorState);

/// One red/green LED pair.
pub struct DualColorIndicator {
    red: Box<dyn OutputLine>,
    green: Box<dyn OutputLine>,
    state: IndicatorState,
}

impl DualColorIndicator {
    /// Create an indicator in the `Off` state and drive both lines low.
    pub fn new(
        red: impl OutputLine + 'static,
        green: impl OutputLine + 'static,
        primary: Color,
    ) -> Self {
        let mut indicator = Self {
            red: Box::new(red),
            green: Box::new(green),
            state: IndicatorState {
                primary,
                mode: Mode::Off,
                phase: 0,
            },
        };
        indicator.render();
        indicator
    }

    /// Switch to a new mode, restarting its pattern.
    pub fn set_mode(&mut self, mode: Mode) {
        self.state.mode = mode;
        self.state.phase = 0;
        self.render();
    }

    /// Change the primary color, keeping the current mode and phase.
    pub fn set_primary_color(&mut self, color: Color) {
        self.state.primary = color;
        self.render();
    }

    /// `Off` becomes `On`; any other mode becomes `Off`.
    pub fn toggle(&mut self) {
        let next = if self.state.mode == Mode::Off {
            Mode::On
        } else {
            Mode::Off
        };
        self.set_mode(next);
    }

    pub fn get_state(&self) -> IndicatorState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn lit(&self) -> Lit {
        self.state.lit()
    }

    pub fn save_snapshot(&self) -> IndicatorSnapshot {
        IndicatorSnapshot(self.state)
    }

    /// Return to a previously saved state, phase included.
    pub fn restore_snapshot(&mut self, snapshot: IndicatorSnapshot) {
        self.state = snapshot.0;
        self.render();
    }

    /// Advance one phase step and update the lines.
    pub fn tick(&mut self) {
        let cycle = self.state.mode.cycle_ticks();
        self.state.phase = (self.state.phase + 1) % cycle;
        self.render();
    }

    fn render(&mut self) {
        let (red, green) = self.state.lit().lines();
        self.red.set_level(red);
        self.green.set_level(green);
    }
}

impl fmt::Debug for DualColorIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualColorIndicator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Indicator shared between the tasks of one device.
pub type SharedIndicator = Rc<RefCell<DualColorIndicator>>;

pub fn shared(indicator: DualColorIndicator) -> SharedIndicator {
    Rc::new(RefCell::new(indicator))
}

/// Advance every indicator once per [`INDICATOR_TICK`] until cancelled.
pub async fn animate(indicators: Vec<SharedIndicator>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(INDICATOR_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for led in &indicators {
                    led.borrow_mut().tick();
                }
            }
        }
    }
}
