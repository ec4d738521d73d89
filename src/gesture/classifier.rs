//! Press-timing classifier.
//!
//! Pure state machine: it is fed debounced-or-not edges with timestamps and
//! polled with the current time, and never sleeps itself. The async driver in
//! [`super::watcher`] owns the sampling and waiting.
//!
//! # Algorithm
//!
//! 1. Edges closer together than the debounce interval are ignored.
//! 2. A press held past the long-press threshold fires `LongPress` while still
//!    held; the rest of that press (and any pending clicks) is discarded.
//! 3. A short press opens a multi-click window on release. Every press that
//!    begins inside the window counts as another click.
//! 4. Reaching the click target fires `DoublePress` (target 2) or
//!    `MultiPress(n)`; the press that completed the sequence is consumed.
//! 5. When the window expires with a single click, `SinglePress` fires. A
//!    partial multi-click sequence (2..target-1 clicks) is discarded.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// A classified button interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    SinglePress,
    DoublePress,
    LongPress,
    /// N-click sequence for click targets above two.
    MultiPress(u8),
}

/// Timing parameters for one button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureConfig {
    /// Edges closer than this to the previous accepted edge are bounce.
    pub debounce: Duration,
    /// Hold time that turns a press into `LongPress`.
    pub long_press: Duration,
    /// Time after a release within which the next press continues a sequence.
    pub multi_click_window: Duration,
    /// Clicks needed to fire the multi-click event (2 = double press).
    pub click_target: u8,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(20),
            long_press: Duration::from_millis(750),
            multi_click_window: Duration::from_millis(300),
            click_target: 2,
        }
    }
}

impl GestureConfig {
    /// Default timings with a different click target.
    pub fn with_click_target(click_target: u8) -> Self {
        Self {
            click_target,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), GestureConfigError> {
        if self.click_target < 2 {
            return Err(GestureConfigError("click_target must be >= 2"));
        }
        if self.long_press <= self.debounce {
            return Err(GestureConfigError("long_press must exceed debounce"));
        }
        if self.multi_click_window <= self.debounce {
            return Err(GestureConfigError("multi_click_window must exceed debounce"));
        }
        Ok(())
    }
}

/// Invalid gesture timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureConfigError(pub &'static str);

impl fmt::Display for GestureConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid gesture config: {}", self.0)
    }
}

impl std::error::Error for GestureConfigError {}

/// Transient timing state for one physical button.
#[derive(Debug)]
pub struct GestureClassifier {
    config: GestureConfig,
    /// Start of the press currently held, if any.
    held_since: Option<Instant>,
    /// Long press already fired for the held press.
    long_fired: bool,
    /// Held press already produced its event and must stay silent.
    consumed: bool,
    /// Clicks counted in the running sequence.
    pending_clicks: u8,
    /// Edges before this instant are bounce.
    debounce_until: Option<Instant>,
    /// Sequence resolves when this passes with no new press.
    click_deadline: Option<Instant>,
}

impl GestureClassifier {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            held_since: None,
            long_fired: false,
            consumed: false,
            pending_clicks: 0,
            debounce_until: None,
            click_deadline: None,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn is_held(&self) -> bool {
        self.held_since.is_some()
    }

    /// Feed a press (`true`) or release (`false`) observed at `at`.
    pub fn on_edge(&mut self, pressed: bool, at: Instant) -> Option<Gesture> {
        if pressed == self.is_held() {
            return None;
        }
        if matches!(self.debounce_until, Some(until) if at < until) {
            return None;
        }
        self.debounce_until = Some(at + self.config.debounce);

        // Resolve an expired window before the new edge starts anything.
        let expired = self.poll(at);
        let event = if pressed {
            self.on_press(at)
        } else {
            self.on_release(at)
        };
        expired.or(event)
    }

    /// Fire any event whose timer has passed by `now`.
    pub fn poll(&mut self, now: Instant) -> Option<Gesture> {
        if let Some(since) = self.held_since {
            if !self.long_fired && !self.consumed && now >= since + self.config.long_press {
                self.long_fired = true;
                self.pending_clicks = 0;
                self.click_deadline = None;
                return Some(Gesture::LongPress);
            }
            return None;
        }

        match self.click_deadline {
            Some(deadline) if now >= deadline => {
                self.click_deadline = None;
                let clicks = std::mem::take(&mut self.pending_clicks);
                if clicks == 1 {
                    Some(Gesture::SinglePress)
                } else {
                    log::debug!(
                        "discarding {} click(s), target was {}",
                        clicks,
                        self.config.click_target
                    );
                    None
                }
            }
            _ => None,
        }
    }

    /// Earliest instant at which [`poll`](Self::poll) could fire.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.held_since {
            Some(since) if !self.long_fired && !self.consumed => {
                Some(since + self.config.long_press)
            }
            Some(_) => None,
            None => self.click_deadline,
        }
    }

    /// Drop all pending state without firing anything.
    pub fn reset(&mut self) {
        self.held_since = None;
        self.long_fired = false;
        self.consumed = false;
        self.pending_clicks = 0;
        self.debounce_until = None;
        self.click_deadline = None;
    }

    fn on_press(&mut self, at: Instant) -> Option<Gesture> {
        self.held_since = Some(at);
        self.long_fired = false;
        self.consumed = false;

        if self.pending_clicks == 0 {
            return None;
        }

        // Press inside an open window continues the sequence.
        self.click_deadline = None;
        self.pending_clicks += 1;
        if self.pending_clicks < self.config.click_target {
            return None;
        }

        self.pending_clicks = 0;
        self.consumed = true;
        if self.config.click_target == 2 {
            Some(Gesture::DoublePress)
        } else {
            Some(Gesture::MultiPress(self.config.click_target))
        }
    }

    fn on_release(&mut self, at: Instant) -> Option<Gesture> {
        let since = self.held_since.take()?;
        let silent = self.long_fired || self.consumed;
        self.long_fired = false;
        self.consumed = false;
        if silent {
            return None;
        }

        if at >= since + self.config.long_press {
            // Held past the threshold without a poll in between.
            self.pending_clicks = 0;
            self.click_deadline = None;
            return Some(Gesture::LongPress);
        }

        if self.pending_clicks == 0 {
            self.pending_clicks = 1;
        }
        self.click_deadline = Some(at + self.config.multi_click_window);
        None
    }
}
