//! Async button sampler feeding a [`GestureClassifier`].

use super::classifier::{Gesture, GestureClassifier, GestureConfig};
use crate::hw::InputLine;
use log::debug;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Input sampling period.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(5);

/// Samples one input line and emits `(button, gesture)` events.
pub struct ButtonWatcher<B, I> {
    button: B,
    input: I,
    classifier: GestureClassifier,
}

impl<B, I> ButtonWatcher<B, I>
where
    B: Copy + Debug,
    I: InputLine,
{
    pub fn new(button: B, input: I, config: GestureConfig) -> Self {
        Self {
            button,
            input,
            classifier: GestureClassifier::new(config),
        }
    }

    /// Sample until cancelled or the receiver goes away.
    ///
    /// A button already held when the watcher starts is ignored until it is
    /// released. On cancellation the classifier is reset so a press still in
    /// progress never fires.
    pub async fn run(mut self, events: UnboundedSender<(B, Gesture)>, cancel: CancellationToken) {
        let mut wait_for_release = self.input.is_pressed();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.classifier.is_held() {
                        debug!("{:?}: dropping press held at shutdown", self.button);
                    }
                    self.classifier.reset();
                    break;
                }
                _ = sleep(SAMPLE_INTERVAL) => {}
            }

            let now = Instant::now();
            let pressed = self.input.is_pressed();
            if wait_for_release {
                wait_for_release = pressed;
                continue;
            }

            // Offer the level until the classifier accepts it; a debounced
            // edge is simply retried on the next sample.
            let mut event = None;
            if pressed != self.classifier.is_held() {
                event = self.classifier.on_edge(pressed, now);
            }
            if event.is_none() {
                event = self.classifier.poll(now);
            }

            if let Some(gesture) = event {
                debug!("{:?}: {:?}", self.button, gesture);
                if events.send((self.button, gesture)).is_err() {
                    self.classifier.reset();
                    break;
                }
            }
        }
    }
}
