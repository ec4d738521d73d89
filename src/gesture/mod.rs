//! Button gesture classification.
//!
//! # Components
//!
//! - [`classifier`] - timing state machine (host-testable, no I/O)
//! - [`watcher`] - async sampler that drives a classifier from an input line

mod classifier;
mod watcher;

pub use classifier::{Gesture, GestureClassifier, GestureConfig, GestureConfigError};
pub use watcher::{ButtonWatcher, SAMPLE_INTERVAL};
