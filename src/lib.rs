//! Claymore / Clacker firmware library.
//!
//! Two boards share this crate: the hub ("clacker"), an access point with
//! one button and indicator per trigger unit, and the trigger units
//! ("claymore"), which join their team's hub, register, and fire a servo
//! on command.
//!
//! Everything except [`platform::esp`] is platform-independent and tested
//! on the host against simulated lines and radios.

pub mod captive;
pub mod config;
pub mod device;
pub mod gesture;
pub mod health;
pub mod http;
pub mod hw;
pub mod indicator;
pub mod link;
pub mod network;
pub mod platform;
pub mod registry;
pub mod timer;

// Re-export commonly used items
pub use config::RuntimeConfig;
pub use device::{HubController, TriggerController, TriggerSession};
pub use gesture::{ButtonWatcher, Gesture, GestureConfig};
pub use health::{HealthConfig, HealthMonitor};
pub use http::HttpServer;
pub use indicator::{Color, Mode};
pub use link::HttpPeerLink;
pub use network::{NetworkPlan, NetworkRoleManager, RoleTiming};
pub use registry::{DeviceRegistry, Role};
