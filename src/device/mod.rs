//! Board-level controllers.
//!
//! - [`hub`] - the base: slot table, gesture actions and the registration routes
//! - [`trigger`] - the trigger unit: servo, door sensor and its routes
//! - [`session`] - the trigger unit's hub link (scan, join, register)
//!
//! Controllers own their indicators and timers and are shared between the
//! HTTP task, the gesture task and the health loop as `Rc`s on one thread.

pub mod hub;
pub mod session;
pub mod trigger;

pub use hub::{
    boot_wipe_requested, bring_up_access_point, HubButton, HubController, HubStatus, SlotStatus,
    RESET_CLICKS,
};
pub use session::TriggerSession;
pub use trigger::{FireError, TriggerController};

use crate::config::SELF_TEST_STEP;
use crate::indicator::{Color, Mode, SharedIndicator};
use crate::registry::{DeviceRegistry, RegistryError, Role, Storage};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

/// Door sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DoorState {
    Open,
    Closed,
}

impl DoorState {
    /// The reed contact closes when the door shuts.
    pub fn from_contact(closed: bool) -> Self {
        if closed {
            Self::Closed
        } else {
            Self::Open
        }
    }
}

/// Actuator position of a trigger unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerState {
    Ready,
    Firing,
}

/// `GET /status` document of a trigger unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStatus {
    pub door: DoorState,
    pub team: Color,
    pub standalone: bool,
    /// Label of the armed indicator, e.g. `ON_RED`.
    pub armed: String,
    /// Label of the signal indicator.
    pub signal: String,
    pub trigger: TriggerState,
}

/// Cycle every indicator through Alternate, On and Off.
pub async fn self_test(indicators: &[SharedIndicator]) {
    for mode in [Mode::Alternate, Mode::On, Mode::Off] {
        for led in indicators {
            led.borrow_mut().set_mode(mode);
        }
        sleep(SELF_TEST_STEP).await;
    }
}

/// Settle the device's team and record its role.
///
/// The team persisted at first boot wins over the switch so an accidental
/// toggle between boots does not change sides. Every indicator is recoloured
/// to the settled team.
pub fn settle_team<S: Storage>(
    registry: &mut DeviceRegistry<S>,
    role: Role,
    mac: &str,
    switch_team: Color,
    indicators: &[SharedIndicator],
) -> Result<Color, RegistryError> {
    let team = match registry.identity().team {
        Some(saved) => {
            if saved != switch_team {
                warn!(
                    "Team switch reads {} but {} is saved; keeping {}",
                    switch_team, saved, saved
                );
            }
            saved
        }
        None => switch_team,
    };

    let identity = registry.identity();
    if identity.team != Some(team) || identity.role != Some(role) || identity.mac != mac {
        let mac = mac.to_string();
        registry.update_identity(|id| {
            id.team = Some(team);
            id.role = Some(role);
            id.mac = mac;
        })?;
    }

    for led in indicators {
        led.borrow_mut().set_primary_color(team);
    }
    info!("Playing for team {}", team);
    Ok(team)
}


#[cfg(test)]
mod tests {
    use super::test_support::sim_indicator;
    use super::*;
    use crate::registry::test_support::unique_path;
    use crate::registry::FileStorage;
    use tokio::time::Duration;

    #[test]
    fn test_status_document_shape() {
        let status = TriggerStatus {
            door: DoorState::from_contact(false),
            team: Color::Green,
            standalone: false,
            armed: "OFF".into(),
            signal: "COUNT_2_GREEN".into(),
            trigger: TriggerState::Ready,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["door"], "OPEN");
        assert_eq!(json["team"], "GREEN");
        assert_eq!(json["trigger"], "READY");
    }

    #[test]
    fn test_saved_team_wins_over_switch() {
        let path = unique_path("team");
        let (led, _, _) = sim_indicator("led", Color::Red);

        let mut registry = DeviceRegistry::open(FileStorage::new(&path), 0).unwrap();
        let team = settle_team(&mut registry, Role::Trigger, "AA:BB", Color::Green, &[led.clone()]).unwrap();
        assert_eq!(team, Color::Green);
        drop(registry);

        // Switch flipped between boots.
        let mut registry = DeviceRegistry::open(FileStorage::new(&path), 0).unwrap();
        led.borrow_mut().set_primary_color(Color::Red);
        let team = settle_team(&mut registry, Role::Trigger, "AA:BB", Color::Red, &[led.clone()]).unwrap();
        assert_eq!(team, Color::Green);
        assert_eq!(led.borrow().get_state().primary, Color::Green);
        assert_eq!(registry.identity().role, Some(Role::Trigger));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_test_ends_dark() {
        let (a, _, _) = sim_indicator("a", Color::Red);
        let (b, _, _) = sim_indicator("b", Color::Green);
        let start = tokio::time::Instant::now();
        self_test(&[a.clone(), b.clone()]).await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(a.borrow().mode(), Mode::Off);
        assert_eq!(b.borrow().mode(), Mode::Off);
    }
}
