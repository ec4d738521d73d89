//! Line console on stdin (the serial monitor on ESP32).
//!
//! Stands in for the physical buttons and the door contact so a board can be
//! driven from a terminal.

use crate::device::{DoorState, HubButton, RESET_CLICKS};
use crate::gesture::Gesture;
use log::{debug, warn};
use std::io::BufRead;
use tokio::sync::mpsc::UnboundedSender;

/// Help text for available commands.
pub const HELP_TEXT: &str = r#"
Available commands:
  fire [single|double|long]        Press the fire button (trigger: fire now)
  slot <n> [single|double|long]    Press slot button n (1-based)
  slot <n> reset                   Five clicks on slot n
  door open|closed                 Move the simulated door contact
  status                           Print the status document
  help                             Show this help

Shortcuts: f=fire, s=slot, d=door, st=status, h=help
"#;

/// Parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Inject a gesture on a hub button.
    Press { button: HubButton, gesture: Gesture },
    /// Set the simulated door contact.
    Door(DoorState),
    /// Print the status document.
    Status,
    /// Show help.
    Help,
    /// Unknown or invalid command, with the message to show.
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse a command from an input line.
    pub fn parse(input: &str) -> Self {
        let mut words = input.split_whitespace();
        let Some(cmd) = words.next() else {
            return Self::Unknown(String::new());
        };

        match cmd.to_lowercase().as_str() {
            "fire" | "f" => match parse_gesture(words.next()) {
                Some(gesture) if gesture != reset_gesture() => Self::Press {
                    button: HubButton::Fire,
                    gesture,
                },
                _ => Self::Unknown("Usage: fire [single|double|long]".to_string()),
            },
            "slot" | "s" => {
                let slot = words
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|&n| n >= 1);
                match (slot, parse_gesture(words.next())) {
                    (Some(n), Some(gesture)) => Self::Press {
                        button: HubButton::Slot(n - 1),
                        gesture,
                    },
                    _ => Self::Unknown("Usage: slot <n> [single|double|long|reset]".to_string()),
                }
            }
            "door" | "d" => match words.next().map(str::to_lowercase).as_deref() {
                Some("open") => Self::Door(DoorState::Open),
                Some("closed" | "close") => Self::Door(DoorState::Closed),
                _ => Self::Unknown("Usage: door open|closed".to_string()),
            },
            "status" | "st" => Self::Status,
            "help" | "h" | "?" => Self::Help,
            _ => Self::Unknown(format!(
                "Unknown command: {}. Type 'help' for commands.",
                cmd
            )),
        }
    }
}

fn reset_gesture() -> Gesture {
    Gesture::MultiPress(RESET_CLICKS)
}

/// A missing gesture word means a single press.
fn parse_gesture(word: Option<&str>) -> Option<Gesture> {
    match word.map(str::to_lowercase).as_deref() {
        None | Some("single") => Some(Gesture::SinglePress),
        Some("double") => Some(Gesture::DoublePress),
        Some("long") => Some(Gesture::LongPress),
        Some("reset") => Some(reset_gesture()),
        Some(_) => None,
    }
}

/// Read stdin on its own thread and forward parsed commands.
///
/// A plain thread rather than a blocking task: a read parked on stdin must
/// not hold up runtime shutdown. The thread ends at end of input or once the
/// receiver is dropped.
pub fn spawn_console(commands: UnboundedSender<ConsoleCommand>) {
    let spawned = std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if commands.send(ConsoleCommand::parse(&line)).is_err() {
                    break;
                }
            }
            debug!("Console closed");
        });
    if let Err(e) = spawned {
        warn!("Console unavailable: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_presses() {
        assert_eq!(
            ConsoleCommand::parse("fire"),
            ConsoleCommand::Press {
                button: HubButton::Fire,
                gesture: Gesture::SinglePress
            }
        );
        assert_eq!(
            ConsoleCommand::parse("  F DOUBLE "),
            ConsoleCommand::Press {
                button: HubButton::Fire,
                gesture: Gesture::DoublePress
            }
        );
        assert_eq!(
            ConsoleCommand::parse("slot 2 long"),
            ConsoleCommand::Press {
                button: HubButton::Slot(1),
                gesture: Gesture::LongPress
            }
        );
        assert_eq!(
            ConsoleCommand::parse("s 4 reset"),
            ConsoleCommand::Press {
                button: HubButton::Slot(3),
                gesture: Gesture::MultiPress(5)
            }
        );
    }

    #[test]
    fn test_parse_door_and_misc() {
        assert_eq!(ConsoleCommand::parse("door closed"), ConsoleCommand::Door(DoorState::Closed));
        assert_eq!(ConsoleCommand::parse("d open"), ConsoleCommand::Door(DoorState::Open));
        assert_eq!(ConsoleCommand::parse("status"), ConsoleCommand::Status);
        assert_eq!(ConsoleCommand::parse("?"), ConsoleCommand::Help);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(ConsoleCommand::parse(""), ConsoleCommand::Unknown(m) if m.is_empty()));
        assert!(matches!(ConsoleCommand::parse("slot 0"), ConsoleCommand::Unknown(_)));
        assert!(matches!(ConsoleCommand::parse("slot x single"), ConsoleCommand::Unknown(_)));
        assert!(matches!(ConsoleCommand::parse("fire reset"), ConsoleCommand::Unknown(_)));
        assert!(matches!(ConsoleCommand::parse("door ajar"), ConsoleCommand::Unknown(_)));
        match ConsoleCommand::parse("launch") {
            ConsoleCommand::Unknown(msg) => assert!(msg.contains("launch")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
