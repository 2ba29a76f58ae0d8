//! Inbound events and the free-text command vocabulary

use crate::booking::{AppointmentOutcome, CancelOutcome, QueueOutcome};
use serde::{Deserialize, Serialize};

/// How a menu selection arrived on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Button,
    List,
}

/// An opaque id chosen from the options the composer last offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub kind: SelectionKind,
    pub id: String,
    pub title: Option<String>,
}

/// Events that drive state transitions. The first two come from the wire;
/// the rest are fed back by the turn runtime after it executes a requested
/// booking effect.
#[derive(Debug, Clone)]
pub enum Event {
    Selection(Selection),
    Text(String),
    AppointmentResult(AppointmentOutcome),
    QueueResult(QueueOutcome),
    CancelResult(CancelOutcome),
}

/// Fixed command vocabulary, recognized in free text regardless of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `cancel` / `menu` / `start over`: back to the main menu.
    Menu,
    /// `back`: one step to the static predecessor.
    Back,
    Help,
    MyAppointments,
}

impl Command {
    pub fn parse(text: &str) -> Option<Command> {
        match text.trim().to_lowercase().as_str() {
            "cancel" | "menu" | "start over" => Some(Command::Menu),
            "back" => Some(Command::Back),
            "help" => Some(Command::Help),
            "my appointments" | "appointments" => Some(Command::MyAppointments),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_is_case_and_whitespace_insensitive() {
        assert_eq!(Command::parse("  MENU "), Some(Command::Menu));
        assert_eq!(Command::parse("Start Over"), Some(Command::Menu));
        assert_eq!(Command::parse("cancel"), Some(Command::Menu));
        assert_eq!(Command::parse("Back"), Some(Command::Back));
        assert_eq!(Command::parse("help"), Some(Command::Help));
        assert_eq!(Command::parse("My Appointments"), Some(Command::MyAppointments));
    }

    #[test]
    fn ordinary_text_is_not_a_command() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("cancel my appointment please"), None);
        assert_eq!(Command::parse(""), None);
    }
}
