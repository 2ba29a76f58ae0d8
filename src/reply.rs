//! Outbound composer: structured reply contract
//!
//! The engine's side of the messaging channel: one reply per turn, either
//! plain text, a small button set, or a sectioned list. Option ids emitted
//! here are exactly the ids the transition function accepts back as
//! selections. Channel-specific rendering and delivery live outside.

use crate::db::{Appointment, Employee};
use crate::state_machine::{ChatState, Notice, SessionContext};
use crate::booking::CancelDenied;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

pub const MAX_BUTTONS: usize = 3;
pub const MAX_SECTIONS: usize = 10;
pub const MAX_ROWS_PER_SECTION: usize = 10;

/// How many day offsets DATE_SELECT offers.
pub const DATE_OFFSETS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub title: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<Button>,
    },
    List {
        body: String,
        button_label: String,
        sections: Vec<Section>,
    },
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Reply::Text { body: body.into() }
    }

    /// The channel allows at most three buttons; excess options are dropped.
    fn buttons(body: String, mut buttons: Vec<Button>) -> Self {
        if buttons.len() > MAX_BUTTONS {
            tracing::warn!(dropped = buttons.len() - MAX_BUTTONS, "button overflow");
            buttons.truncate(MAX_BUTTONS);
        }
        Reply::Buttons { body, buttons }
    }

    /// Rows are chunked into sections of ten; anything past ten sections is
    /// dropped.
    fn list(body: String, button_label: &str, section_title: &str, rows: Vec<Row>) -> Self {
        let total = rows.len();
        let mut sections: Vec<Section> = rows
            .chunks(MAX_ROWS_PER_SECTION)
            .enumerate()
            .map(|(i, chunk)| Section {
                title: if total <= MAX_ROWS_PER_SECTION {
                    section_title.to_string()
                } else {
                    format!("{} {}", section_title, i + 1)
                },
                rows: chunk.to_vec(),
            })
            .collect();
        if sections.len() > MAX_SECTIONS {
            tracing::warn!(dropped = sections.len() - MAX_SECTIONS, "section overflow");
            sections.truncate(MAX_SECTIONS);
        }
        Reply::List {
            body,
            button_label: button_label.to_string(),
            sections,
        }
    }
}

/// Everything the composer needs to render one state, gathered by the turn
/// runtime.
#[derive(Debug, Clone)]
pub struct ReplyView<'a> {
    pub today: NaiveDate,
    pub employees: &'a [Employee],
    pub slots: &'a [NaiveTime],
    pub my_appointments: &'a [Appointment],
    pub notices: &'a [Notice],
}

/// Render the prompt for a state. Infallible: missing context degrades to a
/// generic wording, never to an error.
pub fn compose(state: ChatState, context: &SessionContext, view: &ReplyView<'_>) -> Reply {
    match state {
        ChatState::Welcome => Reply::list(
            with_notices(view, "Welcome! What would you like to do?"),
            "Choose",
            "Menu",
            vec![
                row("appointment", "Book an appointment"),
                row("queue", "Join today's queue"),
                row("my_appointments", "My appointments"),
                row("cancel", "Nothing, thanks"),
            ],
        ),

        ChatState::EmployeeSelect => {
            let rows = view
                .employees
                .iter()
                .map(|e| match &e.role {
                    Some(role) => row(&e.id, &format!("{} ({})", e.name, role)),
                    None => row(&e.id, &e.name),
                })
                .collect();
            Reply::list(
                with_notices(view, "Who would you like to book with?"),
                "Staff",
                "Available staff",
                rows,
            )
        }

        ChatState::DateSelect => {
            if view.notices.contains(&Notice::SameDayConflict) {
                return Reply::buttons(
                    with_notices(view, "Would you like another day instead?"),
                    vec![
                        button("my_appointments", "My appointments"),
                        button("other_day", "Another day"),
                        button("menu", "Main menu"),
                    ],
                );
            }
            let rows = (0..DATE_OFFSETS)
                .map(|offset| {
                    let date = view.today + chrono::Days::new(u64::from(offset));
                    let title = match offset {
                        0 => format!("Today, {}", date.format("%d %b")),
                        1 => format!("Tomorrow, {}", date.format("%d %b")),
                        _ => date.format("%A, %d %b").to_string(),
                    };
                    row(&offset.to_string(), &title)
                })
                .collect();
            Reply::list(
                with_notices(view, "Which day suits you?"),
                "Days",
                "Days",
                rows,
            )
        }

        ChatState::TimeSelect => {
            if view.slots.is_empty() {
                return Reply::buttons(
                    with_notices(view, "No free slots on that day."),
                    vec![
                        button("other_day", "Another day"),
                        button("other_employee", "Another staff member"),
                        button("menu", "Main menu"),
                    ],
                );
            }
            let rows = view
                .slots
                .iter()
                .map(|slot| {
                    let id = slot.format("%H:%M").to_string();
                    Row {
                        title: id.clone(),
                        id,
                    }
                })
                .collect();
            Reply::list(
                with_notices(view, "Which time works for you?"),
                "Times",
                "Free slots",
                rows,
            )
        }

        ChatState::Confirm => {
            let employee = context
                .selected_employee_id
                .as_deref()
                .and_then(|id| view.employees.iter().find(|e| e.id == id))
                .map_or("the selected staff member", |e| e.name.as_str());
            let date = context
                .selected_date
                .map_or_else(|| "-".to_string(), |d| d.format("%d %b %Y").to_string());
            let slot = context
                .selected_slot
                .map_or_else(|| "-".to_string(), |t| t.format("%H:%M").to_string());
            let summary = format!("Booking with {employee} on {date} at {slot}.");
            Reply::list(
                with_notices(view, &summary),
                "Confirm",
                "Confirm your booking",
                vec![
                    row("confirm", "Confirm"),
                    row("back_employee", "Change staff"),
                    row("back_date", "Change day"),
                    row("back_time", "Change time"),
                    row("cancel", "Give up"),
                ],
            )
        }

        ChatState::QueueConfirm => Reply::buttons(
            with_notices(view, "Join today's queue?"),
            vec![button("confirm", "Join"), button("cancel", "Give up")],
        ),

        ChatState::MyAppointments => {
            if view.my_appointments.is_empty() {
                return Reply::text(with_notices(
                    view,
                    "You have no upcoming appointments. Type 'menu' to go back.",
                ));
            }
            let rows = view
                .my_appointments
                .iter()
                .map(|a| {
                    let employee = view
                        .employees
                        .iter()
                        .find(|e| e.id == a.employee_id)
                        .map_or(String::new(), |e| format!(" with {}", e.name));
                    row(
                        &a.id,
                        &format!("{}{employee}", a.starts_at.format("%d %b %H:%M")),
                    )
                })
                .collect();
            Reply::list(
                with_notices(view, "Your upcoming appointments:"),
                "Appointments",
                "Upcoming",
                rows,
            )
        }

        ChatState::AppointmentAction => Reply::buttons(
            with_notices(view, "What would you like to do with it?"),
            vec![
                button("cancel_appointment", "Cancel it"),
                button("keep", "Keep it"),
                button("exit", "Main menu"),
            ],
        ),

        ChatState::ConfirmCancelAppointment => Reply::buttons(
            with_notices(view, "Cancel this appointment for good?"),
            vec![button("confirm_cancel", "Yes, cancel"), button("back", "Back")],
        ),

        ChatState::Done => Reply::text(with_notices(view, "See you soon!")),

        ChatState::Cancelled => {
            Reply::text(with_notices(view, "Okay. Send any message to start over."))
        }
    }
}

fn with_notices(view: &ReplyView<'_>, prompt: &str) -> String {
    let mut lines: Vec<String> = view.notices.iter().map(notice_line).collect();
    lines.push(prompt.to_string());
    lines.join("\n\n")
}

fn notice_line(notice: &Notice) -> String {
    match notice {
        Notice::SessionExpired => "Your previous session expired, starting fresh.".to_string(),
        Notice::Help => {
            "You can type 'menu', 'back' or 'my appointments' at any point.".to_string()
        }
        Notice::NoStaff => "There is no bookable staff right now, please try later.".to_string(),
        Notice::SlotTaken => "That time was taken a moment ago, here are the current slots.".to_string(),
        Notice::SameDayConflict => "You already have an appointment on that day.".to_string(),
        Notice::Booked {
            approved,
            starts_at,
        } => {
            let when = starts_at.format("%d %b %H:%M");
            if *approved {
                format!("Your appointment on {when} is confirmed.")
            } else {
                format!("Your request for {when} was sent for approval.")
            }
        }
        Notice::Queued {
            position,
            already_queued,
        } => {
            // Positions are 0-based in storage, 1-based for people.
            let number = position + 1;
            if *already_queued {
                format!("You are already in today's queue, your number is {number}.")
            } else {
                format!("You're in! Your queue number is {number}.")
            }
        }
        Notice::CancelConfirmed => "Your appointment was cancelled.".to_string(),
        Notice::CancelRejected(reason) => match reason {
            CancelDenied::NotFound => "That appointment could not be found.".to_string(),
            CancelDenied::NotOwned => {
                "That appointment does not belong to this number.".to_string()
            }
            CancelDenied::AlreadyCancelled => "That appointment is already cancelled.".to_string(),
            CancelDenied::Past => "That appointment is already in the past.".to_string(),
            CancelDenied::TooClose => {
                "Appointments can only be cancelled at least 2 hours in advance.".to_string()
            }
        },
    }
}

fn row(id: &str, title: &str) -> Row {
    Row {
        id: id.to_string(),
        title: title.to_string(),
    }
}

fn button(id: &str, title: &str) -> Button {
    Button {
        id: id.to_string(),
        title: title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn view<'a>(
        employees: &'a [Employee],
        slots: &'a [NaiveTime],
        notices: &'a [Notice],
    ) -> ReplyView<'a> {
        ReplyView {
            today: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            employees,
            slots,
            my_appointments: &[],
            notices,
        }
    }

    fn employee(id: &str, name: &str) -> Employee {
        Employee {
            id: id.to_string(),
            business_id: "biz-1".to_string(),
            name: name.to_string(),
            role: None,
            is_active: true,
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn welcome_offers_the_four_menu_ids() {
        let reply = compose(
            ChatState::Welcome,
            &SessionContext::default(),
            &view(&[], &[], &[]),
        );
        let Reply::List { sections, .. } = reply else {
            panic!("expected list");
        };
        let ids: Vec<_> = sections[0].rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["appointment", "queue", "my_appointments", "cancel"]);
    }

    #[test]
    fn date_select_offers_ten_offsets_starting_today() {
        let reply = compose(
            ChatState::DateSelect,
            &SessionContext::default(),
            &view(&[], &[], &[]),
        );
        let Reply::List { sections, .. } = reply else {
            panic!("expected list");
        };
        let rows = &sections[0].rows;
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].id, "0");
        assert!(rows[0].title.starts_with("Today"));
        assert!(rows[1].title.starts_with("Tomorrow"));
        assert_eq!(rows[9].id, "9");
    }

    #[test]
    fn empty_slots_degrade_to_three_quick_actions() {
        let reply = compose(
            ChatState::TimeSelect,
            &SessionContext::default(),
            &view(&[], &[], &[]),
        );
        let Reply::Buttons { buttons, .. } = reply else {
            panic!("expected buttons");
        };
        let ids: Vec<_> = buttons.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["other_day", "other_employee", "menu"]);
    }

    #[test]
    fn long_slot_lists_chunk_into_sections_of_ten() {
        let slots: Vec<NaiveTime> = (0..25).map(|i| t(9 + i / 4, (i % 4) * 15)).collect();
        let reply = compose(
            ChatState::TimeSelect,
            &SessionContext::default(),
            &view(&[], &slots, &[]),
        );
        let Reply::List { sections, .. } = reply else {
            panic!("expected list");
        };
        assert_eq!(sections.len(), 3);
        assert!(sections.iter().all(|s| s.rows.len() <= MAX_ROWS_PER_SECTION));
        assert_eq!(sections[0].rows[0].id, "09:00");
    }

    #[test]
    fn same_day_conflict_renders_quick_actions() {
        let notices = [Notice::SameDayConflict];
        let reply = compose(
            ChatState::DateSelect,
            &SessionContext::default(),
            &view(&[], &[], &notices),
        );
        let Reply::Buttons { body, buttons } = reply else {
            panic!("expected buttons");
        };
        assert!(body.contains("already have an appointment"));
        let ids: Vec<_> = buttons.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["my_appointments", "other_day", "menu"]);
    }

    #[test]
    fn confirm_summarizes_the_selection() {
        let mut context = SessionContext::default();
        context.selected_employee_id = Some("emp-1".to_string());
        context.selected_date = NaiveDate::from_ymd_opt(2024, 3, 5);
        context.selected_slot = Some(t(10, 30));
        let employees = [employee("emp-1", "Ali")];

        let reply = compose(ChatState::Confirm, &context, &view(&employees, &[], &[]));
        let Reply::List { body, sections, .. } = reply else {
            panic!("expected list");
        };
        assert!(body.contains("Ali"));
        assert!(body.contains("05 Mar 2024"));
        assert!(body.contains("10:30"));
        assert_eq!(sections[0].rows.len(), 5);
    }

    #[test]
    fn queue_result_is_one_based_for_people() {
        let notices = [Notice::Queued {
            position: 2,
            already_queued: false,
        }];
        let reply = compose(
            ChatState::Done,
            &SessionContext::default(),
            &view(&[], &[], &notices),
        );
        let Reply::Text { body } = reply else {
            panic!("expected text");
        };
        assert!(body.contains("number is 3"));
    }

    #[test]
    fn booked_notice_distinguishes_pending_from_approved() {
        let starts_at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let pending = notice_line(&Notice::Booked {
            approved: false,
            starts_at,
        });
        assert!(pending.contains("approval"));
        let approved = notice_line(&Notice::Booked {
            approved: true,
            starts_at,
        });
        assert!(approved.contains("confirmed"));
    }

    #[test]
    fn expired_notice_prefixes_the_welcome_prompt() {
        let notices = [Notice::SessionExpired];
        let reply = compose(
            ChatState::Welcome,
            &SessionContext::default(),
            &view(&[], &[], &notices),
        );
        let Reply::List { body, .. } = reply else {
            panic!("expected list");
        };
        assert!(body.starts_with("Your previous session expired"));
    }
}
