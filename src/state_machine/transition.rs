//! Pure state transition function
//!
//! Given the same state, context, turn snapshot and event, this always
//! produces the same result and performs no I/O. Booking side effects are
//! requested through [`Effect`] values; their outcomes come back as events.

use super::effect::{Effect, Notice};
use super::event::{Command, Event, Selection};
use super::state::{ChatState, Intent, SessionContext, TurnSnapshot};
use crate::booking::{AppointmentOutcome, BookingDenied, CancelOutcome};
use crate::db::ApprovalStatus;
use chrono::NaiveTime;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub context: SessionContext,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState, context: SessionContext) -> Self {
        Self {
            new_state: state,
            context,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    fn notice(self, notice: Notice) -> Self {
        self.with_effect(Effect::Notify(notice))
    }
}

/// Interpret one inbound event against the current state. Never fails:
/// anything unrecognized is a no-op that leaves the state for re-rendering.
pub fn transition(
    state: ChatState,
    context: &SessionContext,
    turn: &TurnSnapshot,
    event: &Event,
) -> TransitionResult {
    // DONE and CANCELLED silently re-enter the menu before the event is
    // interpreted.
    if state.is_terminal() {
        return dispatch(ChatState::Welcome, &SessionContext::default(), turn, event);
    }
    dispatch(state, context, turn, event)
}

fn dispatch(
    state: ChatState,
    context: &SessionContext,
    turn: &TurnSnapshot,
    event: &Event,
) -> TransitionResult {
    match event {
        // Free-text commands take priority over state-specific handling.
        Event::Text(text) => match Command::parse(text) {
            Some(Command::Menu) => TransitionResult::new(ChatState::Welcome, SessionContext::default()),
            Some(Command::Help) => {
                TransitionResult::new(ChatState::Welcome, SessionContext::default())
                    .notice(Notice::Help)
            }
            Some(Command::MyAppointments) => {
                TransitionResult::new(ChatState::MyAppointments, context.clone())
            }
            Some(Command::Back) => TransitionResult::new(state.predecessor(), context.clone()),
            // Unrecognized text re-renders the current prompt.
            None => TransitionResult::new(state, context.clone()),
        },

        Event::Selection(sel) => on_selection(state, context, turn, sel),

        Event::AppointmentResult(outcome) if state == ChatState::Confirm => {
            on_appointment_outcome(context, outcome)
        }

        Event::QueueResult(outcome) if state == ChatState::QueueConfirm => {
            TransitionResult::new(ChatState::Done, SessionContext::default()).notice(
                Notice::Queued {
                    position: outcome.entry.position,
                    already_queued: outcome.already_queued,
                },
            )
        }

        Event::CancelResult(outcome) if state == ChatState::ConfirmCancelAppointment => {
            // Back to the menu regardless of outcome, with the reason surfaced.
            let notice = match outcome {
                CancelOutcome::Cancelled(_) => Notice::CancelConfirmed,
                CancelOutcome::Denied(reason) => Notice::CancelRejected(*reason),
            };
            TransitionResult::new(ChatState::Welcome, SessionContext::default()).notice(notice)
        }

        // An outcome event outside its requesting state has nothing to do.
        Event::AppointmentResult(_) | Event::QueueResult(_) | Event::CancelResult(_) => {
            TransitionResult::new(state, context.clone())
        }
    }
}

fn on_selection(
    state: ChatState,
    context: &SessionContext,
    turn: &TurnSnapshot,
    sel: &Selection,
) -> TransitionResult {
    let noop = || TransitionResult::new(state, context.clone());

    match state {
        ChatState::Welcome => match sel.id.as_str() {
            "appointment" => {
                if turn.employees.is_empty() {
                    return noop().notice(Notice::NoStaff);
                }
                let mut ctx = SessionContext::default();
                ctx.intent = Some(Intent::Appointment);
                TransitionResult::new(ChatState::EmployeeSelect, ctx)
            }
            "queue" => {
                let mut ctx = SessionContext::default();
                ctx.intent = Some(Intent::Queue);
                if turn.settings.queue_requires_employee {
                    TransitionResult::new(ChatState::EmployeeSelect, ctx)
                } else {
                    TransitionResult::new(ChatState::QueueConfirm, ctx)
                }
            }
            "my_appointments" => TransitionResult::new(ChatState::MyAppointments, context.clone()),
            "cancel" => TransitionResult::new(ChatState::Cancelled, SessionContext::default()),
            _ => noop(),
        },

        ChatState::EmployeeSelect => {
            if !turn.has_employee(&sel.id) {
                return noop();
            }
            let mut ctx = context.clone();
            ctx.selected_employee_id = Some(sel.id.clone());
            // The queue flow has no date or time leg.
            if ctx.intent == Some(Intent::Queue) {
                TransitionResult::new(ChatState::QueueConfirm, ctx)
            } else {
                TransitionResult::new(ChatState::DateSelect, ctx)
            }
        }

        ChatState::DateSelect => match sel.id.as_str() {
            // Quick actions offered with the same-day-conflict notice.
            "my_appointments" => TransitionResult::new(ChatState::MyAppointments, context.clone()),
            "other_day" => noop(),
            "menu" => TransitionResult::new(ChatState::Welcome, SessionContext::default()),
            id => match id.parse::<u32>() {
                Ok(offset) if offset < 10 => {
                    let mut ctx = context.clone();
                    ctx.selected_date = Some(turn.today + chrono::Days::new(u64::from(offset)));
                    TransitionResult::new(ChatState::TimeSelect, ctx)
                }
                _ => noop(),
            },
        },

        ChatState::TimeSelect => match sel.id.as_str() {
            // Quick actions offered when no slots were available.
            "other_day" => {
                let mut ctx = context.clone();
                ctx.selected_date = None;
                ctx.selected_slot = None;
                TransitionResult::new(ChatState::DateSelect, ctx)
            }
            "other_employee" => {
                let mut ctx = context.clone();
                ctx.selected_employee_id = None;
                ctx.selected_slot = None;
                TransitionResult::new(ChatState::EmployeeSelect, ctx)
            }
            "menu" => TransitionResult::new(ChatState::Welcome, SessionContext::default()),
            id => match parse_slot(id) {
                Some(slot) => {
                    let mut ctx = context.clone();
                    ctx.selected_slot = Some(slot);
                    TransitionResult::new(ChatState::Confirm, ctx)
                }
                None => noop(),
            },
        },

        ChatState::Confirm => match sel.id.as_str() {
            "confirm" => {
                let (employee_id, date, slot) = match (
                    context.selected_employee_id.clone(),
                    context.selected_date,
                    context.selected_slot,
                ) {
                    (Some(e), Some(d), Some(s)) => (e, d, s),
                    // Incomplete context cannot be booked; restart cleanly.
                    _ => return TransitionResult::new(ChatState::Welcome, SessionContext::default()),
                };
                TransitionResult::new(ChatState::Confirm, context.clone()).with_effect(
                    Effect::BookAppointment {
                        employee_id,
                        date,
                        slot,
                    },
                )
            }
            "back_employee" => TransitionResult::new(ChatState::EmployeeSelect, context.clone()),
            "back_date" => TransitionResult::new(ChatState::DateSelect, context.clone()),
            "back_time" | "back" => TransitionResult::new(ChatState::TimeSelect, context.clone()),
            "cancel" => TransitionResult::new(ChatState::Cancelled, SessionContext::default()),
            _ => noop(),
        },

        ChatState::QueueConfirm => match sel.id.as_str() {
            "confirm" => TransitionResult::new(ChatState::QueueConfirm, context.clone())
                .with_effect(Effect::JoinQueue {
                    employee_id: context.selected_employee_id.clone(),
                }),
            "cancel" => TransitionResult::new(ChatState::Cancelled, SessionContext::default()),
            _ => noop(),
        },

        ChatState::MyAppointments => {
            if !turn.has_appointment(&sel.id) {
                return noop();
            }
            let mut ctx = context.clone();
            ctx.cancel_target_id = Some(sel.id.clone());
            TransitionResult::new(ChatState::AppointmentAction, ctx)
        }

        ChatState::AppointmentAction => match sel.id.as_str() {
            "cancel_appointment" => {
                TransitionResult::new(ChatState::ConfirmCancelAppointment, context.clone())
            }
            "keep" => {
                let mut ctx = context.clone();
                ctx.cancel_target_id = None;
                TransitionResult::new(ChatState::MyAppointments, ctx)
            }
            "exit" => TransitionResult::new(ChatState::Welcome, SessionContext::default()),
            _ => noop(),
        },

        ChatState::ConfirmCancelAppointment => match sel.id.as_str() {
            "confirm_cancel" => match context.cancel_target_id.clone() {
                Some(appointment_id) => {
                    TransitionResult::new(ChatState::ConfirmCancelAppointment, context.clone())
                        .with_effect(Effect::CancelAppointment { appointment_id })
                }
                None => TransitionResult::new(ChatState::Welcome, SessionContext::default()),
            },
            "back" => TransitionResult::new(ChatState::AppointmentAction, context.clone()),
            _ => noop(),
        },

        // Terminal states are re-entered before dispatch; unreachable here.
        ChatState::Done | ChatState::Cancelled => noop(),
    }
}

fn on_appointment_outcome(
    context: &SessionContext,
    outcome: &AppointmentOutcome,
) -> TransitionResult {
    match outcome {
        AppointmentOutcome::Booked(appointment) => {
            TransitionResult::new(ChatState::Done, SessionContext::default()).notice(
                Notice::Booked {
                    approved: appointment.approval_status == ApprovalStatus::Approved,
                    starts_at: appointment.starts_at,
                },
            )
        }
        AppointmentOutcome::Denied(BookingDenied::ExistingSameDay) => {
            let mut ctx = context.clone();
            ctx.selected_date = None;
            ctx.selected_slot = None;
            TransitionResult::new(ChatState::DateSelect, ctx).notice(Notice::SameDayConflict)
        }
        AppointmentOutcome::Denied(BookingDenied::SlotUnavailable) => {
            let mut ctx = context.clone();
            ctx.selected_slot = None;
            TransitionResult::new(ChatState::TimeSelect, ctx).notice(Notice::SlotTaken)
        }
    }
}

/// Accept `H:MM` / `HH:MM` slot ids.
fn parse_slot(id: &str) -> Option<NaiveTime> {
    let (h, m) = id.split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{CancelDenied, QueueOutcome};
    use crate::db::{
        Appointment, AppointmentStatus, BookingSettings, Employee, QueueEntry, QueueStatus,
        SourceChannel,
    };
    use chrono::{NaiveDate, TimeZone, Utc};

    fn employee(id: &str) -> Employee {
        Employee {
            id: id.to_string(),
            business_id: "biz-1".to_string(),
            name: format!("Employee {id}"),
            role: None,
            is_active: true,
        }
    }

    fn turn() -> TurnSnapshot {
        TurnSnapshot {
            today: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            employees: vec![employee("emp-1"), employee("emp-2")],
            settings: BookingSettings::default(),
            my_appointments: vec![],
        }
    }

    fn appointment(id: &str) -> Appointment {
        Appointment {
            id: id.to_string(),
            business_id: "biz-1".to_string(),
            employee_id: "emp-1".to_string(),
            channel_user_id: Some("cu-1".to_string()),
            customer_id: None,
            starts_at: Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap(),
            status: AppointmentStatus::Scheduled,
            approval_status: ApprovalStatus::Approved,
            requested_at: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
            approved_at: None,
            source_channel: SourceChannel::Chat,
        }
    }

    fn list(id: &str) -> Event {
        Event::Selection(Selection {
            kind: crate::state_machine::event::SelectionKind::List,
            id: id.to_string(),
            title: None,
        })
    }

    #[test]
    fn booking_walk_reaches_confirm() {
        let turn = turn();
        let ctx = SessionContext::default();

        let r = transition(ChatState::Welcome, &ctx, &turn, &list("appointment"));
        assert_eq!(r.new_state, ChatState::EmployeeSelect);
        assert_eq!(r.context.intent, Some(Intent::Appointment));

        let r = transition(r.new_state, &r.context, &turn, &list("emp-1"));
        assert_eq!(r.new_state, ChatState::DateSelect);

        let r = transition(r.new_state, &r.context, &turn, &list("1"));
        assert_eq!(r.new_state, ChatState::TimeSelect);
        assert_eq!(
            r.context.selected_date,
            Some(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
        );

        let r = transition(r.new_state, &r.context, &turn, &list("10:30"));
        assert_eq!(r.new_state, ChatState::Confirm);
        assert_eq!(
            r.context.selected_slot,
            NaiveTime::from_hms_opt(10, 30, 0)
        );

        let r = transition(r.new_state, &r.context, &turn, &list("confirm"));
        assert_eq!(r.new_state, ChatState::Confirm);
        assert!(matches!(r.effects[0], Effect::BookAppointment { .. }));
    }

    #[test]
    fn welcome_appointment_with_no_staff_stays_put() {
        let turn = TurnSnapshot {
            employees: vec![],
            ..turn()
        };
        let r = transition(
            ChatState::Welcome,
            &SessionContext::default(),
            &turn,
            &list("appointment"),
        );
        assert_eq!(r.new_state, ChatState::Welcome);
        assert_eq!(r.effects, vec![Effect::Notify(Notice::NoStaff)]);
    }

    #[test]
    fn queue_skips_employee_select_unless_required() {
        let turn = turn();
        let r = transition(
            ChatState::Welcome,
            &SessionContext::default(),
            &turn,
            &list("queue"),
        );
        assert_eq!(r.new_state, ChatState::QueueConfirm);

        let turn = TurnSnapshot {
            settings: BookingSettings {
                queue_requires_employee: true,
                ..BookingSettings::default()
            },
            ..turn
        };
        let r = transition(
            ChatState::Welcome,
            &SessionContext::default(),
            &turn,
            &list("queue"),
        );
        assert_eq!(r.new_state, ChatState::EmployeeSelect);

        // With the queue intent, picking an employee bypasses date/time.
        let r = transition(r.new_state, &r.context, &turn, &list("emp-2"));
        assert_eq!(r.new_state, ChatState::QueueConfirm);
        assert_eq!(r.context.selected_employee_id.as_deref(), Some("emp-2"));
    }

    #[test]
    fn unknown_employee_selection_is_a_noop() {
        let mut ctx = SessionContext::default();
        ctx.intent = Some(Intent::Appointment);
        let r = transition(ChatState::EmployeeSelect, &ctx, &turn(), &list("emp-999"));
        assert_eq!(r.new_state, ChatState::EmployeeSelect);
        assert!(r.effects.is_empty());
    }

    #[test]
    fn date_offset_out_of_range_is_a_noop() {
        let ctx = SessionContext::default();
        for id in ["10", "11", "-1", "3.5", "soon"] {
            let r = transition(ChatState::DateSelect, &ctx, &turn(), &list(id));
            assert_eq!(r.new_state, ChatState::DateSelect, "id {id:?}");
        }
    }

    #[test]
    fn slot_format_is_validated() {
        let ctx = SessionContext::default();
        for id in ["9:30", "09:30", "17:00"] {
            let r = transition(ChatState::TimeSelect, &ctx, &turn(), &list(id));
            assert_eq!(r.new_state, ChatState::Confirm, "id {id:?}");
        }
        for id in ["25:00", "9:5", "930", "menu9:30", "009:30"] {
            let r = transition(ChatState::TimeSelect, &ctx, &turn(), &list(id));
            assert_eq!(r.new_state, ChatState::TimeSelect, "id {id:?}");
        }
    }

    #[test]
    fn commands_take_priority_in_any_state() {
        let turn = turn();
        let mut ctx = SessionContext::default();
        ctx.intent = Some(Intent::Appointment);
        ctx.selected_employee_id = Some("emp-1".to_string());

        let r = transition(ChatState::Confirm, &ctx, &turn, &Event::Text("menu".into()));
        assert_eq!(r.new_state, ChatState::Welcome);
        assert_eq!(r.context, SessionContext::default());

        let r = transition(
            ChatState::TimeSelect,
            &ctx,
            &turn,
            &Event::Text("my appointments".into()),
        );
        assert_eq!(r.new_state, ChatState::MyAppointments);

        let r = transition(ChatState::Confirm, &ctx, &turn, &Event::Text("back".into()));
        assert_eq!(r.new_state, ChatState::TimeSelect);
    }

    #[test]
    fn unrecognized_text_rerenders_current_state() {
        let ctx = SessionContext::default();
        let r = transition(
            ChatState::DateSelect,
            &ctx,
            &turn(),
            &Event::Text("what?".into()),
        );
        assert_eq!(r.new_state, ChatState::DateSelect);
        assert!(r.effects.is_empty());
    }

    #[test]
    fn terminal_states_reenter_welcome_before_processing() {
        let turn = turn();
        let r = transition(
            ChatState::Cancelled,
            &SessionContext::default(),
            &turn,
            &list("appointment"),
        );
        assert_eq!(r.new_state, ChatState::EmployeeSelect);

        let r = transition(
            ChatState::Done,
            &SessionContext::default(),
            &turn,
            &list("queue"),
        );
        assert_eq!(r.new_state, ChatState::QueueConfirm);
    }

    #[test]
    fn same_day_conflict_returns_to_date_select() {
        let mut ctx = SessionContext::default();
        ctx.selected_employee_id = Some("emp-1".to_string());
        ctx.selected_date = NaiveDate::from_ymd_opt(2024, 3, 5);
        ctx.selected_slot = NaiveTime::from_hms_opt(10, 0, 0);

        let r = transition(
            ChatState::Confirm,
            &ctx,
            &turn(),
            &Event::AppointmentResult(AppointmentOutcome::Denied(BookingDenied::ExistingSameDay)),
        );
        assert_eq!(r.new_state, ChatState::DateSelect);
        assert_eq!(r.context.selected_date, None);
        assert_eq!(r.context.selected_employee_id.as_deref(), Some("emp-1"));
        assert_eq!(r.effects, vec![Effect::Notify(Notice::SameDayConflict)]);
    }

    #[test]
    fn lost_slot_returns_to_time_select() {
        let mut ctx = SessionContext::default();
        ctx.selected_employee_id = Some("emp-1".to_string());
        ctx.selected_date = NaiveDate::from_ymd_opt(2024, 3, 5);
        ctx.selected_slot = NaiveTime::from_hms_opt(10, 0, 0);

        let r = transition(
            ChatState::Confirm,
            &ctx,
            &turn(),
            &Event::AppointmentResult(AppointmentOutcome::Denied(BookingDenied::SlotUnavailable)),
        );
        assert_eq!(r.new_state, ChatState::TimeSelect);
        assert_eq!(r.context.selected_slot, None);
        assert_eq!(r.context.selected_date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(r.effects, vec![Effect::Notify(Notice::SlotTaken)]);
    }

    #[test]
    fn successful_booking_finishes_the_turn() {
        let mut ctx = SessionContext::default();
        ctx.selected_employee_id = Some("emp-1".to_string());
        let appt = appointment("appt-1");

        let r = transition(
            ChatState::Confirm,
            &ctx,
            &turn(),
            &Event::AppointmentResult(AppointmentOutcome::Booked(appt)),
        );
        assert_eq!(r.new_state, ChatState::Done);
        assert_eq!(r.context, SessionContext::default());
        assert!(matches!(
            r.effects[0],
            Effect::Notify(Notice::Booked { approved: true, .. })
        ));
    }

    #[test]
    fn queue_confirmation_requests_and_finishes() {
        let mut ctx = SessionContext::default();
        ctx.intent = Some(Intent::Queue);

        let r = transition(ChatState::QueueConfirm, &ctx, &turn(), &list("confirm"));
        assert_eq!(r.new_state, ChatState::QueueConfirm);
        assert_eq!(r.effects, vec![Effect::JoinQueue { employee_id: None }]);

        let entry = QueueEntry {
            id: "q-1".to_string(),
            business_id: "biz-1".to_string(),
            employee_id: None,
            channel_user_id: Some("cu-1".to_string()),
            customer_id: None,
            queue_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            position: 2,
            status: QueueStatus::Waiting,
            source_channel: SourceChannel::Chat,
        };
        let r = transition(
            r.new_state,
            &r.context,
            &turn(),
            &Event::QueueResult(QueueOutcome {
                entry,
                already_queued: false,
            }),
        );
        assert_eq!(r.new_state, ChatState::Done);
        assert!(matches!(
            r.effects[0],
            Effect::Notify(Notice::Queued {
                position: 2,
                already_queued: false
            })
        ));
    }

    #[test]
    fn cancellation_flow_round_trip() {
        let turn = TurnSnapshot {
            my_appointments: vec![appointment("appt-7")],
            ..turn()
        };

        let r = transition(
            ChatState::MyAppointments,
            &SessionContext::default(),
            &turn,
            &list("appt-7"),
        );
        assert_eq!(r.new_state, ChatState::AppointmentAction);
        assert_eq!(r.context.cancel_target_id.as_deref(), Some("appt-7"));

        let r = transition(r.new_state, &r.context, &turn, &list("cancel_appointment"));
        assert_eq!(r.new_state, ChatState::ConfirmCancelAppointment);

        let r = transition(r.new_state, &r.context, &turn, &list("confirm_cancel"));
        assert_eq!(
            r.effects,
            vec![Effect::CancelAppointment {
                appointment_id: "appt-7".to_string()
            }]
        );

        let r = transition(
            r.new_state,
            &r.context,
            &turn,
            &Event::CancelResult(CancelOutcome::Denied(CancelDenied::TooClose)),
        );
        assert_eq!(r.new_state, ChatState::Welcome);
        assert_eq!(
            r.effects,
            vec![Effect::Notify(Notice::CancelRejected(CancelDenied::TooClose))]
        );
    }

    #[test]
    fn selecting_a_foreign_appointment_is_a_noop() {
        let turn = TurnSnapshot {
            my_appointments: vec![appointment("appt-7")],
            ..turn()
        };
        let r = transition(
            ChatState::MyAppointments,
            &SessionContext::default(),
            &turn,
            &list("appt-8"),
        );
        assert_eq!(r.new_state, ChatState::MyAppointments);
        assert_eq!(r.context.cancel_target_id, None);
    }
}
