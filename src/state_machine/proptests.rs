//! Property-based tests for the transition function

use super::effect::Effect;
use super::event::{Command, Event, Selection, SelectionKind};
use super::state::{ChatState, Intent, SessionContext, TurnSnapshot};
use super::transition::transition;
use crate::db::{
    Appointment, AppointmentStatus, ApprovalStatus, BookingSettings, Employee, SourceChannel,
};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use proptest::prelude::*;

fn turn() -> TurnSnapshot {
    let employee = |id: &str| Employee {
        id: id.to_string(),
        business_id: "biz-1".to_string(),
        name: id.to_string(),
        role: None,
        is_active: true,
    };
    TurnSnapshot {
        today: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
        employees: vec![employee("emp-1"), employee("emp-2")],
        settings: BookingSettings::default(),
        my_appointments: vec![Appointment {
            id: "appt-1".to_string(),
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
        }],
    }
}

fn arb_state() -> impl Strategy<Value = ChatState> {
    prop_oneof![
        Just(ChatState::Welcome),
        Just(ChatState::EmployeeSelect),
        Just(ChatState::DateSelect),
        Just(ChatState::TimeSelect),
        Just(ChatState::Confirm),
        Just(ChatState::QueueConfirm),
        Just(ChatState::MyAppointments),
        Just(ChatState::AppointmentAction),
        Just(ChatState::ConfirmCancelAppointment),
        Just(ChatState::Done),
        Just(ChatState::Cancelled),
    ]
}

fn arb_context() -> impl Strategy<Value = SessionContext> {
    (
        proptest::option::of(prop_oneof![Just(Intent::Appointment), Just(Intent::Queue)]),
        proptest::option::of(prop_oneof![
            Just("emp-1".to_string()),
            Just("emp-404".to_string())
        ]),
        proptest::option::of(Just(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())),
        proptest::option::of(Just(NaiveTime::from_hms_opt(10, 0, 0).unwrap())),
        proptest::option::of(Just("appt-1".to_string())),
        any::<bool>(),
    )
        .prop_map(
            |(intent, employee, date, slot, target, timed_out)| SessionContext {
                intent,
                selected_employee_id: employee,
                selected_date: date,
                selected_slot: slot,
                cancel_target_id: target,
                timed_out,
            },
        )
}

fn arb_selection_id() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("appointment".to_string()),
        Just("queue".to_string()),
        Just("my_appointments".to_string()),
        Just("cancel".to_string()),
        Just("confirm".to_string()),
        Just("confirm_cancel".to_string()),
        Just("cancel_appointment".to_string()),
        Just("keep".to_string()),
        Just("exit".to_string()),
        Just("back".to_string()),
        Just("back_employee".to_string()),
        Just("back_date".to_string()),
        Just("back_time".to_string()),
        Just("other_day".to_string()),
        Just("other_employee".to_string()),
        Just("menu".to_string()),
        Just("emp-1".to_string()),
        Just("emp-404".to_string()),
        Just("appt-1".to_string()),
        "(0|[1-9][0-9]?)",
        "[0-2][0-9]:[0-5][0-9]",
        "[a-z]{0,8}",
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_selection_id().prop_map(|id| {
            Event::Selection(Selection {
                kind: SelectionKind::List,
                id,
                title: None,
            })
        }),
        prop_oneof![
            Just("menu".to_string()),
            Just("back".to_string()),
            Just("help".to_string()),
            Just("my appointments".to_string()),
            "[a-z ]{0,16}",
        ]
        .prop_map(Event::Text),
    ]
}

proptest! {
    /// The transition function is total and deterministic for any
    /// (state, context, event) combination.
    #[test]
    fn transitions_are_total_and_deterministic(
        state in arb_state(),
        context in arb_context(),
        event in arb_event(),
    ) {
        let turn = turn();
        let first = transition(state, &context, &turn, &event);
        let second = transition(state, &context, &turn, &event);
        prop_assert_eq!(first.new_state, second.new_state);
        prop_assert_eq!(first.context, second.context);
        prop_assert!(first.effects.len() <= 2);
        prop_assert_eq!(first.effects, second.effects);
    }

    /// The menu command lands on WELCOME with a clean context from any state.
    #[test]
    fn menu_command_always_resets(state in arb_state(), context in arb_context()) {
        let result = transition(state, &context, &turn(), &Event::Text("menu".to_string()));
        prop_assert_eq!(result.new_state, ChatState::Welcome);
        prop_assert_eq!(result.context, SessionContext::default());
    }

    /// The appointments command lands on MY_APPOINTMENTS from any state.
    #[test]
    fn appointments_command_always_routes(state in arb_state(), context in arb_context()) {
        let result = transition(
            state,
            &context,
            &turn(),
            &Event::Text("my appointments".to_string()),
        );
        prop_assert_eq!(result.new_state, ChatState::MyAppointments);
    }

    /// `back` follows the static predecessor map; terminal states re-enter
    /// the menu first and stay there.
    #[test]
    fn back_follows_the_predecessor_map(state in arb_state(), context in arb_context()) {
        let result = transition(state, &context, &turn(), &Event::Text("back".to_string()));
        let expected = if state.is_terminal() {
            ChatState::Welcome
        } else {
            state.predecessor()
        };
        prop_assert_eq!(result.new_state, expected);
    }

    /// Unrecognized free text never moves a live session.
    #[test]
    fn unknown_text_is_a_noop(
        state in arb_state(),
        context in arb_context(),
        word in "[a-z]{1,12}",
    ) {
        prop_assume!(Command::parse(&word).is_none());
        let result = transition(state, &context, &turn(), &Event::Text(word));
        if state.is_terminal() {
            prop_assert_eq!(result.new_state, ChatState::Welcome);
        } else {
            prop_assert_eq!(result.new_state, state);
            prop_assert_eq!(result.context, context);
        }
        prop_assert!(result.effects.is_empty());
    }

    /// Booking requests can only originate from their confirmation states,
    /// and only with the context they need.
    #[test]
    fn effects_come_from_their_confirmation_states(
        state in arb_state(),
        context in arb_context(),
        event in arb_event(),
    ) {
        let result = transition(state, &context, &turn(), &event);
        for effect in &result.effects {
            match effect {
                Effect::BookAppointment { .. } => {
                    prop_assert_eq!(state, ChatState::Confirm);
                    prop_assert!(context.selected_employee_id.is_some());
                    prop_assert!(context.selected_date.is_some());
                    prop_assert!(context.selected_slot.is_some());
                }
                Effect::JoinQueue { .. } => {
                    prop_assert_eq!(state, ChatState::QueueConfirm);
                }
                Effect::CancelAppointment { .. } => {
                    prop_assert_eq!(state, ChatState::ConfirmCancelAppointment);
                    prop_assert!(context.cancel_target_id.is_some());
                }
                Effect::Notify(_) => {}
            }
        }
    }
}
