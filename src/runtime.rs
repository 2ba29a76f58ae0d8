//! Turn runtime: one inbound event, one request-scoped unit of work
//!
//! Dedupe, session fetch with expiry reset, transition, effect execution
//! through the booking transactor, session persist, reply composition.
//! Booking outcomes are additionally broadcast for downstream consumers
//! (notifications, dashboards).

use crate::availability;
use crate::booking::{self, AppointmentOutcome, CancelOutcome};
use crate::db::{Business, Database, DbError, SourceChannel};
use crate::identity::{self, CanonicalIdentity};
use crate::reply::{compose, Reply, ReplyView};
use crate::session::SessionStore;
use crate::state_machine::{
    transition, ChatState, Effect, Event, Notice, Selection, TransitionResult, TurnSnapshot,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error(transparent)]
    Db(#[from] DbError),
}

/// The abstracted inbound event contract, already decoded from the wire.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub external_identity: String,
    pub message_id: String,
    pub display_name: Option<String>,
    pub text: Option<String>,
    pub selection: Option<Selection>,
}

/// Booking outcomes downstream components subscribe to.
#[derive(Debug, Clone)]
pub enum BookingEvent {
    AppointmentCreated {
        business_id: String,
        appointment_id: String,
        starts_at: DateTime<Utc>,
        approved: bool,
    },
    QueueJoined {
        business_id: String,
        entry_id: String,
        position: i64,
    },
    AppointmentCancelled {
        business_id: String,
        appointment_id: String,
    },
}

#[derive(Debug)]
pub struct TurnOutcome {
    /// None when the event was acknowledged without a reply (inactive
    /// business, duplicate delivery, nothing to say).
    pub reply: Option<Reply>,
    pub duplicate: bool,
}

pub struct TurnRuntime {
    db: Database,
    sessions: SessionStore,
    outcomes: broadcast::Sender<BookingEvent>,
}

impl TurnRuntime {
    pub fn new(db: Database, session_ttl_minutes: i64) -> Self {
        let (outcomes, _) = broadcast::channel(128);
        Self {
            sessions: SessionStore::new(db.clone(), session_ttl_minutes),
            db,
            outcomes,
        }
    }

    #[allow(dead_code)] // Consumed by notification/dashboard components
    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.outcomes.subscribe()
    }

    /// Handle one inbound event. Storage failure is the only error path;
    /// everything conversational is data all the way down.
    pub fn process(
        &self,
        business: &Business,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        if !business.active {
            tracing::debug!(business_id = %business.id, "inactive business, dropping event");
            return Ok(TurnOutcome {
                reply: None,
                duplicate: false,
            });
        }

        // Transport-level retries must not advance the machine twice.
        if !self
            .db
            .record_inbound(&business.id, &message.message_id, now)?
        {
            tracing::debug!(
                business_id = %business.id,
                message_id = %message.message_id,
                "duplicate delivery"
            );
            return Ok(TurnOutcome {
                reply: None,
                duplicate: true,
            });
        }

        let user = self.db.upsert_channel_user(
            &business.id,
            &message.external_identity,
            message.display_name.as_deref(),
            now,
        )?;
        let identity = identity::resolve(&self.db, &user)?;
        let mut session = self
            .sessions
            .fetch(&business.id, &message.external_identity, now)?;

        let turn = TurnSnapshot {
            today: now.date_naive(),
            employees: self.db.get_active_employees(&business.id)?,
            settings: self.db.get_booking_settings(&business.id)?,
            my_appointments: self.db.upcoming_appointments_for(
                &business.id,
                &identity.channel_user_ids,
                &identity.customer_ids,
                now,
            )?,
        };

        let mut notices: Vec<Notice> = vec![];
        if session.context.timed_out {
            notices.push(Notice::SessionExpired);
            session.context.timed_out = false;
        }

        let mut state = session.state;
        let mut context = session.context.clone();

        // A selection always takes the menu path; free text otherwise.
        let event = match (&message.selection, &message.text) {
            (Some(selection), _) => Some(Event::Selection(selection.clone())),
            (None, Some(text)) => Some(Event::Text(text.clone())),
            (None, None) => None,
        };

        if let Some(event) = event {
            let from_state = state;
            let mut current = transition(state, &context, &turn, &event);
            // Booking effects produce an outcome event that is fed straight
            // back in; two rounds settle every flow.
            let mut rounds = 0;
            loop {
                let TransitionResult {
                    new_state,
                    context: next_context,
                    effects,
                } = current;
                state = new_state;
                context = next_context;

                let mut followup: Option<Event> = None;
                for effect in effects {
                    match effect {
                        Effect::Notify(notice) => notices.push(notice),
                        Effect::BookAppointment {
                            employee_id,
                            date,
                            slot,
                        } => {
                            let outcome = booking::create_appointment(
                                &self.db,
                                &business.id,
                                &employee_id,
                                date,
                                slot,
                                &identity,
                                SourceChannel::Chat,
                                now,
                            )?;
                            self.announce_appointment(&business.id, &outcome);
                            followup = Some(Event::AppointmentResult(outcome));
                        }
                        Effect::JoinQueue { employee_id } => {
                            let outcome = booking::join_queue(
                                &self.db,
                                &business.id,
                                employee_id.as_deref(),
                                &identity,
                                SourceChannel::Chat,
                                now,
                            )?;
                            if !outcome.already_queued {
                                let _ = self.outcomes.send(BookingEvent::QueueJoined {
                                    business_id: business.id.clone(),
                                    entry_id: outcome.entry.id.clone(),
                                    position: outcome.entry.position,
                                });
                            }
                            followup = Some(Event::QueueResult(outcome));
                        }
                        Effect::CancelAppointment { appointment_id } => {
                            let outcome = booking::cancel_appointment(
                                &self.db,
                                &business.id,
                                &appointment_id,
                                &identity,
                                now,
                            )?;
                            if let CancelOutcome::Cancelled(appointment) = &outcome {
                                let _ = self.outcomes.send(BookingEvent::AppointmentCancelled {
                                    business_id: business.id.clone(),
                                    appointment_id: appointment.id.clone(),
                                });
                            }
                            followup = Some(Event::CancelResult(outcome));
                        }
                    }
                }

                rounds += 1;
                match followup {
                    Some(event) if rounds < 4 => {
                        current = transition(state, &context, &turn, &event);
                    }
                    _ => break,
                }
            }

            tracing::info!(
                business_id = %business.id,
                session = %session.id,
                from = ?from_state,
                to = ?state,
                "turn processed"
            );
        }

        session.state = state;
        session.context = context;
        self.sessions.save(&session)?;

        let reply = self.render(business, &session, &identity, &turn, &notices, now)?;
        self.db
            .record_outbound(&business.id, &uuid::Uuid::new_v4().to_string(), now)?;
        Ok(TurnOutcome {
            reply: Some(reply),
            duplicate: false,
        })
    }

    /// Gather the view data the landed state needs and compose the reply.
    fn render(
        &self,
        business: &Business,
        session: &crate::db::SessionRecord,
        identity: &CanonicalIdentity,
        turn: &TurnSnapshot,
        notices: &[Notice],
        now: DateTime<Utc>,
    ) -> Result<Reply, TurnError> {
        let state = session.state;
        let context = &session.context;

        // Slots for the pending employee/date when the prompt needs them.
        let slots = if state == ChatState::TimeSelect {
            match (&context.selected_employee_id, context.selected_date) {
                (Some(employee_id), Some(date)) => {
                    availability::slots(&self.db, &business.id, employee_id, date, now)?
                }
                _ => vec![],
            }
        } else {
            vec![]
        };

        // Cancellations during this turn change the list; refetch.
        let my_appointments = self.db.upcoming_appointments_for(
            &business.id,
            &identity.channel_user_ids,
            &identity.customer_ids,
            now,
        )?;

        let view = ReplyView {
            today: now.date_naive(),
            employees: &turn.employees,
            slots: &slots,
            my_appointments: &my_appointments,
            notices,
        };
        Ok(compose(state, context, &view))
    }

    fn announce_appointment(&self, business_id: &str, outcome: &AppointmentOutcome) {
        if let AppointmentOutcome::Booked(appointment) = outcome {
            let _ = self.outcomes.send(BookingEvent::AppointmentCreated {
                business_id: business_id.to_string(),
                appointment_id: appointment.id.clone(),
                starts_at: appointment.starts_at,
                approved: appointment.approved_at.is_some(),
            });
        }
    }
}
