//! Wire types for the HTTP surface

use crate::reply::Reply;
use crate::runtime::InboundMessage;
use crate::state_machine::{Selection, SelectionKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The abstracted inbound event from the messaging channel adapter.
#[derive(Debug, Deserialize)]
pub struct InboundPayload {
    pub external_identity: String,
    pub message_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub selection: Option<SelectionPayload>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionPayload {
    pub kind: SelectionKind,
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl From<InboundPayload> for InboundMessage {
    fn from(payload: InboundPayload) -> Self {
        InboundMessage {
            external_identity: payload.external_identity,
            message_id: payload.message_id,
            display_name: payload.display_name,
            text: payload.text,
            selection: payload.selection.map(|s| Selection {
                kind: s.kind,
                id: s.id,
                title: s.title,
            }),
        }
    }
}

/// The webhook always acknowledges; the reply rides along when one was
/// composed.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub ack: bool,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub employee_id: String,
    pub date: NaiveDate,
    pub slots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub date: NaiveDate,
    pub entries: Vec<crate::db::QueueEntry>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
