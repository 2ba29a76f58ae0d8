//! HTTP request handlers

use super::types::{
    AvailabilityResponse, ErrorResponse, InboundPayload, QueueResponse, WebhookResponse,
};
use super::AppState;
use crate::availability;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Inbound events from the messaging channel adapter
        .route("/hook/:slug/messages", post(inbound_message))
        // The web booking page's view of the availability engine
        .route("/api/:slug/availability", get(get_availability))
        // Today's queue, for the business dashboard
        .route("/api/:slug/queue", get(get_queue))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// One conversation turn. Anything that goes wrong after decode is logged
/// and still acknowledged with a 200, so the transport does not redeliver.
async fn inbound_message(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<InboundPayload>,
) -> Response {
    let business = match state.db.get_business_by_slug(&slug) {
        Ok(Some(business)) => business,
        Ok(None) => return AppError::NotFound(format!("unknown business: {slug}")).into_response(),
        Err(e) => {
            // Still a 200: a transport retry storm helps nobody while
            // storage is down.
            tracing::error!(slug, error = %e, "business lookup failed");
            return Json(WebhookResponse {
                ack: true,
                duplicate: false,
                reply: None,
            })
            .into_response();
        }
    };

    let message = payload.into();
    match state.runtime.process(&business, &message, Utc::now()) {
        Ok(outcome) => Json(WebhookResponse {
            ack: true,
            duplicate: outcome.duplicate,
            reply: outcome.reply,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(
                business_id = %business.id,
                message_id = %message.message_id,
                error = %e,
                "turn failed"
            );
            Json(WebhookResponse {
                ack: true,
                duplicate: false,
                reply: None,
            })
            .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    employee_id: String,
    date: String,
}

async fn get_availability(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let business = state
        .db
        .get_business_by_slug(&slug)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("unknown business: {slug}")))?;

    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("date must be YYYY-MM-DD".to_string()))?;

    let slots = availability::slots(
        &state.db,
        &business.id,
        &query.employee_id,
        date,
        Utc::now(),
    )
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(AvailabilityResponse {
        employee_id: query.employee_id,
        date,
        slots: slots
            .into_iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct QueueQuery {
    date: Option<String>,
}

async fn get_queue(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<QueueResponse>, AppError> {
    let business = state
        .db
        .get_business_by_slug(&slug)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("unknown business: {slug}")))?;

    let date = match query.date {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| AppError::BadRequest("date must be YYYY-MM-DD".to_string()))?,
        None => Utc::now().date_naive(),
    };

    let entries = state
        .db
        .queue_entries_for_day(&business.id, date)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(QueueResponse { date, entries }))
}

/// Error type for handlers
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
