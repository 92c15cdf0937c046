use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use courier_db::queries::messages::ChatOutcome;
use courier_types::api::{Claims, DeliveredResponse, MarkReadResponse, SendMessageRequest};
use courier_types::events::ChangeEvent;
use courier_types::models::Message;

use crate::error::ApiResult;
use crate::handoff::publish_handoff;
use crate::state::AppState;

/// GET /bookings/{booking_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Message>>> {
    let viewer = claims.sub;
    let messages = state
        .blocking(move |db| db.list_messages(booking_id, viewer))
        .await?;
    Ok(Json(messages))
}

/// POST /bookings/{booking_id}/messages
///
/// 201 with the stored message, or 200 `{delivered: true}` when the sender
/// typed the delivery code into the chat.
pub async fn send_message(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Response> {
    let author = claims.sub;
    let outcome = state
        .publishing(move |db, dispatcher| {
            let outcome = db.send_or_redeem(booking_id, author, &req.content)?;
            match &outcome {
                ChatOutcome::Sent(message) => {
                    dispatcher.publish(
                        booking_id,
                        ChangeEvent::MessageCreate {
                            message: message.clone(),
                        },
                    );
                }
                ChatOutcome::Delivered(outcome) => publish_handoff(dispatcher, outcome),
            }
            Ok(outcome)
        })
        .await?;

    match outcome {
        ChatOutcome::Sent(message) => Ok((StatusCode::CREATED, Json(message)).into_response()),
        ChatOutcome::Delivered(outcome) => {
            Ok(Json(DeliveredResponse {
                delivered: true,
                booking: outcome.booking.redacted_for(author),
            })
            .into_response())
        }
    }
}

/// POST /bookings/{booking_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MarkReadResponse>> {
    let reader = claims.sub;
    let receipt = state
        .publishing(move |db, dispatcher| {
            let receipt = db.mark_read(booking_id, reader)?;
            if let Some(read_at) = receipt.read_at {
                dispatcher.publish(
                    booking_id,
                    ChangeEvent::MessageRead {
                        message_ids: receipt.message_ids.clone(),
                        read_at,
                    },
                );
            }
            Ok(receipt)
        })
        .await?;

    Ok(Json(MarkReadResponse {
        message_ids: receipt.message_ids,
        read_at: receipt.read_at,
    }))
}
