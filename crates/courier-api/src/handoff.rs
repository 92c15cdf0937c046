use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;
use uuid::Uuid;

use courier_db::queries::handoff::HandoffOutcome;
use courier_gateway::dispatcher::Dispatcher;
use courier_types::api::{
    Claims, DeliveryCodeRequest, DeliveryCodeResponse, HandoffRequest, HandoffResponse,
};
use courier_types::events::ChangeEvent;

use crate::error::ApiResult;
use crate::state::AppState;

/// Tell open conversations about an applied transition: the system message
/// first, then the new booking state.
pub(crate) fn publish_handoff(dispatcher: &Dispatcher, outcome: &HandoffOutcome) {
    let booking_id = outcome.booking.id;
    dispatcher.publish(
        booking_id,
        ChangeEvent::MessageCreate {
            message: outcome.system_message.clone(),
        },
    );
    dispatcher.publish(
        booking_id,
        ChangeEvent::BookingUpdate {
            status: outcome.booking.status,
            handoff_step: outcome.booking.handoff_step,
        },
    );
}

/// POST /bookings/{booking_id}/handoff
pub async fn confirm_handoff(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<HandoffRequest>,
) -> ApiResult<Json<HandoffResponse>> {
    let actor = claims.sub;
    let outcome = state
        .publishing(move |db, dispatcher| {
            let outcome = db.confirm_handoff(booking_id, actor, req.step)?;
            publish_handoff(dispatcher, &outcome);
            Ok(outcome)
        })
        .await?;

    Ok(Json(HandoffResponse {
        booking: outcome.booking.redacted_for(actor),
        system_message: outcome.system_message,
        delivery_code: outcome.delivery_code,
    }))
}

/// POST /bookings/{booking_id}/delivery-code
///
/// Always answers `{valid}`; a wrong code, a wrong state and a storage
/// failure all read as `false`.
pub async fn validate_delivery_code(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DeliveryCodeRequest>,
) -> ApiResult<Json<DeliveryCodeResponse>> {
    let sender = claims.sub;
    let outcome = state
        .publishing(move |db, dispatcher| {
            let outcome = db.redeem_delivery_code(booking_id, &req.code, sender);
            if let Ok(Some(outcome)) = &outcome {
                publish_handoff(dispatcher, outcome);
            }
            Ok(outcome)
        })
        .await?;

    let valid = match outcome {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(e) => {
            debug!("Delivery code check on {} failed closed: {}", booking_id, e);
            false
        }
    };

    Ok(Json(DeliveryCodeResponse { valid }))
}
