use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use courier_types::api::{Claims, SubmitRatingRequest};
use courier_types::models::{Rating, RatingSummary};

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /bookings/{booking_id}/ratings
pub async fn submit_rating(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitRatingRequest>,
) -> ApiResult<(StatusCode, Json<Rating>)> {
    let rater = claims.sub;
    let rating = state
        .blocking(move |db| {
            db.submit_rating(booking_id, rater, req.rated_id, req.score, req.comment.as_deref())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// GET /bookings/{booking_id}/ratings/mine
///
/// `null` until the caller has rated this booking.
pub async fn my_rating(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Option<Rating>>> {
    let rater = claims.sub;
    let rating = state
        .blocking(move |db| Ok(db.rating_for_booking(booking_id, rater)))
        .await?;
    Ok(Json(rating))
}

/// GET /users/{user_id}/rating
pub async fn user_rating(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<RatingSummary>> {
    let summary = state
        .blocking(move |db| Ok(db.average_rating(user_id)))
        .await?;
    Ok(Json(summary))
}
