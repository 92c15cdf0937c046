use axum::{Extension, Json, extract::State};

use courier_types::api::{Claims, UnreadTotalResponse};
use courier_types::models::Conversation;

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let user = claims.sub;
    let inbox = state
        .blocking(move |db| db.list_conversations(user))
        .await?;
    Ok(Json(inbox))
}

/// GET /conversations/unread
pub async fn unread_total(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadTotalResponse>> {
    let user = claims.sub;
    let total = state.blocking(move |db| Ok(db.unread_total(user))).await?;
    Ok(Json(UnreadTotalResponse { total }))
}
