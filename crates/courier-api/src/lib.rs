pub mod conversations;
pub mod error;
pub mod handoff;
pub mod messages;
pub mod middleware;
pub mod ratings;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Every REST route, behind bearer-token auth.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/unread", get(conversations::unread_total))
        .route(
            "/bookings/{booking_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/bookings/{booking_id}/read", post(messages::mark_read))
        .route("/bookings/{booking_id}/handoff", post(handoff::confirm_handoff))
        .route(
            "/bookings/{booking_id}/delivery-code",
            post(handoff::validate_delivery_code),
        )
        .route("/bookings/{booking_id}/ratings", post(ratings::submit_rating))
        .route("/bookings/{booking_id}/ratings/mine", get(ratings::my_rating))
        .route("/users/{user_id}/rating", get(ratings::user_rating))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;
    use uuid::Uuid;

    use courier_types::api::Claims;

    fn bearer(app: &TestApp, user: Uuid) -> String {
        let claims = Claims {
            sub: user,
            exp: (chrono::Utc::now().timestamp() + 600) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(app.state.jwt_secret.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn requests_without_a_valid_token_are_refused() {
        let app = TestApp::new();
        let router = routes(app.state.clone());

        let response = router
            .clone()
            .oneshot(Request::get("/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(
                Request::get("/conversations")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn handoff_over_http() {
        let app = TestApp::new();
        let router = routes(app.state.clone());
        let uri = format!("/bookings/{}/handoff", app.booking_id);

        let response = router
            .clone()
            .oneshot(
                Request::post(&uri)
                    .header(header::AUTHORIZATION, bearer(&app, app.sender))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"step":"sender_confirmed"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["booking"]["handoff_step"], "sender_confirmed");
        assert_eq!(json["system_message"]["content"], "[HANDOFF] sender_confirmed");

        // repeating the step is stale
        let response = router
            .oneshot(
                Request::post(&uri)
                    .header(header::AUTHORIZATION, bearer(&app, app.sender))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"step":"sender_confirmed"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("conflict"));
    }
}
