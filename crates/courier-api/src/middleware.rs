use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use courier_types::api::Claims;

use crate::state::AppState;

/// Verify a bearer token. Shared with the gateway upgrade, which takes the
/// token from the query string instead of a header.
pub fn verify_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(token, &state.jwt_secret).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    fn token(sub: Uuid, secret: &str, exp: usize) -> String {
        encode(
            &Header::default(),
            &Claims { sub, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_only_tokens_signed_with_the_secret() {
        let user = Uuid::new_v4();
        let exp = (chrono::Utc::now().timestamp() + 3600) as usize;

        let claims = verify_token(&token(user, "s3cret", exp), "s3cret").unwrap();
        assert_eq!(claims.sub, user);

        assert!(verify_token(&token(user, "other", exp), "s3cret").is_none());
        assert!(verify_token("not-a-jwt", "s3cret").is_none());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let exp = (chrono::Utc::now().timestamp() - 3600) as usize;
        assert!(verify_token(&token(Uuid::new_v4(), "s3cret", exp), "s3cret").is_none());
    }
}
