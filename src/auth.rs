use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::AppError;

/// Claims carried by tokens issued by the login service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub exp: usize,
}

pub fn verify(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|err| {
        debug!(error = %err, "rejected bearer token");
        AppError::Unauthorized("Invalid or expired token".into())
    })
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Guards `/api`. Without a configured secret every request passes through.
pub async fn require_bearer(
    State(auth): State<Arc<AuthConfig>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(secret) = auth.jwt_secret.as_deref() else {
        return Ok(next.run(req).await);
    };

    let token = bearer_token(&req)
        .ok_or_else(|| AppError::Unauthorized("Access token required".into()))?;
    let claims = verify(token, secret)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::Value;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn token(secret: &str, exp_offset: i64) -> String {
        let claims = Claims {
            user_id: 42,
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("token encodes")
    }

    fn guarded(secret: Option<&str>) -> Router {
        let auth = Arc::new(AuthConfig {
            jwt_secret: secret.map(str::to_string),
        });
        Router::new()
            .route(
                "/whoami",
                get(|claims: Option<Extension<Claims>>| async move {
                    claims.map(|Extension(c)| c.user_id.to_string()).unwrap_or_default()
                }),
            )
            .layer(middleware::from_fn_with_state(auth, require_bearer))
    }

    async fn call(router: Router, authorization: Option<String>) -> (StatusCode, Vec<u8>) {
        let mut request = HttpRequest::get("/whoami");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        let response = router
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn valid_token_exposes_claims() {
        let (status, body) = call(guarded(Some(SECRET)), Some(format!("Bearer {}", token(SECRET, 3600)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"42");
    }

    #[tokio::test]
    async fn missing_token_is_rejected_with_envelope() {
        let (status, body) = call(guarded(Some(SECRET)), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Access token required");
    }

    #[tokio::test]
    async fn wrong_secret_and_expired_tokens_fail() {
        let (status, _) = call(guarded(Some(SECRET)), Some(format!("Bearer {}", token("other", 3600)))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(guarded(Some(SECRET)), Some(format!("Bearer {}", token(SECRET, -3600)))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn open_when_no_secret_configured() {
        let (status, body) = call(guarded(None), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }
}
