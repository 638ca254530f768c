//! JWT-based tenant/user extraction for push connections (§5). Every
//! `/stream*` and `/ws*` request must present a bearer token whose claims
//! name the tenant the connection is scoped to; the gateway never trusts a
//! client-supplied tenant_id query parameter.
//!
//! `/ws*`'s credential is passed at handshake, header-only. `/stream*` also
//! accepts it as a `?token=` query parameter, since `EventSource` (the usual
//! SSE client) cannot set a custom `Authorization` header.

use actix_web::HttpRequest;
use error_types::ServiceError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn header_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn query_token(req: &HttpRequest) -> Option<String> {
    actix_web::web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
}

fn bearer_token(req: &HttpRequest) -> Result<String, ServiceError> {
    header_token(req)
        .ok_or_else(|| ServiceError::Validation("missing or malformed Authorization header".to_string()))
}

fn bearer_token_or_query(req: &HttpRequest) -> Result<String, ServiceError> {
    header_token(req).or_else(|| query_token(req)).ok_or_else(|| {
        ServiceError::Validation("missing credential (Authorization header or ?token=)".to_string())
    })
}

fn decode_claims(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| ServiceError::Validation(format!("invalid token: {e}")))?;
    Ok(data.claims)
}

fn auth_secret(req: &HttpRequest) -> String {
    req.app_data::<actix_web::web::Data<crate::config::Config>>()
        .map(|c| c.auth_secret())
        .unwrap_or_default()
}

pub fn tenant_id_from_request(req: &HttpRequest) -> Result<String, ServiceError> {
    let secret = auth_secret(req);
    let token = bearer_token(req)?;
    let claims = decode_claims(&token, &secret)?;
    Ok(claims.tenant_id)
}

pub fn user_id_from_request(req: &HttpRequest) -> Option<String> {
    let secret = auth_secret(req);
    let token = bearer_token(req).ok()?;
    decode_claims(&token, &secret).ok().map(|c| c.sub)
}

/// The token's `exp` claim as a unix timestamp, so a long-lived push
/// connection can be closed once its credential expires instead of staying
/// open on a stale grant indefinitely.
pub fn expiry_from_request(req: &HttpRequest) -> Option<i64> {
    let secret = auth_secret(req);
    let token = bearer_token(req).ok()?;
    decode_claims(&token, &secret).ok().map(|c| c.exp as i64)
}

/// Same as [`tenant_id_from_request`] but also accepts the credential as a
/// `?token=` query parameter, for `/stream*`.
pub fn stream_tenant_id_from_request(req: &HttpRequest) -> Result<String, ServiceError> {
    let secret = auth_secret(req);
    let token = bearer_token_or_query(req)?;
    let claims = decode_claims(&token, &secret)?;
    Ok(claims.tenant_id)
}

pub fn stream_user_id_from_request(req: &HttpRequest) -> Option<String> {
    let secret = auth_secret(req);
    let token = bearer_token_or_query(req).ok()?;
    decode_claims(&token, &secret).ok().map(|c| c.sub)
}
