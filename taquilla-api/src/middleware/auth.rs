use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use taquilla_core::identity::{Caller, Role};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "ADMIN" => Some(Role::Admin),
        "ORGANIZER" => Some(Role::Organizer),
        "BUYER" => Some(Role::Buyer),
        _ => None,
    }
}

/// Decodes the bearer token and injects a `Caller` into request extensions.
/// Handlers downstream never look at the token again; they receive the
/// caller identity as plain data.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let role = parse_role(&token_data.claims.role).ok_or(StatusCode::FORBIDDEN)?;
    let caller = Caller::new(token_data.claims.sub, role);

    req.extensions_mut().insert(caller);

    Ok(next.run(req).await)
}
