use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use constant_time_eq::constant_time_eq;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    middleware::auth::{AdminClaims, ADMIN_ROLE},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/admin/login", post(login_admin))
}

/// POST /api/admin/login
async fn login_admin(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    // Both comparisons always run so timing does not reveal which field was wrong.
    let user_ok = constant_time_eq(payload.username.as_bytes(), state.auth.admin_user.as_bytes());
    let password_ok = constant_time_eq(payload.password.as_bytes(), state.auth.admin_password.as_bytes());
    if !(user_ok & password_ok) {
        tracing::warn!(username = %payload.username, "Admin login failed");
        return Err(AppError::AuthenticationError("Invalid credentials".to_string()));
    }

    let claims = AdminClaims {
        sub: payload.username,
        role: ADMIN_ROLE.to_owned(),
        exp: (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp() as usize,
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(state.auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))?;

    tracing::info!(username = %claims.sub, "Admin logged in");
    Ok(Json(AuthResponse { token }))
}
