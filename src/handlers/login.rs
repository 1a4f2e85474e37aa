use axum::{Json, extract::State};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use crate::error::ApiError;
use crate::models::LoginRequest;
use crate::state::AppState;

fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Admin login - behind the login preset, five tries per 15 minutes
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".to_string()));
    }

    let expected = state
        .admin_password_sha256
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;

    if !password_digest(&payload.password).eq_ignore_ascii_case(expected.trim()) {
        warn!(email = %payload.email, "Failed login attempt");
        return Err(ApiError::Unauthorized);
    }

    info!(email = %payload.email, "Admin logged in");
    Ok(Json(serde_json::json!({ "authenticated": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        assert_eq!(
            password_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
