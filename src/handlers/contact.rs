use axum::{Json, http::StatusCode};
use tracing::info;
use crate::error::ApiError;
use crate::models::ContactRequest;

const MAX_MESSAGE_LEN: usize = 5000;

fn validate(req: &ContactRequest) -> Result<(), ApiError> {
    if req.name.trim().is_empty() || req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Name and message are required".to_string()));
    }
    let email = req.email.trim();
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => {}
        _ => return Err(ApiError::BadRequest("A valid email address is required".to_string())),
    }
    if req.message.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest("Message is too long".to_string()));
    }
    Ok(())
}

// Contact form - queued for the mail provider, behind the email preset
pub async fn contact_handler(
    Json(payload): Json<ContactRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    validate(&payload)?;

    info!(
        from = %payload.email,
        name = %payload.name,
        length = payload.message.len(),
        "Contact message queued"
    );
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "queued" }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, email: &str, message: &str) -> ContactRequest {
        ContactRequest {
            name: name.to_string(),
            email: email.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn rejects_incomplete_forms() {
        assert!(validate(&form("Ann", "ann@example.org", "hello")).is_ok());
        assert!(validate(&form("", "ann@example.org", "hello")).is_err());
        assert!(validate(&form("Ann", "ann@example.org", "  ")).is_err());
        assert!(validate(&form("Ann", "ann.example.org", "hello")).is_err());
        assert!(validate(&form("Ann", "@example.org", "hello")).is_err());
        assert!(validate(&form("Ann", "ann@example.org", &"x".repeat(5001))).is_err());
    }
}
