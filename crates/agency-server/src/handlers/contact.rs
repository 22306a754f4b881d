use agency_common::api::{ContactRequest, ContactResponse};
use axum::extract::State;
use axum::Json;

use crate::error::{Result, ServerError};
use crate::router::AppState;

const MAX_NAME_LEN: usize = 200;
const MAX_EMAIL_LEN: usize = 320;
const MAX_COMPANY_LEN: usize = 200;
const MAX_MESSAGE_LEN: usize = 5000;

#[tracing::instrument(skip_all)]
pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<ContactRequest>,
) -> Result<Json<ContactResponse>> {
    let req = validate(req)?;
    state.relay.deliver(&req).await?;

    Ok(Json(ContactResponse {
        status: "sent".to_string(),
    }))
}

/// Trim every field and check it against the form's limits.
fn validate(req: ContactRequest) -> Result<ContactRequest> {
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_string();
    let message = req.message.trim().to_string();
    let company = req
        .company
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    if name.is_empty() || email.is_empty() || message.is_empty() {
        return Err(ServerError::Validation(
            "name, email, and message are required".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ServerError::Validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if email.len() > MAX_EMAIL_LEN || !looks_like_email(&email) {
        return Err(ServerError::Validation("invalid email address".to_string()));
    }
    if company.as_ref().is_some_and(|c| c.chars().count() > MAX_COMPANY_LEN) {
        return Err(ServerError::Validation(format!(
            "company must be at most {MAX_COMPANY_LEN} characters"
        )));
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ServerError::Validation(format!(
            "message must be at most {MAX_MESSAGE_LEN} characters"
        )));
    }

    Ok(ContactRequest {
        name,
        email,
        message,
        company,
    })
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.chars().any(char::is_whitespace)
        && !domain.contains('@')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, email: &str, message: &str) -> ContactRequest {
        ContactRequest {
            name: name.to_string(),
            email: email.to_string(),
            message: message.to_string(),
            company: None,
        }
    }

    #[test]
    fn test_validate_trims_fields() {
        let mut req = request("  Ada ", " ada@example.com ", " Hello ");
        req.company = Some("   ".to_string());

        let req = validate(req).unwrap();
        assert_eq!(req.name, "Ada");
        assert_eq!(req.email, "ada@example.com");
        assert_eq!(req.message, "Hello");
        assert_eq!(req.company, None);
    }

    #[test]
    fn test_validate_requires_fields() {
        assert!(validate(request("", "ada@example.com", "Hello")).is_err());
        assert!(validate(request("Ada", "ada@example.com", "   ")).is_err());
    }

    #[test]
    fn test_validate_rejects_long_message() {
        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(validate(request("Ada", "ada@example.com", &long)).is_err());
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("ada@example.com"));
        assert!(looks_like_email("a.b+c@sub.example.co"));
        assert!(!looks_like_email("ada"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("ada@localhost"));
        assert!(!looks_like_email("ada@.example.com"));
        assert!(!looks_like_email("ada@example.com."));
        assert!(!looks_like_email("a da@example.com"));
        assert!(!looks_like_email("ada@ex@ample.com"));
    }
}
