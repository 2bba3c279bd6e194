use anyhow::{Result, anyhow};
use chrono::DateTime;

use crate::models::event::IngestRequest;

pub fn validate_ingest_request(request: &IngestRequest) -> Result<()> {
    if request.event_type.trim().is_empty() {
        return Err(anyhow!("eventType cannot be empty"));
    }

    if DateTime::parse_from_rfc3339(&request.timestamp).is_err() {
        return Err(anyhow!("timestamp must be an ISO-8601 date"));
    }

    if let Some(event_id) = &request.event_id {
        if event_id.len() > 255 {
            return Err(anyhow!("eventId too long (maximum 255 characters)"));
        }
    }

    validate_email(&request.payload.email)?;

    let username_len = request.payload.username.chars().count();
    if !(3..=30).contains(&username_len) {
        return Err(anyhow!("username must be between 3 and 30 characters"));
    }

    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| anyhow!("email must contain '@'"))?;

    if local.is_empty() || email.chars().any(char::is_whitespace) {
        return Err(anyhow!("email is not a valid address"));
    }

    match domain.split_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() && !tld.ends_with('.') => Ok(()),
        _ => Err(anyhow!("email domain is not valid")),
    }
}
