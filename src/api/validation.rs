//! Input validation for API requests.
//!
//! Field validators return `Result<(), String>`; the request validators at the
//! bottom collect them into a single `ApiError` through
//! `ValidationErrorBuilder`.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{
    normalize_timestamp, CreateContactRequest, CreatePatientRequest, CreateSessionRequest,
    CreateTherapistRequest, Modality, UpdatePatientRequest, UpdateSessionRequest,
    UpdateTherapistRequest,
};

lazy_static! {
    /// Pragmatic email check: one @, no spaces, a dot in the domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^@\s]+@[^@\s]+\.[^@\s]+$"
    ).unwrap();

    /// Digits with optional leading + or area-code parenthesis and common separators
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9(][0-9 ().-]{5,24}$"
    ).unwrap();

    /// Site content keys (lowercase, dots, dashes, underscores)
    static ref CONTENT_KEY_REGEX: Regex = Regex::new(
        r"^[a-z0-9][a-z0-9._-]{0,63}$"
    ).unwrap();
}

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_MESSAGE_LEN: usize = 5000;
pub const MAX_BIO_LEN: usize = 5000;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_PHONE_DIGITS: usize = 7;
pub const MAX_SESSION_MINUTES: i64 = 480;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name is too long (max {} characters)", MAX_NAME_LEN));
    }
    Ok(())
}

/// Optional phone; empty is treated as absent
pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    match phone.as_deref().map(str::trim) {
        None | Some("") => Ok(()),
        Some(p) if PHONE_REGEX.is_match(p) && digit_count(p) >= MIN_PHONE_DIGITS => Ok(()),
        Some(_) => Err("Invalid phone number".to_string()),
    }
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(char::is_ascii_digit).count()
}

pub fn validate_message(message: &str) -> Result<(), String> {
    let message = message.trim();
    if message.is_empty() {
        return Err("Message is required".to_string());
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(format!("Message is too long (max {} characters)", MAX_MESSAGE_LEN));
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain at least one letter and one number".to_string());
    }
    Ok(())
}

pub fn validate_modality(modality: &Option<String>) -> Result<(), String> {
    match modality {
        Some(m) if Modality::from_str(m).is_none() => {
            Err("Modality must be one of: online, in_person, both".to_string())
        }
        _ => Ok(()),
    }
}

/// Money amounts in cents must not be negative
pub fn validate_cents(cents: Option<i64>) -> Result<(), String> {
    match cents {
        Some(c) if c < 0 => Err("Amount cannot be negative".to_string()),
        _ => Ok(()),
    }
}

pub fn validate_duration(minutes: Option<i64>) -> Result<(), String> {
    match minutes {
        Some(m) if !(1..=MAX_SESSION_MINUTES).contains(&m) => Err(format!(
            "Duration must be between 1 and {} minutes",
            MAX_SESSION_MINUTES
        )),
        _ => Ok(()),
    }
}

pub fn validate_timestamp(value: &str) -> Result<(), String> {
    if normalize_timestamp(value).is_none() {
        return Err("Must be an RFC 3339 timestamp".to_string());
    }
    Ok(())
}

pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }
    Ok(())
}

pub fn validate_content_key(key: &str) -> Result<(), String> {
    if !CONTENT_KEY_REGEX.is_match(key) {
        return Err("Content key must be lowercase letters, digits, '.', '-' or '_'".to_string());
    }
    Ok(())
}

pub fn validate_string_list(items: &[String], field: &str) -> Result<(), String> {
    if items.len() > 30 {
        return Err(format!("Too many {} (max 30)", field));
    }
    if items.iter().any(|s| s.trim().is_empty() || s.len() > 60) {
        return Err(format!("Each entry in {} must be 1-60 characters", field));
    }
    Ok(())
}

pub fn validate_contact_request(req: &CreateContactRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("therapist_id", validate_uuid(&req.therapist_id, "therapist id"))
        .check("full_name", validate_name(&req.full_name))
        .check("email", validate_email(&req.email))
        .check("phone", validate_phone(&req.phone))
        .check("message", validate_message(&req.message))
        .check("preferred_modality", validate_modality(&req.preferred_modality));
    errors.finish()
}

pub fn validate_create_therapist(req: &CreateTherapistRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("full_name", validate_name(&req.full_name))
        .check("email", validate_email(&req.email))
        .check("phone", validate_phone(&req.phone))
        .check("modality", validate_modality(&req.modality))
        .check("specialties", validate_string_list(&req.specialties, "specialties"))
        .check("languages", validate_string_list(&req.languages, "languages"))
        .check("price_per_session_cents", validate_cents(req.price_per_session_cents))
        .check("commission_rate_cents", validate_cents(req.commission_rate_cents));
    if let Some(bio) = &req.bio {
        if bio.chars().count() > MAX_BIO_LEN {
            errors.add("bio", format!("Bio is too long (max {} characters)", MAX_BIO_LEN));
        }
    }
    errors.finish()
}

pub fn validate_update_therapist(req: &UpdateTherapistRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.full_name {
        errors.check("full_name", validate_name(name));
    }
    if let Some(email) = &req.email {
        errors.check("email", validate_email(email));
    }
    if let Some(items) = &req.specialties {
        errors.check("specialties", validate_string_list(items, "specialties"));
    }
    if let Some(items) = &req.languages {
        errors.check("languages", validate_string_list(items, "languages"));
    }
    if let Some(bio) = &req.bio {
        if bio.chars().count() > MAX_BIO_LEN {
            errors.add("bio", format!("Bio is too long (max {} characters)", MAX_BIO_LEN));
        }
    }
    errors
        .check("phone", validate_phone(&req.phone))
        .check("modality", validate_modality(&req.modality))
        .check("price_per_session_cents", validate_cents(req.price_per_session_cents))
        .check("commission_rate_cents", validate_cents(req.commission_rate_cents));
    errors.finish()
}

pub fn validate_create_patient(req: &CreatePatientRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("full_name", validate_name(&req.full_name))
        .check("phone", validate_phone(&req.phone));
    if let Some(email) = req.email.as_deref().filter(|e| !e.trim().is_empty()) {
        errors.check("email", validate_email(email));
    }
    errors.finish()
}

pub fn validate_update_patient(req: &UpdatePatientRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.full_name {
        errors.check("full_name", validate_name(name));
    }
    if let Some(email) = req.email.as_deref().filter(|e| !e.trim().is_empty()) {
        errors.check("email", validate_email(email));
    }
    errors.check("phone", validate_phone(&req.phone));
    errors.finish()
}

pub fn validate_create_session(req: &CreateSessionRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("scheduled_at", validate_timestamp(&req.scheduled_at))
        .check("duration_minutes", validate_duration(req.duration_minutes));
    errors.finish()
}

pub fn validate_update_session(req: &UpdateSessionRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(at) = &req.scheduled_at {
        errors.check("scheduled_at", validate_timestamp(at));
    }
    errors.check("duration_minutes", validate_duration(req.duration_minutes));
    if let Some(status) = &req.status {
        if crate::db::SessionStatus::from_str(status).is_none() {
            errors.add(
                "status",
                "Status must be one of: scheduled, completed, cancelled, no_show",
            );
        }
    }
    errors.finish()
}
