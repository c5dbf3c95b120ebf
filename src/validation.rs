use lazy_static::lazy_static;
use regex::Regex;

use crate::error::FieldErrors;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,50}$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn check_username(errors: &mut FieldErrors, field: &'static str, username: &str) {
    if !USERNAME_RE.is_match(username) {
        errors.add(
            field,
            "Username must be 3-50 characters of letters, digits, '.', '_' or '-'",
        );
    }
}

/// Expects an already normalized address.
pub fn check_email(errors: &mut FieldErrors, field: &'static str, email: &str) {
    if !is_valid_email(email) {
        errors.add(field, "Invalid email");
    }
}

pub fn check_password(errors: &mut FieldErrors, field: &'static str, password: &str) {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        errors.add(field, "Password too short");
    } else if len > MAX_PASSWORD_LEN {
        errors.add(field, "Password too long");
    }
}

pub fn check_name(errors: &mut FieldErrors, field: &'static str, name: &str) {
    let len = name.trim().chars().count();
    if len == 0 {
        errors.add(field, "Name is required");
    } else if len > 100 {
        errors.add(field, "Name too long");
    }
}
