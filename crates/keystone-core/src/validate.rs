// Field validation and masking helpers shared by request handling and services.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ServiceError;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 150;
pub const NICKNAME_MAX: usize = 50;
pub const BIO_MAX: usize = 500;
pub const OCCUPATION_MAX: usize = 100;
pub const COMPANY_MAX: usize = 200;
pub const ADDRESS_MAX: usize = 500;
pub const INTERESTS_MAX: usize = 1000;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email regex is valid")
});

// Mainland China mobile numbers.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^1[3-9]\d{9}$").expect("phone regex is valid"));

/// Validate and normalize a username: 3-150 characters of letters, digits,
/// `_` or `-`, lowercased.
pub fn normalize_username(username: &str) -> Result<String, ServiceError> {
    let trimmed = username.trim();
    let len = trimmed.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ServiceError::validation(format!(
            "Username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ServiceError::validation(
            "Username may only contain letters, digits, underscores and hyphens",
        ));
    }
    Ok(trimmed.to_lowercase())
}

/// Validate an email address and normalize its domain to lowercase.
pub fn normalize_email(email: &str) -> Result<String, ServiceError> {
    let trimmed = email.trim();
    if !EMAIL_RE.is_match(trimmed) {
        return Err(ServiceError::validation("Enter a valid email address"));
    }
    let (local, domain) = trimmed
        .rsplit_once('@')
        .ok_or_else(|| ServiceError::validation("Enter a valid email address"))?;
    Ok(format!("{local}@{}", domain.to_ascii_lowercase()))
}

pub fn validate_phone(phone: &str) -> Result<(), ServiceError> {
    if PHONE_RE.is_match(phone) {
        Ok(())
    } else {
        Err(ServiceError::validation("Enter a valid mobile phone number"))
    }
}

/// Reject `value` when it is longer than `max` characters.
pub fn max_chars(field: &str, value: &str, max: usize) -> Result<(), ServiceError> {
    if value.chars().count() > max {
        Err(ServiceError::validation(format!(
            "{field} must be at most {max} characters"
        )))
    } else {
        Ok(())
    }
}

/// Empty is allowed (clears the field); otherwise an absolute http(s) URL.
pub fn validate_website(url: &str) -> Result<(), ServiceError> {
    if url.is_empty() {
        return Ok(());
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') && !url.contains(' ') => Ok(()),
        _ => Err(ServiceError::validation("Enter a valid URL")),
    }
}

// ---------------------------------------------------------------------------
// Masking
// ---------------------------------------------------------------------------

/// `john.doe@example.com` -> `j*******@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let mut chars = local.chars();
            match chars.next() {
                Some(first) => {
                    let hidden = chars.count().max(1);
                    format!("{first}{}@{domain}", "*".repeat(hidden))
                }
                None => format!("***@{domain}"),
            }
        }
        None => mask_middle(email, 3),
    }
}

/// `13812345678` -> `138****5678`.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() != 11 {
        return mask_middle(phone, 3);
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[7..].iter().collect();
    format!("{head}****{tail}")
}

fn mask_middle(value: &str, show: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= show * 2 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..show].iter().collect();
    let tail: String = chars[chars.len() - show..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - show * 2))
}

// ---------------------------------------------------------------------------
// Client address
// ---------------------------------------------------------------------------

/// Resolve the client IP: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the socket peer. Unparseable header values are skipped.
pub fn client_ip(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<IpAddr>,
) -> Option<String> {
    let from_forwarded = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|v| v.parse::<IpAddr>().ok());
    let from_real = real_ip.map(str::trim).and_then(|v| v.parse::<IpAddr>().ok());

    from_forwarded
        .or(from_real)
        .or(peer)
        .map(|ip| ip.to_string())
}
