use subtle::ConstantTimeEq;

/// Header Telegram echoes back when the webhook was registered with a secret.
pub const WEBHOOK_SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Constant-time string comparison for secrets
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Accept a webhook call when no secret is configured, or when the provided
/// header matches the configured secret.
pub fn verify_webhook_secret(expected: Option<&str>, provided: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => provided.is_some_and(|provided| constant_time_compare(expected, provided)),
    }
}
