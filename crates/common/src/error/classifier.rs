//! Pure error classification.
//!
//! [`classify`] is total and side-effect free. For remote errors the category
//! is decided by, in order:
//!
//! 1. the service-specific error code,
//! 2. the HTTP-like status code,
//! 3. keyword patterns in the message.
//!
//! Locally produced variants (timeouts, rate limiting, open circuits,
//! validation, oversized results) map directly to their category.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ErrorCategory, ErrorClassification, ErrorSeverity, ServiceError};

static AUTH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)unauthori[sz]ed|forbidden|authenticat|credential|subscription key|api key|",
        r"access denied|token (expired|invalid)",
    ))
    .ok()
});

static QUOTA_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)quota|rate.?limit|too many requests|throttl").ok()
});

static AUDIO_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)audio|codec|sample rate|unsupported (media|format)|invalid format|file format|corrupt").ok()
});

static NETWORK_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)network|timed? ?out|connection|econn|socket|dns|unreachable|offline").ok()
});

static SERVICE_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)unavailable|internal server|overloaded|bad gateway|maintenance").ok()
});

/// Classify an error. Never panics.
pub fn classify(error: &ServiceError) -> ErrorClassification {
    match error {
        ServiceError::Remote { code, status, message, retry_after } => {
            let category = code
                .as_deref()
                .and_then(category_for_code)
                .or_else(|| status.and_then(category_for_status))
                .unwrap_or_else(|| category_for_message(message));
            let classification = ErrorClassification::for_category(category);
            match retry_after {
                Some(hint) if classification.retryable => classification.with_recovery(*hint),
                _ => classification,
            }
        }
        ServiceError::Transport { .. } => ErrorClassification::for_category(ErrorCategory::Network),
        ServiceError::Timeout { timeout, .. } => {
            ErrorClassification::for_category(ErrorCategory::Network)
                .with_suggestion(format!(
                    "The call did not finish within {}s; it will be retried.",
                    timeout.as_secs()
                ))
        }
        ServiceError::RateLimited { retry_after, .. } => {
            ErrorClassification::for_category(ErrorCategory::Quota).with_recovery(*retry_after)
        }
        ServiceError::CircuitOpen { retry_after, .. } => {
            ErrorClassification::for_category(ErrorCategory::CircuitOpen)
                .with_recovery(*retry_after)
        }
        ServiceError::Validation { errors } => {
            ErrorClassification::for_category(ErrorCategory::Configuration)
                .with_suggestion(format!("Fix the request: {}", errors.join("; ")))
        }
        ServiceError::ResultTooLarge { max, .. } => {
            ErrorClassification::for_category(ErrorCategory::Audio).with_suggestion(format!(
                "The transcript exceeds {max} bytes; split the audio into shorter files."
            ))
        }
        ServiceError::MalformedResult { .. } => {
            ErrorClassification::for_category(ErrorCategory::Audio)
                .with_suggestion("The result document was corrupted; resubmit the audio.")
        }
        ServiceError::Cancelled => ErrorClassification::for_category(ErrorCategory::Unknown)
            .non_retryable()
            .with_severity(ErrorSeverity::Info)
            .with_suggestion("The job was cancelled."),
        ServiceError::Internal { .. } => ErrorClassification::for_category(ErrorCategory::Unknown)
            .non_retryable()
            .with_severity(ErrorSeverity::Critical)
            .with_suggestion("An internal error occurred; report it with the job id.")
            .with_recovery(Duration::ZERO),
    }
}

/// Map a service error code to a category. Matching ignores case and
/// punctuation, so `too_many_requests` and `TooManyRequests` agree.
fn category_for_code(code: &str) -> Option<ErrorCategory> {
    let normalized: String =
        code.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_lowercase()).collect();

    let category = match normalized.as_str() {
        "unauthorized" | "forbidden" | "invalidsubscriptionkey" | "invalidcredentials"
        | "authenticationfailed" | "tokenexpired" | "accessdenied" | "invalidapikey" => {
            ErrorCategory::Authentication
        }
        "toomanyrequests" | "quotaexceeded" | "ratelimitexceeded" | "throttled"
        | "insufficientquota" => ErrorCategory::Quota,
        "invalidaudioformat" | "unsupportedaudioformat" | "audiotoolong" | "invalidaudio"
        | "emptyaudio" | "unsupportedmediatype" | "invalidmediatype" => ErrorCategory::Audio,
        "invalidlocale" | "invalidmodel" | "modelnotfound" | "invalidparameter"
        | "invalidrequest" | "invalidconfiguration" | "invalidpayload" | "badrequest" => {
            ErrorCategory::Configuration
        }
        "serviceunavailable" | "internalservererror" | "internalerror" | "badgateway"
        | "serveroverloaded" => ErrorCategory::Service,
        "networkerror" | "timeout" | "requesttimeout" | "gatewaytimeout" | "connectionfailed" => {
            ErrorCategory::Network
        }
        _ => return None,
    };
    Some(category)
}

fn category_for_status(status: u16) -> Option<ErrorCategory> {
    match status {
        401 | 403 => Some(ErrorCategory::Authentication),
        429 => Some(ErrorCategory::Quota),
        408 | 504 => Some(ErrorCategory::Network),
        413 | 415 => Some(ErrorCategory::Audio),
        400 | 404 | 405 | 409 | 422 => Some(ErrorCategory::Configuration),
        500..=599 => Some(ErrorCategory::Service),
        _ => None,
    }
}

fn category_for_message(message: &str) -> ErrorCategory {
    let checks = [
        (&AUTH_PATTERN, ErrorCategory::Authentication),
        (&QUOTA_PATTERN, ErrorCategory::Quota),
        (&AUDIO_PATTERN, ErrorCategory::Audio),
        (&NETWORK_PATTERN, ErrorCategory::Network),
        (&SERVICE_PATTERN, ErrorCategory::Service),
    ];

    checks
        .into_iter()
        .find(|(pattern, _)| matches_pattern(pattern, message))
        .map_or(ErrorCategory::Unknown, |(_, category)| category)
}

fn matches_pattern(pattern: &Lazy<Option<Regex>>, message: &str) -> bool {
    match &**pattern {
        Some(re) => re.is_match(message),
        None => false,
    }
}
