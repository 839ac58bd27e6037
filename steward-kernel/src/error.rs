use serde::{Deserialize, Serialize};

/// Closed classification of everything that can go wrong between the tool
/// surface and a provider binary. Retry, fallback, and breaker behavior all
/// key off this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input shape or contents invalid. Surfaced directly, never retried.
    Validation,
    /// Operation disallowed at the current autonomy level.
    Permission,
    /// Prompt injection or dangerous content blocked before dispatch.
    Sanitization,
    /// Network/timeout/spawn glitch. Retried with backoff.
    Transient,
    /// Provider reports exhaustion or rate limiting. One-shot fallback.
    Quota,
    /// Non-retryable provider error (bad request, unknown model).
    Permanent,
    /// Caller cancelled; not a failure.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
            ErrorKind::Sanitization => "sanitization",
            ErrorKind::Transient => "transient",
            ErrorKind::Quota => "quota",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Only transient faults are retried in place.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Whether a failure of this kind counts against the backend's circuit
    /// breaker. Caller-side faults (validation, permission, sanitization)
    /// say nothing about provider health.
    pub fn affects_breaker(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::Quota | ErrorKind::Permanent
        )
    }

    /// Ranking used at the workflow boundary: a total failure reports the
    /// kind of its most severe leg.
    pub fn severity(&self) -> u8 {
        match self {
            ErrorKind::Permission => 6,
            ErrorKind::Sanitization => 5,
            ErrorKind::Permanent => 4,
            ErrorKind::Quota => 3,
            ErrorKind::Transient => 2,
            ErrorKind::Validation => 1,
            ErrorKind::Cancelled => 0,
        }
    }

    pub fn most_severe(kinds: impl IntoIterator<Item = ErrorKind>) -> Option<ErrorKind> {
        kinds.into_iter().max_by_key(ErrorKind::severity)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The error type crossing every component boundary from C8 outward. Tool
/// responses serialize this as `{error_kind, message}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn sanitization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Sanitization, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DispatchError {}

/// Map raw provider stderr onto the taxonomy. Providers are black boxes,
/// so this is content-based; anything unrecognized is permanent.
pub fn classify_provider_failure(exit_code: i32, stderr: &[String]) -> ErrorKind {
    let combined = stderr.join(" ").to_ascii_lowercase();

    if combined.contains("rate limit")
        || combined.contains("quota")
        || combined.contains("too many requests")
        || combined.contains("429")
        || combined.contains("usage limit")
    {
        return ErrorKind::Quota;
    }

    if combined.contains("timed out")
        || combined.contains("timeout")
        || combined.contains("connection reset")
        || combined.contains("connection refused")
        || combined.contains("temporarily unavailable")
        || combined.contains("network")
        || combined.contains("econnreset")
        || combined.contains("503")
        || combined.contains("502")
    {
        return ErrorKind::Transient;
    }

    // Signal-terminated children have no meaningful exit code; treat the
    // interruption as transient.
    if exit_code < 0 {
        return ErrorKind::Transient;
    }

    ErrorKind::Permanent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_retries() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Permission,
            ErrorKind::Sanitization,
            ErrorKind::Quota,
            ErrorKind::Permanent,
            ErrorKind::Cancelled,
        ] {
            assert!(!kind.retryable(), "{kind} must not retry");
        }
        assert!(ErrorKind::Transient.retryable());
    }

    #[test]
    fn caller_faults_never_touch_the_breaker() {
        assert!(!ErrorKind::Validation.affects_breaker());
        assert!(!ErrorKind::Permission.affects_breaker());
        assert!(!ErrorKind::Sanitization.affects_breaker());
        assert!(!ErrorKind::Cancelled.affects_breaker());
        assert!(ErrorKind::Transient.affects_breaker());
        assert!(ErrorKind::Quota.affects_breaker());
        assert!(ErrorKind::Permanent.affects_breaker());
    }

    #[test]
    fn most_severe_prefers_permission_over_provider_faults() {
        let worst = ErrorKind::most_severe([
            ErrorKind::Transient,
            ErrorKind::Permission,
            ErrorKind::Quota,
        ]);
        assert_eq!(worst, Some(ErrorKind::Permission));
        assert_eq!(ErrorKind::most_severe([]), None);
    }

    #[test]
    fn provider_failures_classify_by_stderr_content() {
        assert_eq!(
            classify_provider_failure(1, &["Rate limit exceeded".to_string()]),
            ErrorKind::Quota
        );
        assert_eq!(
            classify_provider_failure(1, &["connection reset by peer".to_string()]),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_provider_failure(2, &["unknown model `gpt-9`".to_string()]),
            ErrorKind::Permanent
        );
        assert_eq!(classify_provider_failure(-9, &[]), ErrorKind::Transient);
    }
}
