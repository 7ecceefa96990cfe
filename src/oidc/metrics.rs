//! Protocol metrics
//!
//! Counters and histograms recorded through the `metrics` facade. Nothing is
//! exported unless the embedding application installs a recorder.
//!
//! # Metrics
//!
//! - `oidc_token_requests_total`: token endpoint calls by grant type and outcome
//! - `oidc_silent_renewals_total`: silent renewals by outcome
//! - `oidc_silent_renewal_duration_seconds`: silent renewal round-trip time
//! - `oidc_callbacks_rejected_total`: rejected callbacks by reason

use std::time::Duration;

use metrics::{histogram, increment_counter};

use crate::error::{OidcError, Result};

/// Grant type label for code exchanges.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// Grant type label for refreshes.
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

fn outcome<T>(result: &Result<T>) -> String {
    match result {
        Ok(_) => "success".to_string(),
        Err(e) => e.kind().to_string(),
    }
}

/// Records one token endpoint call.
pub fn record_token_request<T>(grant_type: &'static str, result: &Result<T>) {
    increment_counter!(
        "oidc_token_requests_total",
        "grant_type" => grant_type,
        "outcome" => outcome(result)
    );
}

/// Records a finished silent renewal and its duration.
pub fn record_silent_renewal<T>(result: &Result<T>, elapsed: Duration) {
    let outcome = outcome(result);
    histogram!(
        "oidc_silent_renewal_duration_seconds",
        elapsed.as_secs_f64(),
        "outcome" => outcome.clone()
    );
    increment_counter!("oidc_silent_renewals_total", "outcome" => outcome);
}

/// Records a rejected callback.
pub fn record_callback_rejected(error: &OidcError) {
    increment_counter!("oidc_callbacks_rejected_total", "reason" => error.kind());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome::<()>(&Ok(())), "success");
        assert_eq!(outcome::<()>(&Err(OidcError::StateMismatch)), "state_mismatch");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_token_request::<()>(GRANT_REFRESH_TOKEN, &Err(OidcError::NoRefreshToken));
        record_silent_renewal::<()>(&Ok(()), Duration::from_millis(5));
        record_callback_rejected(&OidcError::MissingAuthorizationCode);
    }
}
