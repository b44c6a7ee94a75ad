use thiserror::Error;

use crate::limiter::RateLimitError;

/// Application-wide error types.
///
/// These surface at startup and in the binary's exit code. Rate limit
/// rejections are not errors; they are ordinary `429` responses.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid rate limiter configuration: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_error_conversion() {
        let err: AppError = RateLimitError::ZeroCapacity.into();
        assert!(matches!(err, AppError::RateLimit(RateLimitError::ZeroCapacity)));
        assert!(err.to_string().contains("maximum tracked clients"));
    }

    #[test]
    fn test_every_variant_is_a_startup_failure() {
        let errors = [
            AppError::ConfigError("PORT must be a number".to_string()),
            AppError::RateLimit(RateLimitError::ZeroRate),
        ];
        for err in &errors {
            let reported = match err {
                AppError::ConfigError(msg) => msg.clone(),
                AppError::RateLimit(inner) => inner.to_string(),
            };
            assert!(err.to_string().contains(&reported));
        }
    }
}
