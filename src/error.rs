// src/error.rs

//! Error kinds that callers (and `main`) branch on.
//!
//! Everything else flows through `anyhow` with context attached.

use thiserror::Error;

/// Invalid flag combinations or lookups that failed because of user input.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

impl UsageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Missing or malformed local configuration (keychain, cumulusci.yml, git).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Structured exit codes so CI pipelines can tell failures apart.
pub mod exit_codes {
    pub const GENERAL_ERROR: i32 = 1;
    pub const USAGE_ERROR: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
    pub const CONNECTION_ERROR: i32 = 4;
    pub const REQUEST_ERROR: i32 = 5;
    pub const PERMISSION_ERROR: i32 = 7;
}

/// Pick the exit code for an error by looking through its cause chain.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    use crate::api::ApiError;

    for cause in err.chain() {
        if cause.downcast_ref::<UsageError>().is_some()
            || cause.downcast_ref::<clap::Error>().is_some()
        {
            return exit_codes::USAGE_ERROR;
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_codes::CONFIG_ERROR;
        }
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return match api {
                ApiError::Unauthorized(_) | ApiError::Forbidden(_) => exit_codes::PERMISSION_ERROR,
                ApiError::Config(_) => exit_codes::CONFIG_ERROR,
                _ => exit_codes::REQUEST_ERROR,
            };
        }
        if is_connection_error(cause) {
            return exit_codes::CONNECTION_ERROR;
        }
    }
    exit_codes::GENERAL_ERROR
}

/// True when the error is a failure to reach the remote host at all.
pub fn is_connection_error(cause: &(dyn std::error::Error + 'static)) -> bool {
    cause
        .downcast_ref::<reqwest::Error>()
        .map(|e| e.is_connect() || e.is_timeout())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use anyhow::Context;

    #[test]
    fn usage_errors_map_to_usage_code() {
        let err = anyhow::Error::new(UsageError::new("bad flags"));
        assert_eq!(exit_code_for(&err), exit_codes::USAGE_ERROR);
    }

    #[test]
    fn api_errors_are_found_under_context() {
        let err: anyhow::Result<()> =
            Err(ApiError::Forbidden("expired".into())).context("Failed to list jobs");
        assert_eq!(exit_code_for(&err.unwrap_err()), exit_codes::PERMISSION_ERROR);
    }

    #[test]
    fn plain_errors_are_general() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&err), exit_codes::GENERAL_ERROR);
    }
}
