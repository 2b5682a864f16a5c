use std::path::PathBuf;

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    Validation(String),
    #[error("{0}")]
    RuleViolation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::RuleViolation(_) => "rule_violation",
            Self::NotFound(_) => "not_found",
            Self::RateLimited(_) => "rate_limited",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn rule(message: impl Into<String>) -> Self {
        Self::RuleViolation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read rules file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rules file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid rules: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("malformed envelope")]
    Malformed,
    #[error("{0} is not sent by servers")]
    UnexpectedType(&'static str),
    #[error("bad {message_type} payload: {source}")]
    Payload {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
