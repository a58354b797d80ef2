use thiserror::Error;

/// Errors produced by the credential exchange engine
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid option combination
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Capture deadline exceeded, session closed, or interrupted
    #[error("timed out waiting for input or user closed the aws-cli-auth browser instance")]
    TimedOut,

    /// Identity broker call failed
    #[error("identity broker call failed ({step}): {message}")]
    Broker { step: String, message: String },

    /// Validity check could not execute
    #[error("unable to validate cached credentials: {0}")]
    Validation(String),

    /// Read/write to the secret backend failed
    #[error("secret backend error: {0}")]
    SecretBackend(String),

    /// One or more cached entries could not be removed
    #[error("failed to clear {} cached credential(s): {}", .0.len(), .0.join("; "))]
    ClearAll(Vec<String>),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Browser launch, navigation or interception failure
    #[error("browser error: {0}")]
    Browser(String),

    #[error("malformed federation artifact: {0}")]
    MalformedArtifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_all_names_every_failure() {
        let err = Error::ClearAll(vec!["key-a: locked".into(), "key-b: denied".into()]);
        let msg = err.to_string();
        assert!(msg.starts_with("failed to clear 2 cached credential(s)"));
        assert!(msg.contains("key-a: locked"));
        assert!(msg.contains("key-b: denied"));
    }

    #[test]
    fn test_broker_error_names_step() {
        let err = Error::Broker {
            step: "hop 2/3 (arn:aws:iam::1:role/B)".into(),
            message: "AccessDenied".into(),
        };
        assert!(err.to_string().contains("hop 2/3"));
    }
}
