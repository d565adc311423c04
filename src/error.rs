//! Error types for kube2consul

use thiserror::Error;

/// Main error type for kube2consul operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Transport-level failure talking to the Consul HTTP API
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Consul answered, but rejected the request
    #[error("registry error: {0}")]
    Registry(String),

    /// Invalid or unusable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A watched object did not have the shape we need (e.g. no name)
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a registry error with the given message
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-object error with the given message
    pub fn invalid_object(msg: impl Into<String>) -> Self {
        Self::InvalidObject(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: Consul rejects a catalog write
    ///
    /// The HTTP call succeeded but Consul returned a non-2xx status. The error
    /// carries enough context to find the offending record in the logs.
    #[test]
    fn story_registry_rejection_is_reported_with_context() {
        let err = Error::registry("PUT /v1/catalog/register returned 403: ACL not found");
        assert!(err.to_string().contains("registry error"));
        assert!(err.to_string().contains("403"));

        match Error::registry("any message") {
            Error::Registry(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Registry variant"),
        }
    }

    /// Story: a watch delivers an object we cannot key
    ///
    /// Objects without a name or namespace are skipped; the error explains why.
    #[test]
    fn story_malformed_watch_object() {
        let err = Error::invalid_object("Service has no metadata.namespace");
        assert!(err.to_string().contains("invalid object"));
        assert!(err.to_string().contains("metadata.namespace"));
    }

    /// Story: bad flags stop the process before it starts
    #[test]
    fn story_configuration_errors_are_fatal_at_startup() {
        let err = Error::config("invalid kube-master url specified");
        assert!(err.to_string().contains("configuration error"));

        let err = Error::config(format!("failed to read CA file {}", "/etc/consul/ca.pem"));
        assert!(err.to_string().contains("/etc/consul/ca.pem"));
    }

    /// Story: errors are categorized for handling in the event loops
    ///
    /// Only configuration problems are fatal; everything else is logged and
    /// healed by the next resync.
    #[test]
    fn story_error_categorization_for_event_loops() {
        fn categorize_error(err: &Error) -> &'static str {
            match err {
                Error::Config(_) => "fatal",
                Error::InvalidObject(_) => "skip_object",
                Error::Registry(_) | Error::Http(_) | Error::Kube(_) => "wait_for_resync",
                Error::Serialization(_) => "wait_for_resync",
            }
        }

        assert_eq!(categorize_error(&Error::config("bad flag")), "fatal");
        assert_eq!(
            categorize_error(&Error::invalid_object("no name")),
            "skip_object"
        );
        assert_eq!(
            categorize_error(&Error::registry("500")),
            "wait_for_resync"
        );
        assert_eq!(
            categorize_error(&Error::serialization("bad json")),
            "wait_for_resync"
        );
    }
}
