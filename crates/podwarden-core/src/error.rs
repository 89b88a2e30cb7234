// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for podwarden operations
#[derive(Error, Debug, Diagnostic)]
pub enum PodwardenError {
    /// Pod spec rejected at admission
    #[error("Invalid pod spec for {pod}: {details}")]
    #[diagnostic(
        code(podwarden::invalid_pod_spec),
        help("{help_text}")
    )]
    InvalidPodSpec {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// More than one container carries the keystone role
    #[error("Pod {pod} declares {count} keystone containers: {containers:?}")]
    #[diagnostic(
        code(podwarden::multiple_keystones),
        help("Mark exactly one container as keystone; the rest should be sidecar or plain containers")
    )]
    MultipleKeystones {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        count: usize,
        #[allow(unused)]
        containers: Vec<String>,
    },

    /// Container role annotation could not be parsed
    #[error("Invalid container role '{role}' for container '{container}'")]
    #[diagnostic(
        code(podwarden::invalid_role),
        help("Supported roles: keystone, sidecar, plain")
    )]
    InvalidRole {
        #[allow(unused)]
        container: String,
        #[allow(unused)]
        role: String,
    },

    /// Kubernetes object is missing data we need
    #[error("Invalid {kind} object: {reason}")]
    #[diagnostic(
        code(podwarden::invalid_object),
        help("Ensure the manifest sets metadata.name and a pod template with at least one container")
    )]
    InvalidObject {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(podwarden::serialization_error),
        help("Ensure the document is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for podwarden core operations
pub type Result<T> = std::result::Result<T, PodwardenError>;

impl PodwardenError {
    /// Create an InvalidPodSpec error
    pub fn invalid_pod_spec(
        pod: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::InvalidPodSpec {
            pod: pod.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create a MultipleKeystones error
    pub fn multiple_keystones(pod: impl Into<String>, containers: Vec<String>) -> Self {
        Self::MultipleKeystones {
            pod: pod.into(),
            count: containers.len(),
            containers,
        }
    }

    /// Create an InvalidRole error
    pub fn invalid_role(container: impl Into<String>, role: impl Into<String>) -> Self {
        Self::InvalidRole {
            container: container.into(),
            role: role.into(),
        }
    }

    /// Create an InvalidObject error
    pub fn invalid_object(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
