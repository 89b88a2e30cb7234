//! Podwarden Core - Data model for pod completion and termination
//!
//! This crate provides:
//! - Container roles, phases, restart policies and pod outcomes
//! - Pod and job specs with admission validation
//! - Error types with miette diagnostics
//! - Runtime transition events
//! - Adapters to and from Kubernetes API objects
//! - Serialization helpers

pub mod error;
pub mod events;
pub mod job;
pub mod k8s;
pub mod pod;
pub mod types;

// Re-export commonly used types
pub use error::{PodwardenError, Result};
pub use events::ContainerTransitionEvent;
pub use job::{ConditionStatus, JobCondition, JobConditionType, JobSpec};
pub use k8s::ROLES_ANNOTATION;
pub use pod::{is_valid_name, ContainerSpec, PodSpec};
pub use types::{
    ContainerPhase, ContainerRole, JobId, PodId, PodOutcome, PodPhase, RestartPolicy, SignalKind,
};

// Re-export k8s-openapi for callers building manifests
pub use k8s_openapi;

/// Serialize a value to JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        PodwardenError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        PodwardenError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        PodwardenError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        PodwardenError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip_pod_spec() {
        let spec = PodSpec::new(vec![
            ContainerSpec::keystone("main"),
            ContainerSpec::sidecar("proxy"),
        ]);

        let json = to_json(&spec).unwrap();
        assert!(json.contains("keystone"));

        let parsed: PodSpec = from_json(&json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_yaml_error_is_serialization_error() {
        let err = from_yaml::<PodSpec>("containers: 12").unwrap_err();
        assert!(matches!(err, PodwardenError::SerializationError { .. }));
    }
}
