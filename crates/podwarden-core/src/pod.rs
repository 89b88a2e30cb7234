use crate::error::{PodwardenError, Result};
use crate::types::{ContainerRole, RestartPolicy, SignalKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Kubernetes default for `terminationGracePeriodSeconds`
pub const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 30;

/// Restarts allowed per container before a failing pod is declared `Failed`
pub const DEFAULT_RESTART_LIMIT: u32 = 6;

/// A container as declared in the pod spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub role: ContainerRole,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, role: ContainerRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn keystone(name: impl Into<String>) -> Self {
        Self::new(name, ContainerRole::Keystone)
    }

    pub fn sidecar(name: impl Into<String>) -> Self {
        Self::new(name, ContainerRole::Sidecar)
    }

    pub fn plain(name: impl Into<String>) -> Self {
        Self::new(name, ContainerRole::Plain)
    }
}

/// The part of a pod spec the completion and termination logic needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers in declaration order
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
    #[serde(default = "default_grace_period_seconds")]
    pub termination_grace_period_seconds: u64,
    #[serde(default)]
    pub stop_signal: SignalKind,
}

fn default_restart_limit() -> u32 {
    DEFAULT_RESTART_LIMIT
}

fn default_grace_period_seconds() -> u64 {
    DEFAULT_GRACE_PERIOD_SECONDS
}

impl PodSpec {
    pub fn new(containers: Vec<ContainerSpec>) -> Self {
        Self {
            containers,
            restart_policy: RestartPolicy::default(),
            restart_limit: DEFAULT_RESTART_LIMIT,
            termination_grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            stop_signal: SignalKind::default(),
        }
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn with_restart_limit(mut self, limit: u32) -> Self {
        self.restart_limit = limit;
        self
    }

    pub fn with_grace_period_seconds(mut self, seconds: u64) -> Self {
        self.termination_grace_period_seconds = seconds;
        self
    }

    pub fn termination_grace_period(&self) -> Duration {
        Duration::from_secs(self.termination_grace_period_seconds)
    }

    /// The keystone container, if one is declared
    pub fn keystone(&self) -> Option<&ContainerSpec> {
        self.containers
            .iter()
            .find(|c| c.role == ContainerRole::Keystone)
    }

    /// Admission checks: non-empty, valid and unique names, at most one keystone
    pub fn validate(&self, pod: &str) -> Result<()> {
        if self.containers.is_empty() {
            return Err(PodwardenError::invalid_pod_spec(
                pod,
                "Pod has no containers",
                "Add at least one container to the pod spec",
            ));
        }

        let mut seen = HashSet::new();
        for container in &self.containers {
            if !is_valid_name(&container.name) {
                return Err(PodwardenError::invalid_pod_spec(
                    pod,
                    format!("Invalid container name '{}'", container.name),
                    "Container names must be lowercase alphanumeric with '-' or '.', starting and ending with an alphanumeric character",
                ));
            }
            if !seen.insert(container.name.as_str()) {
                return Err(PodwardenError::invalid_pod_spec(
                    pod,
                    format!("Duplicate container name '{}'", container.name),
                    "Every container in a pod needs a unique name",
                ));
            }
        }

        let keystones: Vec<String> = self
            .containers
            .iter()
            .filter(|c| c.role == ContainerRole::Keystone)
            .map(|c| c.name.clone())
            .collect();
        if keystones.len() > 1 {
            return Err(PodwardenError::multiple_keystones(pod, keystones));
        }

        Ok(())
    }
}

/// Check if a name is a valid Kubernetes object name
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let first = name.chars().next();
    let last = name.chars().last();
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(first) || !edge_ok(last) {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keystone_pod() -> PodSpec {
        PodSpec::new(vec![
            ContainerSpec::keystone("main"),
            ContainerSpec::sidecar("sidecar"),
        ])
        .with_restart_policy(RestartPolicy::OnFailure)
    }

    #[test]
    fn test_validate_accepts_keystone_pod() {
        let spec = keystone_pod();
        assert!(spec.validate("p1").is_ok());
        assert_eq!(spec.keystone().map(|c| c.name.as_str()), Some("main"));
    }

    #[test]
    fn test_validate_rejects_multiple_keystones() {
        let spec = PodSpec::new(vec![
            ContainerSpec::keystone("a"),
            ContainerSpec::keystone("b"),
        ]);
        let err = spec.validate("p1").unwrap_err();
        assert!(matches!(err, PodwardenError::MultipleKeystones { count: 2, .. }));
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicates() {
        assert!(PodSpec::new(vec![]).validate("p1").is_err());

        let spec = PodSpec::new(vec![ContainerSpec::plain("a"), ContainerSpec::plain("a")]);
        let err = spec.validate("p1").unwrap_err();
        assert!(err.to_string().contains("Duplicate container name"));
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let spec = PodSpec::new(vec![ContainerSpec::plain("Main_Container")]);
        assert!(spec.validate("p1").is_err());
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("main-container"));
        assert!(is_valid_name("a.b"));
        assert!(!is_valid_name("-a"));
        assert!(!is_valid_name("a-"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(&"a".repeat(254)));
    }

    #[test]
    fn test_yaml_defaults() {
        let yaml = "containers:\n  - name: main\n    role: keystone\n  - name: proxy\n";
        let spec: PodSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.containers[0].role, ContainerRole::Keystone);
        assert_eq!(spec.containers[1].role, ContainerRole::Plain);
        assert_eq!(spec.restart_policy, RestartPolicy::Always);
        assert_eq!(spec.restart_limit, DEFAULT_RESTART_LIMIT);
        assert_eq!(spec.termination_grace_period(), Duration::from_secs(30));
        assert_eq!(spec.stop_signal, SignalKind::Term);
    }
}
