use crate::error::PodwardenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a pod tracked by the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodId(pub String);

impl PodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PodId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the `index`-th pod created for this job
    pub fn pod_id(&self, index: usize) -> PodId {
        PodId(format!("{}-{}", self.0, index))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Role a container plays in deciding pod completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRole {
    /// Its successful exit alone completes the pod
    Keystone,
    /// Expected to keep running after the keystone completes
    Sidecar,
    #[default]
    Plain,
}

impl ContainerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerRole::Keystone => "keystone",
            ContainerRole::Sidecar => "sidecar",
            ContainerRole::Plain => "plain",
        }
    }
}

impl fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContainerRole {
    type Err = PodwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keystone" => Ok(ContainerRole::Keystone),
            "sidecar" => Ok(ContainerRole::Sidecar),
            "plain" => Ok(ContainerRole::Plain),
            other => Err(PodwardenError::invalid_role("<unknown>", other)),
        }
    }
}

/// Observed lifecycle phase of a single container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerPhase {
    #[default]
    Pending,
    Running,
    Exited,
}

impl fmt::Display for ContainerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerPhase::Pending => "Pending",
            ContainerPhase::Running => "Running",
            ContainerPhase::Exited => "Exited",
        };
        write!(f, "{}", s)
    }
}

/// Pod restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    /// Parse the Kubernetes spelling of a restart policy
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Always" => Some(RestartPolicy::Always),
            "OnFailure" => Some(RestartPolicy::OnFailure),
            "Never" => Some(RestartPolicy::Never),
            _ => None,
        }
    }

    /// Whether a container exiting with `exit_code` gets restarted
    pub fn restarts(&self, exit_code: i32) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => exit_code != 0,
            RestartPolicy::Never => false,
        }
    }
}

/// Signal delivered to a container when its pod is terminated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    #[default]
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGQUIT")]
    Quit,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Term => "SIGTERM",
            SignalKind::Int => "SIGINT",
            SignalKind::Quit => "SIGQUIT",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Completion outcome of a pod, derived from its containers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodOutcome {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Set when a forced kill could not be confirmed
    Unknown,
}

impl PodOutcome {
    /// Terminal outcomes never change once reached
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PodOutcome::Succeeded | PodOutcome::Failed | PodOutcome::Unknown
        )
    }
}

impl fmt::Display for PodOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodOutcome::Pending => "Pending",
            PodOutcome::Running => "Running",
            PodOutcome::Succeeded => "Succeeded",
            PodOutcome::Failed => "Failed",
            PodOutcome::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Externally visible pod phase: the outcome, or `Terminating` while a
/// delete is in flight and the outcome is not yet terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
    Terminating,
}

impl PodPhase {
    pub fn derive(outcome: PodOutcome, terminating: bool) -> Self {
        match outcome {
            PodOutcome::Succeeded => PodPhase::Succeeded,
            PodOutcome::Failed => PodPhase::Failed,
            PodOutcome::Unknown => PodPhase::Unknown,
            _ if terminating => PodPhase::Terminating,
            PodOutcome::Pending => PodPhase::Pending,
            PodOutcome::Running => PodPhase::Running,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
            PodPhase::Terminating => "Terminating",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str() {
        assert_eq!(
            "keystone".parse::<ContainerRole>().unwrap(),
            ContainerRole::Keystone
        );
        assert_eq!(
            " Sidecar ".parse::<ContainerRole>().unwrap(),
            ContainerRole::Sidecar
        );
        assert!("primary".parse::<ContainerRole>().is_err());
    }

    #[test]
    fn test_restart_policy_restarts() {
        assert!(RestartPolicy::Always.restarts(0));
        assert!(RestartPolicy::OnFailure.restarts(1));
        assert!(!RestartPolicy::OnFailure.restarts(0));
        assert!(!RestartPolicy::Never.restarts(1));
        assert_eq!(RestartPolicy::parse("OnFailure"), Some(RestartPolicy::OnFailure));
        assert_eq!(RestartPolicy::parse("sometimes"), None);
    }

    #[test]
    fn test_pod_phase_prefers_terminal_outcome() {
        assert_eq!(
            PodPhase::derive(PodOutcome::Succeeded, true),
            PodPhase::Succeeded
        );
        assert_eq!(
            PodPhase::derive(PodOutcome::Running, true),
            PodPhase::Terminating
        );
        assert_eq!(
            PodPhase::derive(PodOutcome::Pending, false),
            PodPhase::Pending
        );
    }

    #[test]
    fn test_job_pod_id() {
        let job = JobId::new("test-job");
        assert_eq!(job.pod_id(0), PodId::new("test-job-0"));
    }

    #[test]
    fn test_signal_serde_names() {
        let json = serde_json::to_string(&SignalKind::Term).unwrap();
        assert_eq!(json, "\"SIGTERM\"");
        let parsed: SignalKind = serde_json::from_str("\"SIGQUIT\"").unwrap();
        assert_eq!(parsed, SignalKind::Quit);
    }
}
