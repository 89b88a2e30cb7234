use crate::error::{PodwardenError, Result};
use crate::pod::PodSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kubernetes default for `backoffLimit`
pub const DEFAULT_BACKOFF_LIMIT: u32 = 6;

/// A job: `completions` pods stamped out of one template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub template: PodSpec,
    #[serde(default = "default_completions")]
    pub completions: u32,
    /// Failed pods tolerated before the job fails; 0 disables retries
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,
}

fn default_completions() -> u32 {
    1
}

fn default_backoff_limit() -> u32 {
    DEFAULT_BACKOFF_LIMIT
}

impl JobSpec {
    pub fn new(template: PodSpec) -> Self {
        Self {
            template,
            completions: 1,
            backoff_limit: DEFAULT_BACKOFF_LIMIT,
        }
    }

    pub fn with_completions(mut self, completions: u32) -> Self {
        self.completions = completions;
        self
    }

    pub fn with_backoff_limit(mut self, limit: u32) -> Self {
        self.backoff_limit = limit;
        self
    }

    pub fn validate(&self, job: &str) -> Result<()> {
        if self.completions == 0 {
            return Err(PodwardenError::invalid_pod_spec(
                job,
                "Job requests zero completions",
                "Set completions to at least 1",
            ));
        }
        self.template.validate(job)
    }
}

/// Job condition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobConditionType {
    Complete,
    Failed,
}

impl fmt::Display for JobConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobConditionType::Complete => write!(f, "Complete"),
            JobConditionType::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// A job-level condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub type_: JobConditionType,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobCondition {
    pub fn complete(at: DateTime<Utc>) -> Self {
        Self {
            type_: JobConditionType::Complete,
            status: ConditionStatus::True,
            last_transition_time: at,
            reason: Some("CompletionsReached".to_string()),
            message: Some("Reached expected number of succeeded pods".to_string()),
        }
    }

    pub fn failed(at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            type_: JobConditionType::Failed,
            status: ConditionStatus::True,
            last_transition_time: at,
            reason: Some("BackoffLimitExceeded".to_string()),
            message: Some(message.into()),
        }
    }

    /// Whether this condition is `type_=True`
    pub fn is_true(&self, type_: JobConditionType) -> bool {
        self.type_ == type_ && self.status == ConditionStatus::True
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::ContainerSpec;

    #[test]
    fn test_job_spec_defaults_from_yaml() {
        let yaml = r#"
template:
  restartPolicy: OnFailure
  containers:
    - name: main-container
      role: keystone
    - name: sidecar-container
      role: sidecar
"#;
        let spec: JobSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.completions, 1);
        assert_eq!(spec.backoff_limit, DEFAULT_BACKOFF_LIMIT);
        assert!(spec.validate("test-job").is_ok());
    }

    #[test]
    fn test_zero_completions_rejected() {
        let spec = JobSpec::new(PodSpec::new(vec![ContainerSpec::plain("main")]))
            .with_completions(0);
        assert!(spec.validate("job").is_err());
    }

    #[test]
    fn test_condition_serializes_type_field() {
        let cond = JobCondition::complete(Utc::now());
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["type"], "Complete");
        assert_eq!(json["status"], "True");
        assert!(cond.is_true(JobConditionType::Complete));
        assert!(!cond.is_true(JobConditionType::Failed));
    }
}
