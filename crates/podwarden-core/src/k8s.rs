//! Adapters between Kubernetes API objects and the podwarden model.
//!
//! Container roles have no field in the upstream `Container` type, so they are
//! read once, at admission, from the [`ROLES_ANNOTATION`] annotation on the pod
//! (or pod template) and stored as [`ContainerRole`] values from then on.

use crate::error::{PodwardenError, Result};
use crate::job::{JobCondition, JobSpec, DEFAULT_BACKOFF_LIMIT};
use crate::pod::{ContainerSpec, PodSpec, DEFAULT_GRACE_PERIOD_SECONDS, DEFAULT_RESTART_LIMIT};
use crate::types::{ContainerRole, JobId, PodId, RestartPolicy};
use k8s_openapi::api::batch::v1::{Job, JobCondition as K8sJobCondition};
use k8s_openapi::api::core::v1::{Pod, PodSpec as K8sPodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::HashMap;

/// Annotation listing container roles, e.g. `main=keystone,proxy=sidecar`
pub const ROLES_ANNOTATION: &str = "podwarden.io/container-roles";

/// Parse the roles annotation into a container-name → role map
pub fn parse_roles(value: &str) -> Result<HashMap<String, ContainerRole>> {
    let mut roles = HashMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, role) = entry.split_once('=').ok_or_else(|| {
            PodwardenError::invalid_object(
                "Pod",
                format!("malformed {} entry '{}'", ROLES_ANNOTATION, entry),
            )
        })?;
        let name = name.trim();
        let role = role
            .parse::<ContainerRole>()
            .map_err(|_| PodwardenError::invalid_role(name, role.trim()))?;
        roles.insert(name.to_string(), role);
    }
    Ok(roles)
}

fn roles_from_metadata(metadata: Option<&ObjectMeta>) -> Result<HashMap<String, ContainerRole>> {
    match metadata
        .and_then(|m| m.annotations.as_ref())
        .and_then(|a| a.get(ROLES_ANNOTATION))
    {
        Some(value) => parse_roles(value),
        None => Ok(HashMap::new()),
    }
}

fn convert_pod_spec(
    kind: &str,
    spec: &K8sPodSpec,
    mut roles: HashMap<String, ContainerRole>,
) -> Result<PodSpec> {
    let containers = spec
        .containers
        .iter()
        .map(|c| {
            let role = roles.remove(&c.name).unwrap_or_default();
            ContainerSpec::new(c.name.clone(), role)
        })
        .collect();

    if let Some(name) = roles.keys().next() {
        return Err(PodwardenError::invalid_object(
            kind,
            format!("{} names unknown container '{}'", ROLES_ANNOTATION, name),
        ));
    }

    let restart_policy = match spec.restart_policy.as_deref() {
        None => RestartPolicy::default(),
        Some(s) => RestartPolicy::parse(s).ok_or_else(|| {
            PodwardenError::invalid_object(kind, format!("unknown restartPolicy '{}'", s))
        })?,
    };

    let grace = spec
        .termination_grace_period_seconds
        .map(|s| s.max(0) as u64)
        .unwrap_or(DEFAULT_GRACE_PERIOD_SECONDS);

    Ok(PodSpec {
        containers,
        restart_policy,
        restart_limit: DEFAULT_RESTART_LIMIT,
        termination_grace_period_seconds: grace,
        stop_signal: Default::default(),
    })
}

impl PodSpec {
    /// Convert a Kubernetes Pod, validating the result
    pub fn from_k8s_pod(pod: &Pod) -> Result<(PodId, PodSpec)> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| PodwardenError::invalid_object("Pod", "metadata.name is missing"))?;
        let spec = pod
            .spec
            .as_ref()
            .ok_or_else(|| PodwardenError::invalid_object("Pod", "spec is missing"))?;

        let roles = roles_from_metadata(Some(&pod.metadata))?;
        let converted = convert_pod_spec("Pod", spec, roles)?;
        converted.validate(name)?;
        Ok((PodId::new(name), converted))
    }
}

impl JobSpec {
    /// Convert a Kubernetes Job, validating the result
    pub fn from_k8s_job(job: &Job) -> Result<(JobId, JobSpec)> {
        let name = job
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| PodwardenError::invalid_object("Job", "metadata.name is missing"))?;
        let spec = job
            .spec
            .as_ref()
            .ok_or_else(|| PodwardenError::invalid_object("Job", "spec is missing"))?;
        let pod_spec = spec
            .template
            .spec
            .as_ref()
            .ok_or_else(|| PodwardenError::invalid_object("Job", "spec.template.spec is missing"))?;

        let roles = roles_from_metadata(spec.template.metadata.as_ref())?;
        let template = convert_pod_spec("Job", pod_spec, roles)?;

        let converted = JobSpec {
            template,
            completions: spec.completions.map(|c| c.max(0) as u32).unwrap_or(1),
            backoff_limit: spec
                .backoff_limit
                .map(|b| b.max(0) as u32)
                .unwrap_or(DEFAULT_BACKOFF_LIMIT),
        };
        converted.validate(name)?;
        Ok((JobId::new(name), converted))
    }
}

impl JobCondition {
    /// Render as a Kubernetes `JobCondition` for status updates
    pub fn to_k8s(&self) -> K8sJobCondition {
        K8sJobCondition {
            type_: self.type_.to_string(),
            status: self.status.to_string(),
            last_transition_time: Some(Time(self.last_transition_time)),
            reason: self.reason.clone(),
            message: self.message.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const KEYSTONE_JOB: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: test-job
spec:
  template:
    metadata:
      annotations:
        podwarden.io/container-roles: "main-container=keystone, sidecar-container=sidecar"
    spec:
      restartPolicy: OnFailure
      containers:
        - name: main-container
          image: busybox
          command: ["sh", "-c", "sleep 1 && exit 0"]
        - name: sidecar-container
          image: busybox
          command: ["sh", "-c", "sleep infinity"]
"#;

    #[test]
    fn test_parse_roles() {
        let roles = parse_roles("main=keystone,proxy=sidecar").unwrap();
        assert_eq!(roles["main"], ContainerRole::Keystone);
        assert_eq!(roles["proxy"], ContainerRole::Sidecar);

        assert!(parse_roles("main").is_err());
        let err = parse_roles("main=leader").unwrap_err();
        assert!(matches!(err, PodwardenError::InvalidRole { .. }));
    }

    #[test]
    fn test_job_from_k8s() {
        let job: Job = serde_yaml::from_str(KEYSTONE_JOB).unwrap();
        let (id, spec) = JobSpec::from_k8s_job(&job).unwrap();
        assert_eq!(id, JobId::new("test-job"));
        assert_eq!(spec.completions, 1);
        assert_eq!(spec.backoff_limit, DEFAULT_BACKOFF_LIMIT);
        assert_eq!(spec.template.restart_policy, RestartPolicy::OnFailure);
        assert_eq!(spec.template.containers[0].role, ContainerRole::Keystone);
        assert_eq!(spec.template.containers[1].role, ContainerRole::Sidecar);
    }

    #[test]
    fn test_pod_from_k8s_grace_period() {
        let yaml = r#"
apiVersion: v1
kind: Pod
metadata:
  name: test
spec:
  terminationGracePeriodSeconds: 100
  containers:
    - name: test
      image: busybox
"#;
        let pod: Pod = serde_yaml::from_str(yaml).unwrap();
        let (id, spec) = PodSpec::from_k8s_pod(&pod).unwrap();
        assert_eq!(id.as_str(), "test");
        assert_eq!(spec.termination_grace_period_seconds, 100);
        assert_eq!(spec.containers[0].role, ContainerRole::Plain);
    }

    #[test]
    fn test_pod_roles_must_name_real_containers() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("p".to_string());
        pod.metadata.annotations = Some(
            [(ROLES_ANNOTATION.to_string(), "ghost=keystone".to_string())]
                .into_iter()
                .collect(),
        );
        pod.spec = Some(K8sPodSpec {
            containers: vec![k8s_openapi::api::core::v1::Container {
                name: "main".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(PodSpec::from_k8s_pod(&pod).is_err());
    }

    #[test]
    fn test_condition_to_k8s() {
        let now = Utc::now();
        let k8s = JobCondition::complete(now).to_k8s();
        assert_eq!(k8s.type_, "Complete");
        assert_eq!(k8s.status, "True");
        assert_eq!(k8s.last_transition_time, Some(Time(now)));
    }
}
