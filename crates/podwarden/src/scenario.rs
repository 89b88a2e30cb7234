use podwarden_core::k8s_openapi::api::batch::v1::Job;
use podwarden_core::k8s_openapi::api::core::v1::Pod;
use podwarden_core::{from_yaml, JobId, JobSpec, PodId, PodSpec, PodwardenError, Result};
use podwarden_runtime::ContainerScript;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

fn default_timeout_seconds() -> u64 {
    300
}

/// A delete request issued while the scenario runs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletion {
    /// Delay after the workload is admitted
    #[serde(default)]
    pub after_ms: u64,
    pub grace_period_seconds: u64,
    /// Target pod; defaults to the scenario's pod or the job's first pod
    #[serde(default)]
    pub pod: Option<String>,
}

/// A simulated workload: one pod or one job, scripted container behaviour
/// and the delete requests to issue against it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub pod: Option<PodSpec>,
    #[serde(default)]
    pub job: Option<JobSpec>,
    /// Scripts by container name
    #[serde(default)]
    pub simulate: BTreeMap<String, ContainerScript>,
    #[serde(default)]
    pub deletions: Vec<Deletion>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub enum Workload {
    Pod(PodSpec),
    Job(JobSpec),
}

impl Scenario {
    pub fn workload(&self) -> Result<Workload> {
        match (&self.pod, &self.job) {
            (Some(pod), None) => Ok(Workload::Pod(pod.clone())),
            (None, Some(job)) => Ok(Workload::Job(job.clone())),
            _ => Err(PodwardenError::invalid_object(
                "Scenario",
                format!("scenario '{}' must define exactly one of `pod` or `job`", self.name),
            )),
        }
    }

    /// Pod that deletions without an explicit target apply to
    pub fn default_target(&self) -> PodId {
        match &self.job {
            Some(_) => JobId::new(self.name.as_str()).pod_id(0),
            None => PodId::new(self.name.as_str()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.workload()? {
            Workload::Pod(spec) => spec.validate(&self.name),
            Workload::Job(spec) => spec.validate(&self.name),
        }
    }
}

/// Anything `podwarden validate` accepts
#[derive(Debug, Clone)]
pub enum Manifest {
    Scenario(Box<Scenario>),
    Pod(PodId, PodSpec),
    Job(JobId, JobSpec),
}

impl Manifest {
    /// Parse a scenario, or a Kubernetes Pod or Job when `apiVersion` is set
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = from_yaml(text)?;
        if value.get("apiVersion").is_none() {
            let scenario: Scenario = from_yaml(text)?;
            scenario.validate()?;
            return Ok(Manifest::Scenario(Box::new(scenario)));
        }

        match value.get("kind").and_then(|k| k.as_str()) {
            Some("Pod") => {
                let pod: Pod = from_yaml(text)?;
                let (id, spec) = PodSpec::from_k8s_pod(&pod)?;
                Ok(Manifest::Pod(id, spec))
            }
            Some("Job") => {
                let job: Job = from_yaml(text)?;
                let (id, spec) = JobSpec::from_k8s_job(&job)?;
                Ok(Manifest::Job(id, spec))
            }
            other => Err(PodwardenError::invalid_object(
                other.unwrap_or("<missing>"),
                "only Pod and Job manifests are supported",
            )),
        }
    }
}

pub fn read_manifest(path: &Path) -> miette::Result<Manifest> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read manifest '{}': {}", path.display(), e))?;
    Ok(Manifest::parse(&text)?)
}

pub fn read_scenario(path: &Path) -> miette::Result<Scenario> {
    match read_manifest(path)? {
        Manifest::Scenario(scenario) => Ok(*scenario),
        _ => Err(miette::miette!(
            help = "Wrap the workload in a scenario with `name`, `pod` or `job`, and `simulate`",
            "'{}' is a Kubernetes manifest, not a scenario",
            path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwarden_core::ContainerRole;
    use podwarden_runtime::SignalResponse;

    const KEYSTONE_SCENARIO: &str = r#"
name: keystone-job
job:
  completions: 1
  backoffLimit: 2
  template:
    restartPolicy: OnFailure
    containers:
      - name: main
        role: keystone
      - name: sidecar
        role: sidecar
simulate:
  main:
    exitAfterMs: 1000
    exitCode: 0
  sidecar:
    onSignal: ignore
"#;

    #[test]
    fn test_parse_scenario() {
        let manifest = Manifest::parse(KEYSTONE_SCENARIO).unwrap();
        let Manifest::Scenario(scenario) = manifest else {
            panic!("expected a scenario");
        };
        assert_eq!(scenario.timeout_seconds, 300);
        assert_eq!(scenario.default_target(), PodId::new("keystone-job-0"));
        assert_eq!(scenario.simulate["main"].exit_after_ms, Some(1000));
        assert_eq!(scenario.simulate["sidecar"].on_signal, SignalResponse::Ignore);

        let Workload::Job(job) = scenario.workload().unwrap() else {
            panic!("expected a job");
        };
        assert_eq!(job.backoff_limit, 2);
        assert_eq!(job.template.containers[0].role, ContainerRole::Keystone);
    }

    #[test]
    fn test_scenario_needs_exactly_one_workload() {
        let err = Manifest::parse("name: empty\n").unwrap_err();
        assert!(matches!(err, PodwardenError::InvalidObject { .. }));
    }

    #[test]
    fn test_parse_k8s_pod() {
        let yaml = r#"
apiVersion: v1
kind: Pod
metadata:
  name: p1
  annotations:
    podwarden.io/container-roles: main=keystone,sidecar=sidecar
spec:
  terminationGracePeriodSeconds: 100
  containers:
    - name: main
      image: busybox
    - name: sidecar
      image: busybox
"#;
        let Manifest::Pod(id, spec) = Manifest::parse(yaml).unwrap() else {
            panic!("expected a pod");
        };
        assert_eq!(id, PodId::new("p1"));
        assert_eq!(spec.termination_grace_period_seconds, 100);
        assert_eq!(spec.keystone().unwrap().name, "main");
    }

    #[test]
    fn test_unsupported_kind() {
        let yaml = "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n";
        assert!(Manifest::parse(yaml).is_err());
    }

    #[test]
    fn test_read_scenario_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.yaml");
        std::fs::write(&path, KEYSTONE_SCENARIO).unwrap();

        let scenario = read_scenario(&path).unwrap();
        assert_eq!(scenario.name, "keystone-job");
        assert!(read_scenario(&dir.path().join("missing.yaml")).is_err());
    }
}
