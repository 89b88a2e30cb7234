use crate::controller::PodController;
use crate::error::{Result, RuntimeError};
use crate::job::{JobCompletionProjector, JobUpdate};
use crate::types::PodEvent;
use chrono::Utc;
use podwarden_core::{JobCondition, JobId, JobSpec, PodId, PodOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct JobEntry {
    spec: JobSpec,
    projector: JobCompletionProjector,
    condition: watch::Sender<Option<JobCondition>>,
    /// Index used for the next pod created for this job
    next_index: usize,
}

#[derive(Default)]
struct JobRegistry {
    jobs: HashMap<JobId, JobEntry>,
    pod_to_job: HashMap<PodId, JobId>,
}

/// Job controller that turns pod outcomes into job conditions
///
/// Listens on the pod controller's event bus; pods are admitted through the
/// same pod controller.
pub struct JobController {
    pods: Arc<PodController>,
    registry: RwLock<JobRegistry>,
    events: Mutex<broadcast::Receiver<PodEvent>>,
}

impl JobController {
    pub fn new(pods: Arc<PodController>) -> Self {
        let events = pods.subscribe();
        Self {
            pods,
            registry: RwLock::new(JobRegistry::default()),
            events: Mutex::new(events),
        }
    }

    /// Create a job and admit its pods. Returns the admitted pod ids.
    pub async fn create_job(&self, job_id: impl Into<JobId>, spec: JobSpec) -> Result<Vec<PodId>> {
        let job_id = job_id.into();
        spec.validate(job_id.as_str())?;

        let pod_ids: Vec<PodId> = (0..spec.completions as usize)
            .map(|i| job_id.pod_id(i))
            .collect();

        {
            let mut registry = self.registry.write().await;
            if registry.jobs.contains_key(&job_id) {
                return Err(RuntimeError::job_already_exists(&job_id));
            }

            let mut projector = JobCompletionProjector::new(spec.backoff_limit);
            for pod_id in &pod_ids {
                projector.track_pod(pod_id.clone());
                registry.pod_to_job.insert(pod_id.clone(), job_id.clone());
            }

            let (condition, _) = watch::channel(None);
            registry.jobs.insert(
                job_id.clone(),
                JobEntry {
                    spec: spec.clone(),
                    projector,
                    condition,
                    next_index: pod_ids.len(),
                },
            );
        }

        info!(
            "Created job {} with {} pod(s), backoff limit {}",
            job_id, spec.completions, spec.backoff_limit
        );

        for pod_id in &pod_ids {
            self.pods
                .admit_pod(pod_id.clone(), spec.template.clone())
                .await?;
        }

        Ok(pod_ids)
    }

    /// Condition raised for the job, if any
    pub async fn job_condition(&self, job_id: &JobId) -> Result<Option<JobCondition>> {
        let registry = self.registry.read().await;
        let entry = registry
            .jobs
            .get(job_id)
            .ok_or_else(|| RuntimeError::job_not_found(job_id))?;
        let condition = entry.condition.borrow().clone();
        Ok(condition)
    }

    /// Pods currently counted towards the job
    pub async fn job_pods(&self, job_id: &JobId) -> Result<Vec<PodId>> {
        let registry = self.registry.read().await;
        let entry = registry
            .jobs
            .get(job_id)
            .ok_or_else(|| RuntimeError::job_not_found(job_id))?;
        Ok(entry.projector.pods().cloned().collect())
    }

    /// Wait until a condition is raised for the job
    pub async fn wait_for_condition(
        &self,
        job_id: &JobId,
        timeout: Duration,
    ) -> Result<JobCondition> {
        let mut rx = {
            let registry = self.registry.read().await;
            registry
                .jobs
                .get(job_id)
                .ok_or_else(|| RuntimeError::job_not_found(job_id))?
                .condition
                .subscribe()
        };

        let result = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(condition)) => condition
                .clone()
                .ok_or_else(|| RuntimeError::wait_timeout(format!("job {}", job_id), timeout)),
            Ok(Err(_)) => Err(RuntimeError::job_not_found(job_id)),
            Err(_) => Err(RuntimeError::wait_timeout(
                format!("a condition on job {}", job_id),
                timeout,
            )),
        };
        result
    }

    /// Consume pod events until cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting job controller");
        let mut events = self.events.lock().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Job controller shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(PodEvent::OutcomeChanged { pod_id, outcome }) => {
                        self.on_pod_outcome(&pod_id, outcome).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Job controller missed {} pod event(s); resyncing", missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Pod event bus closed; job controller stopping");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    /// Re-read the outcome of every tracked pod from the pod controller
    async fn resync(&self) {
        let tracked: Vec<PodId> = {
            let registry = self.registry.read().await;
            registry.pod_to_job.keys().cloned().collect()
        };

        for pod_id in tracked {
            match self.pods.pod_outcome(&pod_id).await {
                Ok(outcome) => self.on_pod_outcome(&pod_id, outcome).await,
                Err(e) => debug!("Skipping pod {} during resync: {}", pod_id, e),
            }
        }
    }

    async fn on_pod_outcome(&self, pod_id: &PodId, outcome: PodOutcome) {
        let replacement = {
            let mut registry = self.registry.write().await;
            let Some(job_id) = registry.pod_to_job.get(pod_id).cloned() else {
                return;
            };
            let Some(entry) = registry.jobs.get_mut(&job_id) else {
                return;
            };

            match entry.projector.on_pod_outcome(pod_id, outcome, Utc::now()) {
                JobUpdate::None => None,
                JobUpdate::Raised(condition) => {
                    info!(
                        "Job {} condition {}={} ({})",
                        job_id,
                        condition.type_,
                        condition.status,
                        condition.reason.as_deref().unwrap_or("")
                    );
                    entry.condition.send_replace(Some(condition));
                    None
                }
                JobUpdate::Retry { failed } => {
                    let new_pod = job_id.pod_id(entry.next_index);
                    entry.next_index += 1;
                    entry.projector.replace_pod(&failed, new_pod.clone());
                    let template = entry.spec.template.clone();
                    let failures = entry.projector.failures();
                    registry.pod_to_job.remove(&failed);
                    registry.pod_to_job.insert(new_pod.clone(), job_id.clone());

                    warn!(
                        "Pod {} of job {} failed ({} failure(s)); replacing it with {}",
                        failed, job_id, failures, new_pod
                    );
                    Some((new_pod, template))
                }
            }
        };

        if let Some((new_pod, template)) = replacement {
            if let Err(e) = self.pods.admit_pod(new_pod.clone(), template).await {
                error!("Failed to admit replacement pod {}: {}", new_pod, e);
            }
        }
    }
}
