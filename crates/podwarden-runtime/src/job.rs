use chrono::{DateTime, Utc};
use podwarden_core::{JobCondition, PodId, PodOutcome};
use std::collections::BTreeMap;

/// What the owner of a projector has to do after an outcome was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    None,
    /// A job condition was raised; it never changes afterwards
    Raised(JobCondition),
    /// The pod failed within the backoff limit and should be replaced
    Retry { failed: PodId },
}

/// Projects pod outcomes onto a job-level condition
#[derive(Debug)]
pub struct JobCompletionProjector {
    pods: BTreeMap<PodId, PodOutcome>,
    failures: u32,
    backoff_limit: u32,
    condition: Option<JobCondition>,
}

impl JobCompletionProjector {
    pub fn new(backoff_limit: u32) -> Self {
        Self {
            pods: BTreeMap::new(),
            failures: 0,
            backoff_limit,
            condition: None,
        }
    }

    pub fn track_pod(&mut self, pod_id: PodId) {
        self.pods.entry(pod_id).or_default();
    }

    /// Track `replacement` in place of a failed pod
    pub fn replace_pod(&mut self, failed: &PodId, replacement: PodId) {
        self.pods.remove(failed);
        self.track_pod(replacement);
    }

    pub fn is_tracked(&self, pod_id: &PodId) -> bool {
        self.pods.contains_key(pod_id)
    }

    pub fn pods(&self) -> impl Iterator<Item = &PodId> {
        self.pods.keys()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn condition(&self) -> Option<&JobCondition> {
        self.condition.as_ref()
    }

    pub fn on_pod_outcome(
        &mut self,
        pod_id: &PodId,
        outcome: PodOutcome,
        now: DateTime<Utc>,
    ) -> JobUpdate {
        if self.condition.is_some() {
            return JobUpdate::None;
        }
        let Some(previous) = self.pods.get_mut(pod_id) else {
            return JobUpdate::None;
        };
        if *previous == outcome {
            return JobUpdate::None;
        }
        *previous = outcome;

        match outcome {
            PodOutcome::Failed | PodOutcome::Unknown => {
                self.failures += 1;
                if self.failures > self.backoff_limit {
                    let condition = JobCondition::failed(
                        now,
                        format!(
                            "Job has reached the specified backoff limit ({} failed pod(s))",
                            self.failures
                        ),
                    );
                    self.condition = Some(condition.clone());
                    JobUpdate::Raised(condition)
                } else {
                    JobUpdate::Retry {
                        failed: pod_id.clone(),
                    }
                }
            }
            PodOutcome::Succeeded
                if self.pods.values().all(|o| *o == PodOutcome::Succeeded) =>
            {
                let condition = JobCondition::complete(now);
                self.condition = Some(condition.clone());
                JobUpdate::Raised(condition)
            }
            _ => JobUpdate::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use podwarden_core::JobConditionType;

    #[test]
    fn test_complete_raised_once_with_stable_timestamp() {
        let mut projector = JobCompletionProjector::new(6);
        let pod = PodId::new("job-0");
        projector.track_pod(pod.clone());

        let t0 = Utc::now();
        let first = projector.on_pod_outcome(&pod, PodOutcome::Succeeded, t0);
        match first {
            JobUpdate::Raised(c) => {
                assert!(c.is_true(JobConditionType::Complete));
                assert_eq!(c.last_transition_time, t0);
            }
            other => panic!("expected Raised, got {other:?}"),
        }

        let later = t0 + Duration::seconds(5);
        assert_eq!(
            projector.on_pod_outcome(&pod, PodOutcome::Succeeded, later),
            JobUpdate::None
        );
        assert_eq!(projector.condition().unwrap().last_transition_time, t0);
    }

    #[test]
    fn test_complete_waits_for_every_pod() {
        let mut projector = JobCompletionProjector::new(6);
        let a = PodId::new("job-0");
        let b = PodId::new("job-1");
        projector.track_pod(a.clone());
        projector.track_pod(b.clone());

        assert_eq!(
            projector.on_pod_outcome(&a, PodOutcome::Succeeded, Utc::now()),
            JobUpdate::None
        );
        assert!(matches!(
            projector.on_pod_outcome(&b, PodOutcome::Succeeded, Utc::now()),
            JobUpdate::Raised(_)
        ));
    }

    #[test]
    fn test_failures_retry_until_backoff_limit() {
        let mut projector = JobCompletionProjector::new(1);
        let first = PodId::new("job-0");
        projector.track_pod(first.clone());

        assert_eq!(
            projector.on_pod_outcome(&first, PodOutcome::Failed, Utc::now()),
            JobUpdate::Retry {
                failed: first.clone()
            }
        );

        let second = PodId::new("job-1");
        projector.replace_pod(&first, second.clone());
        assert!(!projector.is_tracked(&first));

        match projector.on_pod_outcome(&second, PodOutcome::Failed, Utc::now()) {
            JobUpdate::Raised(c) => {
                assert!(c.is_true(JobConditionType::Failed));
                assert_eq!(c.reason.as_deref(), Some("BackoffLimitExceeded"));
            }
            other => panic!("expected Raised, got {other:?}"),
        }
        assert_eq!(projector.failures(), 2);
    }

    #[test]
    fn test_zero_backoff_limit_fails_on_first_failure() {
        let mut projector = JobCompletionProjector::new(0);
        let pod = PodId::new("job-0");
        projector.track_pod(pod.clone());
        assert!(matches!(
            projector.on_pod_outcome(&pod, PodOutcome::Failed, Utc::now()),
            JobUpdate::Raised(_)
        ));
    }

    #[test]
    fn test_untracked_and_non_terminal_outcomes_ignored() {
        let mut projector = JobCompletionProjector::new(6);
        let pod = PodId::new("job-0");
        projector.track_pod(pod.clone());

        assert_eq!(
            projector.on_pod_outcome(&PodId::new("other"), PodOutcome::Succeeded, Utc::now()),
            JobUpdate::None
        );
        assert_eq!(
            projector.on_pod_outcome(&pod, PodOutcome::Running, Utc::now()),
            JobUpdate::None
        );
        assert!(projector.condition().is_none());
    }
}
