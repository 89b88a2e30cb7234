use crate::status::{ContainerState, PodSnapshot};
use podwarden_core::{ContainerPhase, PodOutcome, RestartPolicy};

/// Derive a pod's completion outcome from a snapshot of its containers.
///
/// Pure and order-independent: the same snapshot always yields the same
/// outcome, whichever container transitioned last.
pub fn evaluate(snapshot: &PodSnapshot) -> PodOutcome {
    if let Some(keystone) = snapshot.keystone() {
        // Sidecars and plain containers do not matter once the keystone exits
        if keystone.is_exited() {
            return if keystone.exit_code == Some(0) {
                PodOutcome::Succeeded
            } else {
                PodOutcome::Failed
            };
        }
        return pending_or_running(snapshot);
    }

    let mut all_succeeded = true;
    for container in snapshot.containers.iter() {
        if !container.is_exited() {
            all_succeeded = false;
            continue;
        }

        if exited_non_zero(container) {
            if !will_restart(snapshot, container) {
                return PodOutcome::Failed;
            }
            all_succeeded = false;
        } else if snapshot.restart_policy == RestartPolicy::Always {
            // Clean exits are restarted too
            all_succeeded = false;
        }
    }

    if all_succeeded {
        PodOutcome::Succeeded
    } else {
        pending_or_running(snapshot)
    }
}

fn exited_non_zero(container: &ContainerState) -> bool {
    container.is_exited() && container.exit_code != Some(0)
}

fn will_restart(snapshot: &PodSnapshot, container: &ContainerState) -> bool {
    let code = container.exit_code.unwrap_or(-1);
    snapshot.restart_policy.restarts(code) && container.restart_count < snapshot.restart_limit
}

fn pending_or_running(snapshot: &PodSnapshot) -> PodOutcome {
    if snapshot
        .containers
        .iter()
        .all(|c| c.phase == ContainerPhase::Pending)
    {
        PodOutcome::Pending
    } else {
        PodOutcome::Running
    }
}

/// Latches the evaluated outcome so terminal results never revert
#[derive(Debug, Default)]
pub struct CompletionEvaluator {
    outcome: PodOutcome,
}

impl CompletionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome(&self) -> PodOutcome {
        self.outcome
    }

    /// Re-evaluate after a transition. Returns the new outcome if it changed.
    pub fn observe(&mut self, snapshot: &PodSnapshot) -> Option<PodOutcome> {
        if self.outcome.is_terminal() {
            return None;
        }
        let next = evaluate(snapshot);
        if next == self.outcome {
            return None;
        }
        self.outcome = next;
        Some(next)
    }

    /// Forced kill could not be confirmed. No-op once the outcome is terminal.
    pub fn mark_unknown(&mut self) -> bool {
        if self.outcome.is_terminal() {
            return false;
        }
        self.outcome = PodOutcome::Unknown;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ContainerStatusTracker;
    use podwarden_core::{ContainerSpec, PodSpec};

    fn keystone_tracker() -> ContainerStatusTracker {
        ContainerStatusTracker::new(
            &PodSpec::new(vec![
                ContainerSpec::keystone("main"),
                ContainerSpec::sidecar("sidecar"),
            ])
            .with_restart_policy(RestartPolicy::OnFailure),
        )
    }

    fn plain_tracker(policy: RestartPolicy, limit: u32) -> ContainerStatusTracker {
        ContainerStatusTracker::new(
            &PodSpec::new(vec![ContainerSpec::plain("a"), ContainerSpec::plain("b")])
                .with_restart_policy(policy)
                .with_restart_limit(limit),
        )
    }

    #[test]
    fn test_keystone_success_ignores_running_sidecar() {
        let mut t = keystone_tracker();
        t.record_transition("main", ContainerPhase::Running, None, 1);
        t.record_transition("sidecar", ContainerPhase::Running, None, 1);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Running);

        t.record_transition("main", ContainerPhase::Exited, Some(0), 2);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Succeeded);
    }

    #[test]
    fn test_keystone_non_zero_exit_fails() {
        let mut t = keystone_tracker();
        t.record_transition("main", ContainerPhase::Running, None, 1);
        t.record_transition("main", ContainerPhase::Exited, Some(2), 2);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Failed);
    }

    #[test]
    fn test_sidecar_failure_does_not_decide_keystone_pod() {
        let mut t = keystone_tracker();
        t.record_transition("main", ContainerPhase::Running, None, 1);
        t.record_transition("sidecar", ContainerPhase::Exited, Some(1), 1);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Running);
    }

    #[test]
    fn test_pending_until_first_start() {
        let t = keystone_tracker();
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Pending);
    }

    #[test]
    fn test_plain_pod_requires_all_exits() {
        let mut t = plain_tracker(RestartPolicy::Never, 0);
        t.record_transition("a", ContainerPhase::Running, None, 1);
        t.record_transition("b", ContainerPhase::Running, None, 1);
        t.record_transition("a", ContainerPhase::Exited, Some(0), 2);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Running);

        t.record_transition("b", ContainerPhase::Exited, Some(0), 2);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Succeeded);
    }

    #[test]
    fn test_plain_pod_fails_on_non_zero_under_never() {
        let mut t = plain_tracker(RestartPolicy::Never, 6);
        t.record_transition("a", ContainerPhase::Exited, Some(1), 1);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Failed);
    }

    #[test]
    fn test_on_failure_retries_until_limit() {
        let mut t = plain_tracker(RestartPolicy::OnFailure, 1);
        t.record_transition("a", ContainerPhase::Running, None, 1);
        t.record_transition("a", ContainerPhase::Exited, Some(1), 2);
        // One restart remaining
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Running);

        t.record_transition("a", ContainerPhase::Running, None, 3);
        t.record_transition("a", ContainerPhase::Exited, Some(1), 4);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Failed);
    }

    #[test]
    fn test_always_policy_never_completes_without_keystone() {
        let mut t = plain_tracker(RestartPolicy::Always, 6);
        t.record_transition("a", ContainerPhase::Exited, Some(0), 1);
        t.record_transition("b", ContainerPhase::Exited, Some(0), 1);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Running);
    }

    #[test]
    fn test_exit_without_code_counts_as_failure() {
        let mut t = plain_tracker(RestartPolicy::Never, 0);
        t.record_transition("a", ContainerPhase::Exited, None, 1);
        assert_eq!(evaluate(&t.snapshot()), PodOutcome::Failed);
    }

    #[test]
    fn test_evaluation_is_order_independent() {
        let mut first = plain_tracker(RestartPolicy::Never, 0);
        first.record_transition("a", ContainerPhase::Exited, Some(0), 1);
        first.record_transition("b", ContainerPhase::Exited, Some(0), 1);

        let mut second = plain_tracker(RestartPolicy::Never, 0);
        second.record_transition("b", ContainerPhase::Exited, Some(0), 1);
        second.record_transition("a", ContainerPhase::Exited, Some(0), 1);

        assert_eq!(evaluate(&first.snapshot()), evaluate(&second.snapshot()));
    }

    #[test]
    fn test_evaluator_latches_terminal_outcome() {
        let mut t = keystone_tracker();
        let mut evaluator = CompletionEvaluator::new();

        t.record_transition("main", ContainerPhase::Running, None, 1);
        assert_eq!(evaluator.observe(&t.snapshot()), Some(PodOutcome::Running));
        assert_eq!(evaluator.observe(&t.snapshot()), None);

        t.record_transition("main", ContainerPhase::Exited, Some(0), 2);
        assert_eq!(evaluator.observe(&t.snapshot()), Some(PodOutcome::Succeeded));

        // Keystone restarts after its clean exit; the success stands
        t.record_transition("main", ContainerPhase::Running, None, 3);
        assert_eq!(evaluator.observe(&t.snapshot()), None);
        assert_eq!(evaluator.outcome(), PodOutcome::Succeeded);
        assert!(!evaluator.mark_unknown());
    }

    #[test]
    fn test_mark_unknown_before_terminal() {
        let mut evaluator = CompletionEvaluator::new();
        assert!(evaluator.mark_unknown());
        assert_eq!(evaluator.outcome(), PodOutcome::Unknown);
    }
}
