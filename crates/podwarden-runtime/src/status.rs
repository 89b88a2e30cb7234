use podwarden_core::{ContainerPhase, ContainerRole, PodSpec, RestartPolicy};
use std::sync::Arc;

/// Exit code reported for a container killed with SIGKILL
pub const KILLED_EXIT_CODE: i32 = 137;

/// Observed state of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub role: ContainerRole,
    pub phase: ContainerPhase,
    /// Present only while `phase == Exited`
    pub exit_code: Option<i32>,
    pub restart_count: u32,
    /// Sequence number of the last applied transition
    pub last_sequence: Option<u64>,
}

impl ContainerState {
    pub fn is_exited(&self) -> bool {
        self.phase == ContainerPhase::Exited
    }

    pub fn exited_with(&self, code: i32) -> bool {
        self.is_exited() && self.exit_code == Some(code)
    }
}

/// Immutable view of a pod's containers, handed to the evaluator
#[derive(Debug, Clone)]
pub struct PodSnapshot {
    pub containers: Arc<[ContainerState]>,
    pub restart_policy: RestartPolicy,
    pub restart_limit: u32,
}

impl PodSnapshot {
    pub fn keystone(&self) -> Option<&ContainerState> {
        self.containers
            .iter()
            .find(|c| c.role == ContainerRole::Keystone)
    }

    pub fn all_exited(&self) -> bool {
        self.containers.iter().all(ContainerState::is_exited)
    }

    /// The same snapshot evaluated as if nothing will be restarted; used once
    /// the pod is being deleted
    pub fn without_restarts(mut self) -> Self {
        self.restart_policy = RestartPolicy::Never;
        self
    }
}

/// What `record_transition` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Applied,
    /// Sequence not newer than the last applied one; dropped
    Stale,
    /// No container with that name in the pod
    UnknownContainer,
}

/// Holds per-container observed state for one pod
#[derive(Debug)]
pub struct ContainerStatusTracker {
    containers: Vec<ContainerState>,
    restart_policy: RestartPolicy,
    restart_limit: u32,
}

impl ContainerStatusTracker {
    pub fn new(spec: &PodSpec) -> Self {
        let containers = spec
            .containers
            .iter()
            .map(|c| ContainerState {
                name: c.name.clone(),
                role: c.role,
                phase: ContainerPhase::Pending,
                exit_code: None,
                restart_count: 0,
                last_sequence: None,
            })
            .collect();

        Self {
            containers,
            restart_policy: spec.restart_policy,
            restart_limit: spec.restart_limit,
        }
    }

    /// Apply a transition; last write wins by sequence number, not arrival order
    pub fn record_transition(
        &mut self,
        container_name: &str,
        phase: ContainerPhase,
        exit_code: Option<i32>,
        sequence: u64,
    ) -> RecordOutcome {
        let container = match self.containers.iter_mut().find(|c| c.name == container_name) {
            Some(c) => c,
            None => return RecordOutcome::UnknownContainer,
        };

        if container.last_sequence.is_some_and(|last| sequence <= last) {
            return RecordOutcome::Stale;
        }

        if container.phase == ContainerPhase::Exited && phase == ContainerPhase::Running {
            container.restart_count += 1;
        }

        container.phase = phase;
        container.exit_code = match phase {
            ContainerPhase::Exited => exit_code,
            _ => None,
        };
        container.last_sequence = Some(sequence);
        RecordOutcome::Applied
    }

    /// Record a confirmed force kill the runtime has not reported yet.
    /// Returns false if the container had already exited.
    ///
    /// The sequence number is left alone so the runtime's own exit report
    /// still applies when it arrives.
    pub fn mark_killed(&mut self, container_name: &str) -> bool {
        match self.containers.iter_mut().find(|c| c.name == container_name) {
            Some(c) if !c.is_exited() => {
                c.phase = ContainerPhase::Exited;
                c.exit_code = Some(KILLED_EXIT_CODE);
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> PodSnapshot {
        PodSnapshot {
            containers: self.containers.clone().into(),
            restart_policy: self.restart_policy,
            restart_limit: self.restart_limit,
        }
    }

    pub fn all_exited(&self) -> bool {
        self.containers.iter().all(ContainerState::is_exited)
    }

    /// Names of containers that have not exited, in spec order
    pub fn active_containers(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|c| !c.is_exited())
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwarden_core::ContainerSpec;

    fn tracker() -> ContainerStatusTracker {
        let spec = PodSpec::new(vec![
            ContainerSpec::keystone("main"),
            ContainerSpec::sidecar("sidecar"),
        ]);
        ContainerStatusTracker::new(&spec)
    }

    #[test]
    fn test_initial_state_is_pending_in_spec_order() {
        let snap = tracker().snapshot();
        let names: Vec<_> = snap.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["main", "sidecar"]);
        assert!(snap
            .containers
            .iter()
            .all(|c| c.phase == ContainerPhase::Pending));
    }

    #[test]
    fn test_out_of_order_delivery_keeps_latest_sequence() {
        let mut t = tracker();
        assert_eq!(
            t.record_transition("main", ContainerPhase::Exited, Some(0), 2),
            RecordOutcome::Applied
        );
        // The older Running event arrives late
        assert_eq!(
            t.record_transition("main", ContainerPhase::Running, None, 1),
            RecordOutcome::Stale
        );

        let snap = t.snapshot();
        assert!(snap.containers[0].exited_with(0));
        assert_eq!(snap.containers[0].restart_count, 0);
    }

    #[test]
    fn test_duplicate_delivery_is_stale() {
        let mut t = tracker();
        t.record_transition("main", ContainerPhase::Running, None, 5);
        assert_eq!(
            t.record_transition("main", ContainerPhase::Running, None, 5),
            RecordOutcome::Stale
        );
    }

    #[test]
    fn test_unknown_container() {
        let mut t = tracker();
        assert_eq!(
            t.record_transition("ghost", ContainerPhase::Running, None, 1),
            RecordOutcome::UnknownContainer
        );
    }

    #[test]
    fn test_restart_counted_and_exit_code_cleared() {
        let mut t = tracker();
        t.record_transition("main", ContainerPhase::Running, None, 1);
        t.record_transition("main", ContainerPhase::Exited, Some(1), 2);
        t.record_transition("main", ContainerPhase::Running, None, 3);

        let snap = t.snapshot();
        assert_eq!(snap.containers[0].restart_count, 1);
        assert_eq!(snap.containers[0].exit_code, None);
        assert_eq!(t.active_containers(), vec!["main", "sidecar"]);
    }

    #[test]
    fn test_mark_killed_keeps_runtime_report_applicable() {
        let mut t = tracker();
        t.record_transition("main", ContainerPhase::Running, None, 1);
        assert!(t.mark_killed("main"));
        assert!(!t.mark_killed("main"));
        assert!(!t.mark_killed("ghost"));
        assert!(t.snapshot().containers[0].exited_with(KILLED_EXIT_CODE));

        assert_eq!(
            t.record_transition("main", ContainerPhase::Exited, Some(KILLED_EXIT_CODE), 2),
            RecordOutcome::Applied
        );
        assert_eq!(t.snapshot().containers[0].restart_count, 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut t = tracker();
        let before = t.snapshot();
        t.record_transition("main", ContainerPhase::Running, None, 1);
        assert_eq!(before.containers[0].phase, ContainerPhase::Pending);
        assert!(!t.all_exited());
    }
}
