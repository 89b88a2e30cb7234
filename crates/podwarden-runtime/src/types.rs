use crate::status::ContainerState;
use crate::termination::{StopReason, TerminationState};
use podwarden_core::{PodId, PodOutcome, PodPhase};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Latest observed state of a pod, published after every applied event
#[derive(Debug, Clone)]
pub struct PodStatus {
    pub pod_id: PodId,
    /// Assigned at admission; distinguishes re-admissions of the same id
    pub uid: Uuid,
    pub outcome: PodOutcome,
    pub phase: PodPhase,
    pub termination: TerminationState,
    /// Times termination signals were issued to the pod
    pub signal_deliveries: u32,
    pub containers: Arc<[ContainerState]>,
    /// Set when the pod's outcome could not be determined
    pub diagnostic: Option<String>,
}

impl PodStatus {
    pub fn is_stopped(&self) -> bool {
        matches!(self.termination, TerminationState::Stopped { .. })
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.termination {
            TerminationState::Stopped { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.termination {
            TerminationState::Terminating { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    pub fn container(&self, name: &str) -> Option<&ContainerState> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Notifications published on the controller's event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    /// Published once per actual outcome transition
    OutcomeChanged { pod_id: PodId, outcome: PodOutcome },
    Stopped { pod_id: PodId, reason: StopReason },
    Removed { pod_id: PodId },
}

impl PodEvent {
    pub fn pod_id(&self) -> &PodId {
        match self {
            PodEvent::OutcomeChanged { pod_id, .. }
            | PodEvent::Stopped { pod_id, .. }
            | PodEvent::Removed { pod_id } => pod_id,
        }
    }
}

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay to use after `current`
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let d1 = backoff.next(backoff.initial);
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(backoff.next(d1), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_with_unbounded_max_saturates() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::MAX);
        assert_eq!(backoff.next(Duration::MAX), Duration::MAX);
        assert_eq!(backoff.next(Duration::from_secs(1)), Duration::from_secs(2));
    }

    #[test]
    fn test_event_pod_id() {
        let event = PodEvent::OutcomeChanged {
            pod_id: PodId::new("p1"),
            outcome: PodOutcome::Succeeded,
        };
        assert_eq!(event.pod_id().as_str(), "p1");
    }
}
