use crate::types::{ContainerPhase, PodId};
use serde::{Deserialize, Serialize};

/// A container state change observed by the container runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTransitionEvent {
    pub pod_id: PodId,
    pub container_name: String,
    pub phase: ContainerPhase,
    /// Present only for `Exited`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Monotonically increasing per container; orders out-of-order deliveries
    pub sequence: u64,
}

impl ContainerTransitionEvent {
    /// Create a `Running` event
    pub fn running(pod_id: impl Into<PodId>, container_name: impl Into<String>, sequence: u64) -> Self {
        Self {
            pod_id: pod_id.into(),
            container_name: container_name.into(),
            phase: ContainerPhase::Running,
            exit_code: None,
            sequence,
        }
    }

    /// Create an `Exited` event
    pub fn exited(
        pod_id: impl Into<PodId>,
        container_name: impl Into<String>,
        exit_code: i32,
        sequence: u64,
    ) -> Self {
        Self {
            pod_id: pod_id.into(),
            container_name: container_name.into(),
            phase: ContainerPhase::Exited,
            exit_code: Some(exit_code),
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exited_event_json() {
        let event = ContainerTransitionEvent::exited("p1", "main", 0, 7);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["podId"], "p1");
        assert_eq!(json["containerName"], "main");
        assert_eq!(json["phase"], "Exited");
        assert_eq!(json["exitCode"], 0);
        assert_eq!(json["sequence"], 7);
    }

    #[test]
    fn test_running_event_omits_exit_code() {
        let event = ContainerTransitionEvent::running("p1", "sidecar", 1);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("exitCode").is_none());
    }
}
