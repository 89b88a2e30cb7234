use crate::error::Result;
use async_trait::async_trait;
use podwarden_core::{PodId, PodSpec, SignalKind};

/// Trait for the container runtime the controller drives
///
/// The runtime is responsible for actually delivering signals and killing
/// processes. It reports what happened back to the controller as
/// `ContainerTransitionEvent`s, not through the return values here: an `Ok`
/// only means the request was accepted.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start the containers of a newly admitted pod
    ///
    /// Runtimes that launch pods on their own can keep the default no-op.
    async fn start_pod(&self, _pod_id: &PodId, _spec: &PodSpec) -> Result<()> {
        Ok(())
    }

    /// Deliver a termination signal to a running container
    async fn deliver_signal(
        &self,
        pod_id: &PodId,
        container_name: &str,
        signal: SignalKind,
    ) -> Result<()>;

    /// Kill a container immediately (SIGKILL)
    async fn force_kill(&self, pod_id: &PodId, container_name: &str) -> Result<()>;
}
