use miette::Diagnostic;
use thiserror::Error;

/// Runtime error type for pod completion and termination
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    /// Pod not found
    #[error("Pod not found: {pod_id}")]
    #[diagnostic(
        code(podwarden::runtime::pod_not_found),
        help("Verify the pod was admitted with `admit_pod()` and has not been removed")
    )]
    PodNotFound {
        #[allow(unused)]
        pod_id: String,
    },

    /// Pod already exists
    #[error("Pod already exists: {pod_id}")]
    #[diagnostic(
        code(podwarden::runtime::pod_already_exists),
        help("Remove the existing pod first with `remove_pod()`, or use a different pod id")
    )]
    PodAlreadyExists {
        #[allow(unused)]
        pod_id: String,
    },

    /// Pod has not stopped yet
    #[error("Pod {pod_id} is still {phase}")]
    #[diagnostic(
        code(podwarden::runtime::pod_not_stopped),
        help("Request termination and wait for the pod to stop before removing it")
    )]
    PodNotStopped {
        #[allow(unused)]
        pod_id: String,
        #[allow(unused)]
        phase: String,
    },

    /// Transition event names a container that is not in the pod spec
    #[error("Unknown container '{container_name}' in pod {pod_id}")]
    #[diagnostic(
        code(podwarden::runtime::unknown_container),
        help("The event was dropped. Check that the runtime reports container names exactly as declared in the pod spec")
    )]
    UnknownContainer {
        #[allow(unused)]
        pod_id: String,
        #[allow(unused)]
        container_name: String,
    },

    /// Job not found
    #[error("Job not found: {job_id}")]
    #[diagnostic(
        code(podwarden::runtime::job_not_found),
        help("Create the job first with `create_job()`")
    )]
    JobNotFound {
        #[allow(unused)]
        job_id: String,
    },

    /// Job already exists
    #[error("Job already exists: {job_id}")]
    #[diagnostic(
        code(podwarden::runtime::job_already_exists),
        help("Use a different job name")
    )]
    JobAlreadyExists {
        #[allow(unused)]
        job_id: String,
    },

    /// Runtime could not deliver a termination signal
    #[error("Failed to deliver {signal} to container '{container_name}' in pod {pod_id}: {message}")]
    #[diagnostic(
        code(podwarden::runtime::signal_delivery_failed),
        help("Delivery is retried until the grace period runs out; the container is force-killed at the deadline regardless")
    )]
    SignalDeliveryFailed {
        #[allow(unused)]
        pod_id: String,
        #[allow(unused)]
        container_name: String,
        #[allow(unused)]
        signal: String,
        #[allow(unused)]
        message: String,
    },

    /// Runtime could not force-kill a container
    #[error("Failed to force-kill container '{container_name}' in pod {pod_id}: {message}")]
    #[diagnostic(
        code(podwarden::runtime::force_kill_failed),
        help("The pod is reported with outcome Unknown. Inspect the container runtime on the node")
    )]
    ForceKillFailed {
        #[allow(unused)]
        pod_id: String,
        #[allow(unused)]
        container_name: String,
        #[allow(unused)]
        message: String,
    },

    /// The pod's worker task is gone
    #[error("Controller for pod {pod_id} has shut down")]
    #[diagnostic(
        code(podwarden::runtime::controller_shut_down),
        help("The pod controller was cancelled or the pod was removed while the request was in flight")
    )]
    ControllerShutDown {
        #[allow(unused)]
        pod_id: String,
    },

    /// A wait did not reach its condition in time
    #[error("Timed out after {timeout:?} waiting for {what}")]
    #[diagnostic(
        code(podwarden::runtime::wait_timeout),
        help("Increase the timeout or check the pod's status for the phase it is stuck in")
    )]
    WaitTimeout {
        #[allow(unused)]
        what: String,
        #[allow(unused)]
        timeout: std::time::Duration,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] podwarden_core::PodwardenError),
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn pod_not_found(pod_id: impl ToString) -> Self {
        Self::PodNotFound {
            pod_id: pod_id.to_string(),
        }
    }

    pub fn pod_already_exists(pod_id: impl ToString) -> Self {
        Self::PodAlreadyExists {
            pod_id: pod_id.to_string(),
        }
    }

    pub fn pod_not_stopped(pod_id: impl ToString, phase: impl ToString) -> Self {
        Self::PodNotStopped {
            pod_id: pod_id.to_string(),
            phase: phase.to_string(),
        }
    }

    pub fn unknown_container(pod_id: impl ToString, container_name: impl Into<String>) -> Self {
        Self::UnknownContainer {
            pod_id: pod_id.to_string(),
            container_name: container_name.into(),
        }
    }

    pub fn job_not_found(job_id: impl ToString) -> Self {
        Self::JobNotFound {
            job_id: job_id.to_string(),
        }
    }

    pub fn job_already_exists(job_id: impl ToString) -> Self {
        Self::JobAlreadyExists {
            job_id: job_id.to_string(),
        }
    }

    pub fn signal_delivery_failed(
        pod_id: impl ToString,
        container_name: impl Into<String>,
        signal: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::SignalDeliveryFailed {
            pod_id: pod_id.to_string(),
            container_name: container_name.into(),
            signal: signal.to_string(),
            message: message.into(),
        }
    }

    pub fn force_kill_failed(
        pod_id: impl ToString,
        container_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ForceKillFailed {
            pod_id: pod_id.to_string(),
            container_name: container_name.into(),
            message: message.into(),
        }
    }

    pub fn controller_shut_down(pod_id: impl ToString) -> Self {
        Self::ControllerShutDown {
            pod_id: pod_id.to_string(),
        }
    }

    pub fn wait_timeout(what: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::WaitTimeout {
            what: what.into(),
            timeout,
        }
    }
}
