use crate::error::{Result, RuntimeError};
use crate::termination::{TerminationDecision, TerminationRequest, FAR_FUTURE};
use crate::traits::ContainerRuntime;
use crate::types::{Backoff, PodEvent, PodStatus};
use crate::worker::{PodCommand, PodHandle, PodWorker};
use podwarden_core::{ContainerTransitionEvent, PodId, PodOutcome, PodPhase, PodSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest interval `poll_until` re-reads the status at
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the pod controller
#[derive(Debug, Clone)]
pub struct PodControllerConfig {
    /// Retry backoff for failed signal deliveries; retries stop at the deadline
    pub signal_backoff: Backoff,
    /// Force-kill attempts before the pod is marked Unknown
    pub force_kill_attempts: u32,
    /// Backoff between force-kill attempts
    pub force_kill_backoff: Backoff,
    /// Capacity of the pod event bus
    pub event_bus_capacity: usize,
    /// Terminate the remaining containers once a keystone pod finishes
    pub stop_sidecars_on_completion: bool,
}

impl Default for PodControllerConfig {
    fn default() -> Self {
        Self {
            signal_backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(5)),
            force_kill_attempts: 3,
            force_kill_backoff: Backoff::new(Duration::from_millis(50), Duration::from_secs(1)),
            event_bus_capacity: 1024,
            stop_sidecars_on_completion: true,
        }
    }
}

/// Pod controller that tracks container transitions, decides pod completion
/// and drives graceful termination
///
/// Every admitted pod is owned by its own worker task; the controller routes
/// events and requests to it and hands out its published status.
pub struct PodController {
    runtime: Arc<dyn ContainerRuntime>,
    config: PodControllerConfig,
    pods: RwLock<HashMap<PodId, PodHandle>>,
    events: broadcast::Sender<PodEvent>,
    token: CancellationToken,
}

impl PodController {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: PodControllerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_bus_capacity.max(1));
        Self {
            runtime,
            config,
            pods: RwLock::new(HashMap::new()),
            events,
            token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PodControllerConfig {
        &self.config
    }

    /// Admit a pod and ask the runtime to start it
    pub async fn admit_pod(&self, pod_id: impl Into<PodId>, spec: PodSpec) -> Result<()> {
        let pod_id = pod_id.into();
        spec.validate(pod_id.as_str())?;

        {
            let mut pods = self.pods.write().await;
            if pods.contains_key(&pod_id) {
                return Err(RuntimeError::pod_already_exists(&pod_id));
            }

            let handle = PodWorker::spawn(
                pod_id.clone(),
                spec.clone(),
                self.runtime.clone(),
                self.config.clone(),
                self.events.clone(),
                self.token.child_token(),
            );
            pods.insert(pod_id.clone(), handle);
        }

        info!(
            "Admitted pod {} with {} container(s), keystone: {}",
            pod_id,
            spec.containers.len(),
            spec.keystone().map(|c| c.name.as_str()).unwrap_or("none")
        );

        self.runtime.start_pod(&pod_id, &spec).await
    }

    async fn commands(&self, pod_id: &PodId) -> Result<mpsc::UnboundedSender<PodCommand>> {
        let pods = self.pods.read().await;
        pods.get(pod_id)
            .map(|h| h.commands.clone())
            .ok_or_else(|| RuntimeError::pod_not_found(pod_id))
    }

    /// Apply a container transition and return the pod's status afterwards
    pub async fn handle_transition(&self, event: ContainerTransitionEvent) -> Result<PodStatus> {
        let pod_id = event.pod_id.clone();
        let commands = self.commands(&pod_id).await?;

        let (reply, rx) = oneshot::channel();
        commands
            .send(PodCommand::Transition {
                event,
                reply: Some(reply),
            })
            .map_err(|_| RuntimeError::controller_shut_down(&pod_id))?;

        rx.await
            .map_err(|_| RuntimeError::controller_shut_down(&pod_id))?
    }

    /// Route a transition without waiting for it to be applied
    async fn dispatch(&self, event: ContainerTransitionEvent) {
        let commands = match self.commands(&event.pod_id).await {
            Ok(commands) => commands,
            Err(_) => {
                warn!(
                    "Dropping transition for container '{}' of unknown pod {}",
                    event.container_name, event.pod_id
                );
                return;
            }
        };

        let pod_id = event.pod_id.clone();
        if commands
            .send(PodCommand::Transition { event, reply: None })
            .is_err()
        {
            debug!("Worker for pod {} is gone; transition dropped", pod_id);
        }
    }

    /// Ask for a pod to be deleted with the given grace period
    ///
    /// Returns once the request is applied, without waiting for the pod to
    /// stop. A request only ever moves the deadline earlier.
    pub async fn request_termination(
        &self,
        pod_id: &PodId,
        grace_period: Duration,
    ) -> Result<TerminationDecision> {
        let commands = self.commands(pod_id).await?;
        let request = TerminationRequest::new(grace_period, Instant::now());

        let (reply, rx) = oneshot::channel();
        commands
            .send(PodCommand::Terminate { request, reply })
            .map_err(|_| RuntimeError::controller_shut_down(pod_id))?;

        rx.await.map_err(|_| RuntimeError::controller_shut_down(pod_id))
    }

    /// Completion outcome of a pod
    pub async fn pod_outcome(&self, pod_id: &PodId) -> Result<PodOutcome> {
        Ok(self.pod_status(pod_id).await?.outcome)
    }

    pub async fn pod_phase(&self, pod_id: &PodId) -> Result<PodPhase> {
        Ok(self.pod_status(pod_id).await?.phase)
    }

    pub async fn pod_status(&self, pod_id: &PodId) -> Result<PodStatus> {
        let pods = self.pods.read().await;
        let handle = pods
            .get(pod_id)
            .ok_or_else(|| RuntimeError::pod_not_found(pod_id))?;
        let status = handle.status.borrow().clone();
        Ok(status)
    }

    /// Receiver that always holds the pod's latest status
    pub async fn watch_pod(&self, pod_id: &PodId) -> Result<watch::Receiver<PodStatus>> {
        let pods = self.pods.read().await;
        pods.get(pod_id)
            .map(|h| h.status.clone())
            .ok_or_else(|| RuntimeError::pod_not_found(pod_id))
    }

    /// Stream of the pod's status, starting with the current one
    pub async fn status_stream(&self, pod_id: &PodId) -> Result<WatchStream<PodStatus>> {
        Ok(WatchStream::new(self.watch_pod(pod_id).await?))
    }

    /// Wait until `pred` holds for the pod's status
    pub async fn wait_for<F>(
        &self,
        pod_id: &PodId,
        what: &str,
        timeout: Duration,
        pred: F,
    ) -> Result<PodStatus>
    where
        F: FnMut(&PodStatus) -> bool,
    {
        let mut rx = self.watch_pod(pod_id).await?;
        let result = match tokio::time::timeout(timeout, rx.wait_for(pred)).await {
            Ok(Ok(status)) => Ok(status.clone()),
            Ok(Err(_)) => Err(RuntimeError::controller_shut_down(pod_id)),
            Err(_) => Err(RuntimeError::wait_timeout(
                format!("pod {} to {}", pod_id, what),
                timeout,
            )),
        };
        result
    }

    /// Wait for the pod to reach a terminal outcome
    pub async fn wait_for_outcome(&self, pod_id: &PodId, timeout: Duration) -> Result<PodOutcome> {
        let status = self
            .wait_for(pod_id, "finish", timeout, |s| s.outcome.is_terminal())
            .await?;
        Ok(status.outcome)
    }

    /// Wait for the pod's termination to complete
    pub async fn wait_for_stopped(&self, pod_id: &PodId, timeout: Duration) -> Result<PodStatus> {
        self.wait_for(pod_id, "stop", timeout, PodStatus::is_stopped)
            .await
    }

    /// Polling alternative to `wait_for`: re-read the status every `interval`
    pub async fn poll_until<F>(
        &self,
        pod_id: &PodId,
        interval: Duration,
        timeout: Duration,
        mut pred: F,
    ) -> Result<PodStatus>
    where
        F: FnMut(&PodStatus) -> bool,
    {
        let deadline = Instant::now() + timeout.min(FAR_FUTURE);
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        loop {
            ticker.tick().await;
            let status = self.pod_status(pod_id).await?;
            if pred(&status) {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::wait_timeout(
                    format!("pod {} to match the polled condition", pod_id),
                    timeout,
                ));
            }
        }
    }

    /// Subscribe to outcome changes and stops of every pod
    pub fn subscribe(&self) -> broadcast::Receiver<PodEvent> {
        self.events.subscribe()
    }

    pub async fn pod_ids(&self) -> Vec<PodId> {
        let pods = self.pods.read().await;
        let mut ids: Vec<PodId> = pods.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget a pod that has stopped or whose containers have all exited
    pub async fn remove_pod(&self, pod_id: &PodId) -> Result<()> {
        let mut pods = self.pods.write().await;
        let handle = pods
            .get(pod_id)
            .ok_or_else(|| RuntimeError::pod_not_found(pod_id))?;

        let status = handle.status.borrow().clone();
        let all_exited = status.containers.iter().all(|c| c.is_exited());
        if !status.is_stopped() && !all_exited {
            return Err(RuntimeError::pod_not_stopped(pod_id, status.phase));
        }

        if let Some(handle) = pods.remove(pod_id) {
            handle.token.cancel();
            handle.task.abort();
        }
        drop(pods);

        info!("Removed pod {}", pod_id);
        let _ = self.events.send(PodEvent::Removed {
            pod_id: pod_id.clone(),
        });
        Ok(())
    }

    /// Consume runtime transition events until cancelled or the sender closes
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<ContainerTransitionEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        info!("Starting pod controller");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Pod controller shutting down");
                    break;
                }
                _ = self.token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        info!("Runtime event channel closed; pod controller stopping");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    /// Stop every pod worker
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for PodController {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
