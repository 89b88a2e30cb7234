//! Per-pod serialization point.
//!
//! Each admitted pod gets one worker task that owns its status tracker,
//! completion evaluator and termination manager. Transitions, termination
//! requests, deadline fires and force-kill failures all arrive over the
//! worker's command channel and are applied one at a time. Calls into the
//! container runtime run in spawned tasks so the worker never waits on them.

use crate::completion::CompletionEvaluator;
use crate::controller::PodControllerConfig;
use crate::error::{Result, RuntimeError};
use crate::status::{ContainerStatusTracker, RecordOutcome};
use crate::termination::{
    DeadlineFire, DeadlineToken, StopReason, TerminationDecision, TerminationManager,
    TerminationRequest, TerminationState,
};
use crate::traits::ContainerRuntime;
use crate::types::{Backoff, PodEvent, PodStatus};
use podwarden_core::{ContainerTransitionEvent, PodId, PodOutcome, PodPhase, PodSpec, SignalKind};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub(crate) enum PodCommand {
    Transition {
        event: ContainerTransitionEvent,
        reply: Option<oneshot::Sender<Result<PodStatus>>>,
    },
    Terminate {
        request: TerminationRequest,
        reply: oneshot::Sender<TerminationDecision>,
    },
    DeadlineElapsed {
        token: DeadlineToken,
    },
    ForceKilled {
        container_name: String,
    },
    ForceKillFailed {
        container_name: String,
        message: String,
    },
}

/// Controller-side handle to a running worker
pub(crate) struct PodHandle {
    pub commands: mpsc::UnboundedSender<PodCommand>,
    pub status: watch::Receiver<PodStatus>,
    pub token: CancellationToken,
    pub task: JoinHandle<()>,
}

pub(crate) struct PodWorker {
    pod_id: PodId,
    uid: Uuid,
    spec: PodSpec,
    tracker: ContainerStatusTracker,
    evaluator: CompletionEvaluator,
    termination: TerminationManager,
    runtime: Arc<dyn ContainerRuntime>,
    config: PodControllerConfig,
    commands: mpsc::UnboundedSender<PodCommand>,
    status_tx: watch::Sender<PodStatus>,
    events: broadcast::Sender<PodEvent>,
    token: CancellationToken,
    deadline_timer: Option<CancellationToken>,
    signalling: Option<CancellationToken>,
    diagnostic: Option<String>,
}

impl PodWorker {
    /// Spawn a worker for an admitted pod
    pub(crate) fn spawn(
        pod_id: PodId,
        spec: PodSpec,
        runtime: Arc<dyn ContainerRuntime>,
        config: PodControllerConfig,
        events: broadcast::Sender<PodEvent>,
        token: CancellationToken,
    ) -> PodHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let tracker = ContainerStatusTracker::new(&spec);
        let uid = Uuid::new_v4();

        let initial = PodStatus {
            pod_id: pod_id.clone(),
            uid,
            outcome: PodOutcome::Pending,
            phase: PodPhase::Pending,
            termination: TerminationState::Active,
            signal_deliveries: 0,
            containers: tracker.snapshot().containers,
            diagnostic: None,
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let worker = PodWorker {
            pod_id,
            uid,
            spec,
            tracker,
            evaluator: CompletionEvaluator::new(),
            termination: TerminationManager::new(),
            runtime,
            config,
            commands: commands.clone(),
            status_tx,
            events,
            token: token.clone(),
            deadline_timer: None,
            signalling: None,
            diagnostic: None,
        };

        let task = tokio::spawn(worker.run(rx));

        PodHandle {
            commands,
            status: status_rx,
            token,
            task,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PodCommand>) {
        debug!("Worker for pod {} started", self.pod_id);
        let token = self.token.clone();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        self.cancel_timers();
        debug!("Worker for pod {} stopped", self.pod_id);
    }

    fn handle(&mut self, command: PodCommand) {
        match command {
            PodCommand::Transition { event, reply } => {
                let result = self.apply_transition(&event);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            PodCommand::Terminate { request, reply } => {
                let decision = self.terminate(request);
                let _ = reply.send(decision);
            }
            PodCommand::DeadlineElapsed { token } => self.deadline_elapsed(token),
            PodCommand::ForceKilled { container_name } => self.force_killed(&container_name),
            PodCommand::ForceKillFailed {
                container_name,
                message,
            } => self.force_kill_failed(&container_name, &message),
        }
    }

    fn apply_transition(&mut self, event: &ContainerTransitionEvent) -> Result<PodStatus> {
        match self.tracker.record_transition(
            &event.container_name,
            event.phase,
            event.exit_code,
            event.sequence,
        ) {
            RecordOutcome::UnknownContainer => {
                warn!(
                    "Dropping transition for unknown container '{}' in pod {}",
                    event.container_name, self.pod_id
                );
                return Err(RuntimeError::unknown_container(
                    &self.pod_id,
                    &event.container_name,
                ));
            }
            RecordOutcome::Stale => {
                debug!(
                    "Dropping stale transition #{} for container '{}' in pod {}",
                    event.sequence, event.container_name, self.pod_id
                );
                return Ok(self.status_tx.borrow().clone());
            }
            RecordOutcome::Applied => {}
        }

        debug!(
            "Container '{}' in pod {} is now {} (exit code {:?})",
            event.container_name, self.pod_id, event.phase, event.exit_code
        );

        self.evaluate_outcome();

        if self.termination.is_terminating() && self.tracker.all_exited() {
            self.stop_gracefully();
        }

        Ok(self.refresh())
    }

    /// Re-run completion against the tracked containers and publish a change
    fn evaluate_outcome(&mut self) {
        let mut snapshot = self.tracker.snapshot();
        if !matches!(self.termination.state(), TerminationState::Active) {
            // Deleted pods are not restarted
            snapshot = snapshot.without_restarts();
        }

        if let Some(outcome) = self.evaluator.observe(&snapshot) {
            info!("Pod {} outcome is now {}", self.pod_id, outcome);
            self.publish(PodEvent::OutcomeChanged {
                pod_id: self.pod_id.clone(),
                outcome,
            });
            if outcome.is_terminal() {
                self.stop_remaining_containers();
            }
        }
    }

    fn terminate(&mut self, request: TerminationRequest) -> TerminationDecision {
        if matches!(self.termination.state(), TerminationState::Active) && self.tracker.all_exited()
        {
            info!(
                "Pod {} has no running containers; stopping without signals",
                self.pod_id
            );
            self.termination.stop_exited(Instant::now());
            // Exits that were waiting on a restart are final now
            self.evaluate_outcome();
            self.publish(PodEvent::Stopped {
                pod_id: self.pod_id.clone(),
                reason: StopReason::Graceful,
            });
            self.refresh();
            return TerminationDecision::AlreadyStopped;
        }

        let decision = self.termination.request(request);
        match decision {
            TerminationDecision::Started { deadline, token } => {
                info!(
                    "Terminating pod {} with grace period {:?}",
                    self.pod_id, request.grace_period
                );
                self.arm_deadline(deadline, token);
                self.signal_active_containers(deadline);
            }
            TerminationDecision::Shortened {
                deadline,
                previous,
                token,
            } => {
                let now = Instant::now();
                info!(
                    "Shortened grace period of pod {}: deadline in {:?} (was {:?})",
                    self.pod_id,
                    deadline.saturating_duration_since(now),
                    previous.saturating_duration_since(now)
                );
                self.arm_deadline(deadline, token);
                self.signal_active_containers(deadline);
            }
            TerminationDecision::Unchanged { deadline } => {
                debug!(
                    "Ignoring termination request for pod {}: grace period {:?} would not shorten the deadline in {:?}",
                    self.pod_id,
                    request.grace_period,
                    deadline.saturating_duration_since(Instant::now())
                );
            }
            TerminationDecision::AlreadyStopped => {
                debug!(
                    "Ignoring termination request for pod {}: already stopped",
                    self.pod_id
                );
            }
        }

        self.refresh();
        decision
    }

    /// After a keystone pod finishes, terminate whatever is still running
    fn stop_remaining_containers(&mut self) {
        if !self.config.stop_sidecars_on_completion || self.spec.keystone().is_none() {
            return;
        }
        if !matches!(self.termination.state(), TerminationState::Active)
            || self.tracker.all_exited()
        {
            return;
        }

        info!(
            "Keystone of pod {} finished; stopping remaining containers",
            self.pod_id
        );
        let request =
            TerminationRequest::new(self.spec.termination_grace_period(), Instant::now());
        self.terminate(request);
    }

    fn arm_deadline(&mut self, deadline: Instant, token: DeadlineToken) {
        if let Some(previous) = self.deadline_timer.take() {
            previous.cancel();
        }

        let timer = self.token.child_token();
        self.deadline_timer = Some(timer.clone());
        let commands = self.commands.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = commands.send(PodCommand::DeadlineElapsed { token });
                }
            }
        });
    }

    fn signal_active_containers(&mut self, deadline: Instant) {
        if let Some(previous) = self.signalling.take() {
            previous.cancel();
        }

        let cancel = self.token.child_token();
        self.signalling = Some(cancel.clone());

        for container_name in self.tracker.active_containers() {
            tokio::spawn(deliver_signal_with_retry(
                self.runtime.clone(),
                self.pod_id.clone(),
                container_name,
                self.spec.stop_signal,
                deadline,
                self.config.signal_backoff,
                cancel.clone(),
            ));
        }
    }

    fn deadline_elapsed(&mut self, token: DeadlineToken) {
        match self.termination.deadline_elapsed(token, Instant::now()) {
            DeadlineFire::Stale => {
                debug!("Discarding stale deadline timer for pod {}", self.pod_id);
            }
            DeadlineFire::ForceKill => {
                self.deadline_timer = None;
                if let Some(signalling) = self.signalling.take() {
                    signalling.cancel();
                }

                let remaining = self.tracker.active_containers();
                warn!(
                    "Grace period of pod {} elapsed; force-killing {} container(s)",
                    self.pod_id,
                    remaining.len()
                );

                for container_name in remaining {
                    tokio::spawn(force_kill_with_retry(
                        self.runtime.clone(),
                        self.pod_id.clone(),
                        container_name,
                        self.config.force_kill_attempts,
                        self.config.force_kill_backoff,
                        self.commands.clone(),
                        self.token.clone(),
                    ));
                }

                self.publish(PodEvent::Stopped {
                    pod_id: self.pod_id.clone(),
                    reason: StopReason::Forced,
                });
                self.refresh();
            }
        }
    }

    fn force_killed(&mut self, container_name: &str) {
        if !self.tracker.mark_killed(container_name) {
            return;
        }
        debug!(
            "Recording force-killed container '{}' in pod {} as exited",
            container_name, self.pod_id
        );
        self.evaluate_outcome();
        self.refresh();
    }

    fn force_kill_failed(&mut self, container_name: &str, message: &str) {
        let diagnostic = format!(
            "Failed to force-kill container '{}': {}",
            container_name, message
        );
        error!("Pod {}: {}", self.pod_id, diagnostic);
        self.diagnostic = Some(diagnostic);

        if self.evaluator.mark_unknown() {
            self.publish(PodEvent::OutcomeChanged {
                pod_id: self.pod_id.clone(),
                outcome: PodOutcome::Unknown,
            });
        }
        self.refresh();
    }

    fn stop_gracefully(&mut self) {
        if self.termination.all_exited(Instant::now()) {
            self.cancel_timers();
            info!("Pod {} stopped gracefully", self.pod_id);
            self.publish(PodEvent::Stopped {
                pod_id: self.pod_id.clone(),
                reason: StopReason::Graceful,
            });
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.deadline_timer.take() {
            timer.cancel();
        }
        if let Some(signalling) = self.signalling.take() {
            signalling.cancel();
        }
    }

    fn publish(&self, event: PodEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Publish the current status to watchers and return it
    fn refresh(&self) -> PodStatus {
        let termination = self.termination.state();
        let outcome = self.evaluator.outcome();
        let status = PodStatus {
            pod_id: self.pod_id.clone(),
            uid: self.uid,
            outcome,
            phase: PodPhase::derive(
                outcome,
                !matches!(termination, TerminationState::Active),
            ),
            termination,
            signal_deliveries: self.termination.signal_deliveries(),
            containers: self.tracker.snapshot().containers,
            diagnostic: self.diagnostic.clone(),
        };
        self.status_tx.send_replace(status.clone());
        status
    }
}

/// Deliver a termination signal, retrying with backoff while the next attempt
/// still fits before the deadline
async fn deliver_signal_with_retry(
    runtime: Arc<dyn ContainerRuntime>,
    pod_id: PodId,
    container_name: String,
    signal: SignalKind,
    deadline: Instant,
    backoff: Backoff,
    cancel: CancellationToken,
) {
    let mut delay = backoff.initial;
    let mut attempt: u32 = 1;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = runtime.deliver_signal(&pod_id, &container_name, signal) => result,
        };

        match result {
            Ok(()) => {
                debug!(
                    "Delivered {} to container '{}' in pod {} (attempt {})",
                    signal, container_name, pod_id, attempt
                );
                return;
            }
            Err(e) => {
                if deadline.saturating_duration_since(Instant::now()) <= delay {
                    warn!(
                        "Giving up delivering {} to container '{}' in pod {} after {} attempt(s): {}. It will be force-killed at the deadline",
                        signal, container_name, pod_id, attempt, e
                    );
                    return;
                }

                warn!(
                    "Delivering {} to container '{}' in pod {} failed (attempt {}), retrying in {:?}: {}",
                    signal, container_name, pod_id, attempt, delay, e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = backoff.next(delay);
                attempt += 1;
            }
        }
    }
}

/// Force-kill a container; reports back to the worker if every attempt fails
async fn force_kill_with_retry(
    runtime: Arc<dyn ContainerRuntime>,
    pod_id: PodId,
    container_name: String,
    attempts: u32,
    backoff: Backoff,
    commands: mpsc::UnboundedSender<PodCommand>,
    cancel: CancellationToken,
) {
    let attempts = attempts.max(1);
    let mut delay = backoff.initial;

    for attempt in 1..=attempts {
        match runtime.force_kill(&pod_id, &container_name).await {
            Ok(()) => {
                info!(
                    "Force-killed container '{}' in pod {}",
                    container_name, pod_id
                );
                let _ = commands.send(PodCommand::ForceKilled { container_name });
                return;
            }
            Err(e) if attempt == attempts => {
                let _ = commands.send(PodCommand::ForceKillFailed {
                    container_name,
                    message: e.to_string(),
                });
                return;
            }
            Err(e) => {
                warn!(
                    "Force-kill of container '{}' in pod {} failed (attempt {}/{}): {}",
                    container_name, pod_id, attempt, attempts, e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = backoff.next(delay);
            }
        }
    }
}
