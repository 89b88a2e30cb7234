use crate::error::{Result, RuntimeError};
use crate::traits::ContainerRuntime;
use async_trait::async_trait;
use parking_lot::Mutex;
use podwarden_core::{ContainerTransitionEvent, PodId, PodSpec, SignalKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub use crate::status::KILLED_EXIT_CODE;

/// How a simulated container reacts to a termination signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalResponse {
    /// Keep running until force-killed
    Ignore,
    /// Exit with `code` after `after_ms`
    #[serde(rename_all = "camelCase")]
    Exit {
        code: i32,
        #[serde(default)]
        after_ms: u64,
    },
}

impl Default for SignalResponse {
    fn default() -> Self {
        // 128 + SIGTERM
        SignalResponse::Exit {
            code: 143,
            after_ms: 0,
        }
    }
}

/// Scripted behaviour of one simulated container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerScript {
    /// Exit on its own this long after starting; `None` runs forever
    #[serde(default)]
    pub exit_after_ms: Option<u64>,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub on_signal: SignalResponse,
}

impl ContainerScript {
    /// Runs until signalled, then exits promptly
    pub fn long_running() -> Self {
        Self::default()
    }

    /// Runs until force-killed
    pub fn ignores_signals() -> Self {
        Self {
            on_signal: SignalResponse::Ignore,
            ..Self::default()
        }
    }

    /// Exits with `code` after `after`
    pub fn exits_after(after: Duration, code: i32) -> Self {
        Self {
            exit_after_ms: Some(after.as_millis() as u64),
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn with_signal_response(mut self, response: SignalResponse) -> Self {
        self.on_signal = response;
        self
    }
}

type ContainerKey = (PodId, String);

#[derive(Debug, Default)]
struct MockState {
    /// Scripts by container name; shared by every pod with that container
    scripts: HashMap<String, ContainerScript>,
    running: HashSet<ContainerKey>,
    signals: HashMap<ContainerKey, u32>,
    force_kills: HashMap<ContainerKey, u32>,
    failing_signals: u32,
    fail_force_kill: bool,
}

/// Mock runtime for tests and simulations
///
/// Simulates containers from per-container scripts and reports their state
/// changes as `ContainerTransitionEvent`s on the channel passed to
/// `with_events`. Without a channel it only records what it was asked to do.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    events: Option<mpsc::UnboundedSender<ContainerTransitionEvent>>,
    sequence: Arc<AtomicU64>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report container transitions on `events`
    pub fn with_events(events: mpsc::UnboundedSender<ContainerTransitionEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    /// Script every container named `container_name`
    pub fn script(&self, container_name: impl Into<String>, script: ContainerScript) {
        self.state.lock().scripts.insert(container_name.into(), script);
    }

    /// Fail the next `count` signal deliveries
    pub fn fail_next_signals(&self, count: u32) {
        self.state.lock().failing_signals = count;
    }

    /// Make every force kill fail
    pub fn set_force_kill_failure(&self, fail: bool) {
        self.state.lock().fail_force_kill = fail;
    }

    pub fn signals_received(&self, pod_id: &PodId, container_name: &str) -> u32 {
        let key = (pod_id.clone(), container_name.to_string());
        self.state.lock().signals.get(&key).copied().unwrap_or(0)
    }

    pub fn force_kills(&self, pod_id: &PodId, container_name: &str) -> u32 {
        let key = (pod_id.clone(), container_name.to_string());
        self.state.lock().force_kills.get(&key).copied().unwrap_or(0)
    }

    pub fn is_running(&self, pod_id: &PodId, container_name: &str) -> bool {
        let key = (pod_id.clone(), container_name.to_string());
        self.state.lock().running.contains(&key)
    }

    /// Exit a running container now. Returns false if it was not running.
    pub fn exit_container(&self, pod_id: &PodId, container_name: &str, exit_code: i32) -> bool {
        let key = (pod_id.clone(), container_name.to_string());
        if !self.state.lock().running.remove(&key) {
            return false;
        }
        debug!(
            "Mock: container '{}' in pod {} exited with {}",
            container_name, pod_id, exit_code
        );
        self.emit(ContainerTransitionEvent::exited(
            pod_id.clone(),
            container_name,
            exit_code,
            self.next_sequence(),
        ));
        true
    }

    fn exit_later(&self, pod_id: &PodId, container_name: &str, exit_code: i32, after: Duration) {
        if after.is_zero() {
            self.exit_container(pod_id, container_name, exit_code);
            return;
        }
        let this = self.clone();
        let pod_id = pod_id.clone();
        let container_name = container_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            this.exit_container(&pod_id, &container_name, exit_code);
        });
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: ContainerTransitionEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("Mock: event receiver dropped");
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn start_pod(&self, pod_id: &PodId, spec: &PodSpec) -> Result<()> {
        for container in &spec.containers {
            let script = {
                let mut state = self.state.lock();
                state
                    .running
                    .insert((pod_id.clone(), container.name.clone()));
                state
                    .scripts
                    .get(&container.name)
                    .cloned()
                    .unwrap_or_default()
            };

            debug!("Mock: container '{}' in pod {} started", container.name, pod_id);
            self.emit(ContainerTransitionEvent::running(
                pod_id.clone(),
                container.name.as_str(),
                self.next_sequence(),
            ));

            if let Some(ms) = script.exit_after_ms {
                self.exit_later(
                    pod_id,
                    &container.name,
                    script.exit_code,
                    Duration::from_millis(ms),
                );
            }
        }
        Ok(())
    }

    async fn deliver_signal(
        &self,
        pod_id: &PodId,
        container_name: &str,
        signal: SignalKind,
    ) -> Result<()> {
        let response = {
            let mut state = self.state.lock();
            if state.failing_signals > 0 {
                state.failing_signals -= 1;
                return Err(RuntimeError::signal_delivery_failed(
                    pod_id,
                    container_name,
                    signal,
                    "injected failure",
                ));
            }
            let key = (pod_id.clone(), container_name.to_string());
            *state.signals.entry(key).or_insert(0) += 1;
            state
                .scripts
                .get(container_name)
                .map(|s| s.on_signal)
                .unwrap_or_default()
        };

        debug!(
            "Mock: delivered {} to container '{}' in pod {}",
            signal, container_name, pod_id
        );
        if let SignalResponse::Exit { code, after_ms } = response {
            self.exit_later(pod_id, container_name, code, Duration::from_millis(after_ms));
        }
        Ok(())
    }

    async fn force_kill(&self, pod_id: &PodId, container_name: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.fail_force_kill {
                return Err(RuntimeError::force_kill_failed(
                    pod_id,
                    container_name,
                    "injected failure",
                ));
            }
            let key = (pod_id.clone(), container_name.to_string());
            *state.force_kills.entry(key).or_insert(0) += 1;
        }

        debug!("Mock: force-killed container '{}' in pod {}", container_name, pod_id);
        self.exit_container(pod_id, container_name, KILLED_EXIT_CODE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwarden_core::{ContainerPhase, ContainerSpec};

    fn pod() -> (PodId, PodSpec) {
        (
            PodId::new("p1"),
            PodSpec::new(vec![
                ContainerSpec::keystone("main"),
                ContainerSpec::sidecar("sidecar"),
            ]),
        )
    }

    #[tokio::test]
    async fn test_start_pod_reports_running_containers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mock = MockRuntime::with_events(tx);
        let (pod_id, spec) = pod();

        mock.start_pod(&pod_id, &spec).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.container_name, "main");
        assert_eq!(second.container_name, "sidecar");
        assert_eq!(first.phase, ContainerPhase::Running);
        assert!(second.sequence > first.sequence);
        assert!(mock.is_running(&pod_id, "sidecar"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mock = MockRuntime::with_events(tx);
        mock.script("main", ContainerScript::exits_after(Duration::from_secs(1), 0));
        let (pod_id, spec) = pod();

        mock.start_pod(&pod_id, &spec).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let exited = rx.recv().await.unwrap();
        assert_eq!(exited.container_name, "main");
        assert_eq!(exited.exit_code, Some(0));
        assert!(!mock.is_running(&pod_id, "main"));
    }

    #[tokio::test]
    async fn test_signal_exit_and_ignore() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mock = MockRuntime::with_events(tx);
        mock.script("main", ContainerScript::ignores_signals());
        let (pod_id, spec) = pod();
        mock.start_pod(&pod_id, &spec).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        mock.deliver_signal(&pod_id, "main", SignalKind::Term).await.unwrap();
        assert!(mock.is_running(&pod_id, "main"));

        mock.deliver_signal(&pod_id, "sidecar", SignalKind::Term).await.unwrap();
        let exited = rx.recv().await.unwrap();
        assert_eq!(exited.container_name, "sidecar");
        assert_eq!(exited.exit_code, Some(143));
        assert_eq!(mock.signals_received(&pod_id, "main"), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mock = MockRuntime::new();
        let pod_id = PodId::new("p1");
        mock.fail_next_signals(1);
        mock.set_force_kill_failure(true);

        assert!(mock.deliver_signal(&pod_id, "main", SignalKind::Term).await.is_err());
        assert!(mock.deliver_signal(&pod_id, "main", SignalKind::Term).await.is_ok());
        assert!(mock.force_kill(&pod_id, "main").await.is_err());
        assert_eq!(mock.signals_received(&pod_id, "main"), 1);
        assert_eq!(mock.force_kills(&pod_id, "main"), 0);
    }

    #[tokio::test]
    async fn test_force_kill_reports_sigkill_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mock = MockRuntime::with_events(tx);
        let (pod_id, spec) = pod();
        mock.start_pod(&pod_id, &spec).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        mock.force_kill(&pod_id, "main").await.unwrap();
        let exited = rx.recv().await.unwrap();
        assert_eq!(exited.exit_code, Some(KILLED_EXIT_CODE));
        assert_eq!(mock.force_kills(&pod_id, "main"), 1);
    }
}
