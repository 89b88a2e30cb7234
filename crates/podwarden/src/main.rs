mod scenario;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use podwarden_core::k8s_openapi::api::batch::v1::JobCondition as K8sJobCondition;
use podwarden_core::{to_json_pretty, JobId, PodId, PodOutcome, PodPhase};
use podwarden_runtime::{
    JobController, MockRuntime, PodController, PodControllerConfig, PodEvent, PodStatus,
    StopReason,
};
use scenario::{read_manifest, read_scenario, Manifest, Scenario, Workload};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "podwarden",
    about = "Podwarden keystone completion and graceful termination controller"
)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "PODWARDEN_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario against the simulated container runtime
    Run {
        /// Path to the scenario YAML
        #[arg(long, env = "PODWARDEN_MANIFEST")]
        manifest: PathBuf,
        /// Leave sidecars running after a keystone pod finishes
        #[arg(long)]
        keep_sidecars: bool,
        /// Force-kill attempts before a pod is reported Unknown
        #[arg(long, default_value_t = 3)]
        force_kill_attempts: u32,
    },
    /// Validate a scenario or a Kubernetes Pod/Job manifest
    Validate {
        /// Path to the manifest YAML
        #[arg(long)]
        manifest: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            manifest,
            keep_sidecars,
            force_kill_attempts,
        } => {
            let config = PodControllerConfig {
                stop_sidecars_on_completion: !keep_sidecars,
                force_kill_attempts,
                ..PodControllerConfig::default()
            };
            let report = run_scenario(&manifest, config).await?;
            println!("{}", to_json_pretty(&report)?);
            Ok(())
        }
        Commands::Validate { manifest } => run_validate(&manifest),
    }
}

/// Check a manifest and report what it describes
fn run_validate(path: &Path) -> miette::Result<()> {
    match read_manifest(path)? {
        Manifest::Scenario(scenario) => info!(
            "Scenario '{}' is valid ({} scripted container(s), {} deletion(s))",
            scenario.name,
            scenario.simulate.len(),
            scenario.deletions.len()
        ),
        Manifest::Pod(id, spec) => info!(
            "Pod {} is valid: {} container(s), keystone: {}",
            id,
            spec.containers.len(),
            spec.keystone().map(|c| c.name.as_str()).unwrap_or("none")
        ),
        Manifest::Job(id, spec) => info!(
            "Job {} is valid: {} completion(s), backoff limit {}",
            id, spec.completions, spec.backoff_limit
        ),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerSummary {
    name: String,
    role: String,
    phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    restart_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PodSummary {
    pod: PodId,
    outcome: PodOutcome,
    phase: PodPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: Option<String>,
    signal_deliveries: u32,
    containers: Vec<ContainerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<String>,
}

impl From<&PodStatus> for PodSummary {
    fn from(status: &PodStatus) -> Self {
        Self {
            pod: status.pod_id.clone(),
            outcome: status.outcome,
            phase: status.phase,
            stop_reason: status.stop_reason().map(|r| format!("{:?}", r)),
            signal_deliveries: status.signal_deliveries,
            containers: status
                .containers
                .iter()
                .map(|c| ContainerSummary {
                    name: c.name.clone(),
                    role: c.role.to_string(),
                    phase: c.phase.to_string(),
                    exit_code: c.exit_code,
                    restart_count: c.restart_count,
                })
                .collect(),
            diagnostic: status.diagnostic.clone(),
        }
    }
}

/// What a scenario run ended with
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ScenarioReport {
    Pod(PodSummary),
    Job {
        job: JobId,
        condition: K8sJobCondition,
        pods: Vec<PodSummary>,
    },
}

/// Run a scenario to completion against the mock runtime
async fn run_scenario(path: &Path, config: PodControllerConfig) -> miette::Result<ScenarioReport> {
    let scenario = read_scenario(path)?;
    let workload = scenario.workload()?;
    info!("Running scenario '{}'", scenario.name);

    let (tx, rx) = mpsc::unbounded_channel();
    let mock = MockRuntime::with_events(tx);
    for (container, script) in &scenario.simulate {
        mock.script(container.clone(), script.clone());
    }

    let pods = Arc::new(PodController::new(Arc::new(mock), config));
    let jobs = Arc::new(JobController::new(pods.clone()));
    let token = CancellationToken::new();

    let controller = pods.clone();
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(rx, controller_token).await {
            error!("Pod controller error: {}", e);
        }
    });

    let job_controller = jobs.clone();
    let jobs_token = token.clone();
    let jobs_handle = tokio::spawn(async move {
        if let Err(e) = job_controller.run(jobs_token).await {
            error!("Job controller error: {}", e);
        }
    });

    let events_handle = tokio::spawn(log_pod_events(pods.subscribe(), token.clone()));

    let timeout = Duration::from_secs(scenario.timeout_seconds);
    let result: miette::Result<ScenarioReport> = async {
        match workload {
            Workload::Pod(spec) => {
                let pod_id = PodId::new(scenario.name.as_str());
                pods.admit_pod(pod_id.clone(), spec).await?;
                tokio::spawn(log_phase_changes(pods.clone(), pod_id.clone()));
                schedule_deletions(&pods, &scenario);

                let status = if scenario.deletions.is_empty() {
                    pods.wait_for_outcome(&pod_id, timeout).await?;
                    pods.pod_status(&pod_id).await?
                } else {
                    pods.wait_for_stopped(&pod_id, timeout).await?
                };
                Ok(ScenarioReport::Pod(PodSummary::from(&status)))
            }
            Workload::Job(spec) => {
                let job_id = JobId::new(scenario.name.as_str());
                jobs.create_job(job_id.clone(), spec).await?;
                schedule_deletions(&pods, &scenario);

                let condition = jobs.wait_for_condition(&job_id, timeout).await?;
                let mut summaries = Vec::new();
                for pod_id in pods.pod_ids().await {
                    summaries.push(PodSummary::from(&pods.pod_status(&pod_id).await?));
                }
                Ok(ScenarioReport::Job {
                    job: job_id,
                    condition: condition.to_k8s(),
                    pods: summaries,
                })
            }
        }
    }
    .await;

    token.cancel();
    pods.shutdown();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(controller_handle, jobs_handle, events_handle);
    })
    .await;

    result
}

/// Issue the scenario's delete requests at their scheduled times
fn schedule_deletions(pods: &Arc<PodController>, scenario: &Scenario) {
    for deletion in &scenario.deletions {
        let pods = pods.clone();
        let target = deletion
            .pod
            .as_deref()
            .map(PodId::new)
            .unwrap_or_else(|| scenario.default_target());
        let after = Duration::from_millis(deletion.after_ms);
        let grace = Duration::from_secs(deletion.grace_period_seconds);

        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            match pods.request_termination(&target, grace).await {
                Ok(decision) => info!(
                    "Delete of pod {} with grace period {:?}: {:?}",
                    target, grace, decision
                ),
                Err(e) => warn!("Delete of pod {} failed: {}", target, e),
            }
        });
    }
}

async fn log_pod_events(mut events: broadcast::Receiver<PodEvent>, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Ok(PodEvent::OutcomeChanged { pod_id, outcome }) => {
                    info!("Pod {} outcome: {}", pod_id, outcome);
                }
                Ok(PodEvent::Stopped { pod_id, reason }) => match reason {
                    StopReason::Graceful => info!("Pod {} stopped gracefully", pod_id),
                    StopReason::Forced => warn!("Pod {} was force-killed", pod_id),
                },
                Ok(PodEvent::Removed { pod_id }) => info!("Pod {} removed", pod_id),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} pod event(s)", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn log_phase_changes(pods: Arc<PodController>, pod_id: PodId) {
    let mut stream = match pods.status_stream(&pod_id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot watch pod {}: {}", pod_id, e);
            return;
        }
    };
    drop(pods);

    let mut last = None;
    while let Some(status) = stream.next().await {
        if last != Some(status.phase) {
            info!("Pod {} phase: {}", pod_id, status.phase);
            last = Some(status.phase);
        }
    }
}
