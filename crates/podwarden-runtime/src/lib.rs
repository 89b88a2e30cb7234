//! Podwarden Runtime - Pod completion and graceful termination
//!
//! This crate provides:
//! - Per-container status tracking with sequence-ordered transitions
//! - Keystone-aware completion evaluation
//! - Grace-period deadlines that can only be shortened
//! - A pod controller running one worker task per pod
//! - A job controller projecting pod outcomes onto job conditions
//! - A scriptable mock container runtime

// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod completion;
pub mod controller;
pub mod error;
pub mod job;
pub mod job_controller;
pub mod mock;
pub mod status;
pub mod termination;
pub mod traits;
pub mod types;
mod worker;

// Re-export primary types
pub use completion::{evaluate, CompletionEvaluator};
pub use error::{Result, RuntimeError};
pub use mock::{ContainerScript, MockRuntime, SignalResponse};
pub use status::{
    ContainerState, ContainerStatusTracker, PodSnapshot, RecordOutcome, KILLED_EXIT_CODE,
};
pub use termination::{
    DeadlineFire, DeadlineToken, StopReason, TerminationDecision, TerminationManager,
    TerminationRequest, TerminationState, FAR_FUTURE,
};
pub use traits::ContainerRuntime;
pub use types::{Backoff, PodEvent, PodStatus};

// Re-export controller types
pub use controller::{PodController, PodControllerConfig};
pub use job::{JobCompletionProjector, JobUpdate};
pub use job_controller::JobController;
