//! Ordered step workflows (deployment, connection, execution).
//!
//! A workflow is a fixed list of named steps. Steps run strictly in order: a step only
//! becomes `Running` after its predecessor reached `Success`, and the first `Error` halts
//! the run, leaving every later step `Idle`. Failures never panic or bubble up as `Err`;
//! they are written into the step list so the UI can render where the run stopped.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::provider::{ProviderError, ReceiptError};

/// Status of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
pub enum StepStatus {
    /// Not started.
    #[default]
    Idle,
    /// In progress.
    Running,
    /// Completed.
    Success,
    /// Failed; the workflow stopped here.
    Error,
}

/// A named step and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct WorkflowStep {
    /// Step name, e.g. `sent`.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// Error message when `status` is `Error`.
    pub error: Option<String>,
    /// Transaction hash the step produced, if any.
    pub tx_hash: Option<String>,
}

/// How a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum StepErrorKind {
    /// The step's action failed.
    Failed,
    /// The step exceeded its time bound.
    Timeout,
}

/// Failure returned by a [`StepRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// The action failed with `message`.
    Failed {
        /// What went wrong.
        message: String,
    },
    /// The action did not finish within `millis` milliseconds.
    Timeout {
        /// The elapsed bound.
        millis: u64,
    },
}

impl StepFailure {
    /// Shorthand for [`StepFailure::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    const fn kind(&self) -> StepErrorKind {
        match self {
            Self::Failed { .. } => StepErrorKind::Failed,
            Self::Timeout { .. } => StepErrorKind::Timeout,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Failed { message } => message.clone(),
            Self::Timeout { millis } => format!("timed out after {millis} ms"),
        }
    }
}

impl From<ProviderError> for StepFailure {
    fn from(error: ProviderError) -> Self {
        Self::failed(error.to_string())
    }
}

impl From<ReceiptError> for StepFailure {
    fn from(error: ReceiptError) -> Self {
        match error {
            ReceiptError::Timeout { millis } => Self::Timeout { millis },
            other => Self::failed(other.to_string()),
        }
    }
}

/// Errors about workflows themselves, or a failed run turned into an error.
#[crate::safekit_error]
pub enum WorkflowError {
    /// A step failed.
    #[error("step {step} failed: {message}")]
    StepFailed {
        /// The failed step.
        step: String,
        /// Why it failed.
        message: String,
    },
    /// A step exceeded its time bound.
    #[error("step {step} timed out after {millis} ms")]
    Timeout {
        /// The step that timed out.
        step: String,
        /// The elapsed bound, in milliseconds.
        millis: u64,
    },
    /// Another run for the same account is still in flight.
    #[error("a workflow is already running for {key}")]
    AlreadyRunning {
        /// The account the run was requested for.
        key: String,
    },
    /// The requested step cannot start in the current state.
    #[error("step {step} cannot start: {reason}")]
    OutOfOrder {
        /// The step.
        step: String,
        /// Why it cannot start.
        reason: String,
    },
}

/// Outcome of a run, returned to the host.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct WorkflowReport {
    /// Workflow name, e.g. `execution`.
    pub workflow: String,
    /// Whether every step reached `Success`.
    pub succeeded: bool,
    /// Name of the step that failed.
    pub failed_step: Option<String>,
    /// Error message of the failed step.
    pub error: Option<String>,
    /// How the failed step failed.
    pub error_kind: Option<StepErrorKind>,
    /// The bound that elapsed, in milliseconds, when `error_kind` is `Timeout`.
    pub timeout_millis: Option<u64>,
    /// Last transaction hash produced by any step.
    pub tx_hash: Option<String>,
    /// Every step in order.
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowReport {
    /// The failure as a [`WorkflowError`], `None` when the run succeeded or has not failed yet.
    #[must_use]
    pub fn error(&self) -> Option<WorkflowError> {
        let step = self.failed_step.clone()?;
        Some(match self.timeout_millis {
            Some(millis) => WorkflowError::Timeout { step, millis },
            None => WorkflowError::StepFailed {
                step,
                message: self.error.clone().unwrap_or_default(),
            },
        })
    }
}

/// The actions behind the steps of one workflow run.
#[async_trait]
pub trait StepRunner: Send {
    /// Performs `step`. `Ok(Some(hash))` attaches a transaction hash to the step.
    async fn run_step(&mut self, step: &str) -> Result<Option<String>, StepFailure>;
}

/// Step list of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    name: String,
    steps: Vec<WorkflowStep>,
    millis_by_step: Vec<Option<u64>>,
}

impl Workflow {
    /// A workflow with every step `Idle`.
    #[must_use]
    pub fn new(name: &str, steps: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            steps: steps
                .iter()
                .map(|step| WorkflowStep {
                    name: (*step).to_string(),
                    status: StepStatus::Idle,
                    error: None,
                    tx_hash: None,
                })
                .collect(),
            millis_by_step: vec![None; steps.len()],
        }
    }

    /// Workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in order.
    #[must_use]
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Moves step `index` to `Running`.
    ///
    /// # Errors
    /// - `WorkflowError::OutOfOrder` if the step is not `Idle` or its predecessor is not `Success`.
    pub fn start_step(&mut self, index: usize) -> Result<(), WorkflowError> {
        let Some(step) = self.steps.get(index) else {
            return Err(WorkflowError::OutOfOrder {
                step: index.to_string(),
                reason: "no such step".to_string(),
            });
        };
        if step.status != StepStatus::Idle {
            return Err(WorkflowError::OutOfOrder {
                step: step.name.clone(),
                reason: format!("step is {:?}", step.status),
            });
        }
        if let Some(previous) = index.checked_sub(1).and_then(|i| self.steps.get(i)) {
            if previous.status != StepStatus::Success {
                return Err(WorkflowError::OutOfOrder {
                    step: step.name.clone(),
                    reason: format!("previous step {} is {:?}", previous.name, previous.status),
                });
            }
        }

        self.steps[index].status = StepStatus::Running;
        Ok(())
    }

    fn complete_step(&mut self, index: usize, tx_hash: Option<String>) {
        let step = &mut self.steps[index];
        step.status = StepStatus::Success;
        step.tx_hash = tx_hash;
    }

    fn fail_step(&mut self, index: usize, failure: &StepFailure) {
        if let StepFailure::Timeout { millis } = failure {
            self.millis_by_step[index] = Some(*millis);
        }
        let step = &mut self.steps[index];
        step.status = StepStatus::Error;
        step.error = Some(failure.message());
    }

    /// Whether every step reached `Success`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|step| step.status == StepStatus::Success)
    }

    /// The step that failed, if any.
    #[must_use]
    pub fn failed_step(&self) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.status == StepStatus::Error)
    }

    /// Runs every remaining step in order, stopping at the first failure.
    pub async fn run(&mut self, runner: &mut dyn StepRunner) -> WorkflowReport {
        let run_start_time = Utc::now();
        crate::info!(
            "workflow.started name={} steps={} timestamp={}",
            self.name,
            self.steps.len(),
            run_start_time.to_rfc3339()
        );

        for index in 0..self.steps.len() {
            if self.steps[index].status == StepStatus::Success {
                continue;
            }
            if let Err(err) = self.start_step(index) {
                crate::warn!("workflow.halted name={} reason={err}", self.name);
                break;
            }

            let step_name = self.steps[index].name.clone();
            crate::debug!("workflow.step_started name={} step={step_name}", self.name);

            match runner.run_step(&step_name).await {
                Ok(tx_hash) => {
                    crate::info!(
                        "workflow.step_succeeded name={} step={step_name} tx_hash={}",
                        self.name,
                        tx_hash.as_deref().unwrap_or("-")
                    );
                    self.complete_step(index, tx_hash);
                }
                Err(failure) => {
                    crate::error!(
                        "workflow.step_failed name={} step={step_name} kind={:?} error={}",
                        self.name,
                        failure.kind(),
                        failure.message()
                    );
                    self.fail_step(index, &failure);
                    break;
                }
            }
        }

        let report = self.report();
        crate::info!(
            "workflow.completed name={} succeeded={} failed_step={} duration_ms={} timestamp={}",
            self.name,
            report.succeeded,
            report.failed_step.as_deref().unwrap_or("-"),
            (Utc::now() - run_start_time).num_milliseconds(),
            Utc::now().to_rfc3339()
        );
        report
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn report(&self) -> WorkflowReport {
        let failed = self
            .steps
            .iter()
            .position(|step| step.status == StepStatus::Error);

        WorkflowReport {
            workflow: self.name.clone(),
            succeeded: self.is_complete(),
            failed_step: failed.map(|index| self.steps[index].name.clone()),
            error: failed.and_then(|index| self.steps[index].error.clone()),
            error_kind: failed.map(|index| {
                if self.millis_by_step[index].is_some() {
                    StepErrorKind::Timeout
                } else {
                    StepErrorKind::Failed
                }
            }),
            timeout_millis: failed.and_then(|index| self.millis_by_step[index]),
            tx_hash: self
                .steps
                .iter()
                .rev()
                .find_map(|step| step.tx_hash.clone()),
            steps: self.steps.clone(),
        }
    }
}
