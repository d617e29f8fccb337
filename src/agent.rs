//! The control loop.
//!
//! ```text
//! Planning -> Dispatch -> Observing -> Planning | AwaitingUser | Terminated
//! ```
//!
//! One instruction at a time, strictly sequential. The loop owns the task
//! state and is the only place that decides to stop.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::brain::{Decision, Oracle};
use crate::config::LoopConfig;
use crate::error::{ErrorKind, OracleError, UserError};
use crate::executor::Executor;
use crate::types::{
    ActionRequest, ActionResult, ActionVerb, AskKind, HistoryEntry, PageSnapshot, UserPrompt,
};
use crate::user::UserChannel;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    #[default]
    Planning,
    Dispatch,
    Observing,
    AwaitingUser,
    Terminated,
}

/// Everything known about the running instruction. Created per run, never
/// shared between runs.
#[derive(Debug, Default)]
pub struct AgentState {
    pub history: Vec<HistoryEntry>,
    pub current_snapshot: Option<PageSnapshot>,
    pub iteration_count: u32,
    pub terminated: bool,
    pub phase: LoopPhase,
}

/// Progress notifications for UIs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking,
    Step { number: u32, description: String },
    StepError { message: String },
    AwaitingUser { prompt: UserPrompt },
    TaskComplete { summary: String },
    TaskError { message: String },
    Ready,
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Thinking => "thinking",
            AgentEvent::Step { .. } => "step",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::AwaitingUser { .. } => "awaiting_user",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { summary: String },
    Failed { kind: ErrorKind, detail: String },
}

/// Structured end-of-task report, also produced for fatal failures.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub instruction: String,
    pub outcome: TaskOutcome,
    pub iterations: u32,
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub terminated: bool,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed { .. })
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            TaskOutcome::Failed { kind, .. } => Some(*kind),
            TaskOutcome::Completed { .. } => None,
        }
    }
}

pub struct Agent {
    oracle: Arc<dyn Oracle>,
    executor: Arc<Mutex<Executor>>,
    user: Arc<dyn UserChannel>,
    config: LoopConfig,
    events: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        executor: Executor,
        user: Arc<dyn UserChannel>,
        config: LoopConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            oracle,
            executor: Arc::new(Mutex::new(executor)),
            user,
            config,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Publish progress on an existing channel instead of a private one.
    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Token that stops [`Agent::run`] at the next iteration boundary.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: AgentEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Run one instruction to termination.
    pub async fn run(&self, instruction: &str) -> TaskReport {
        self.run_with(instruction, &self.cancel).await
    }

    /// Like [`Agent::run`], stopped by `cancel` instead of the agent's own
    /// token. Lets a long-lived agent take a fresh token per instruction.
    pub async fn run_with(&self, instruction: &str, cancel: &CancellationToken) -> TaskReport {
        let mut state = AgentState::default();
        let mut secrets: Vec<String> = Vec::new();
        info!(%instruction, max_iterations = self.config.max_iterations, "task started");

        let outcome = match self.drive(instruction, cancel, &mut state, &mut secrets).await {
            TaskOutcome::Failed { kind, detail } => TaskOutcome::Failed {
                kind,
                detail: redact(&detail, &secrets),
            },
            completed => completed,
        };
        state.phase = LoopPhase::Terminated;
        state.terminated = true;

        match &outcome {
            TaskOutcome::Completed { summary } => {
                info!(iterations = state.iteration_count, %summary, "task complete");
                self.emit(AgentEvent::TaskComplete {
                    summary: summary.clone(),
                });
            }
            TaskOutcome::Failed { kind, detail } => {
                error!(iterations = state.iteration_count, %kind, %detail, "task failed");
                self.emit(AgentEvent::TaskError {
                    message: format!("{}: {}", kind, detail),
                });
            }
        }
        self.emit(AgentEvent::Ready);

        let final_url = self.final_url(&state).await;
        TaskReport {
            instruction: instruction.to_string(),
            outcome,
            iterations: state.iteration_count,
            history: state
                .history
                .iter()
                .map(|entry| redact_entry(entry, &secrets))
                .collect(),
            final_url,
            terminated: state.terminated,
        }
    }

    async fn drive(
        &self,
        instruction: &str,
        cancel: &CancellationToken,
        state: &mut AgentState,
        secrets: &mut Vec<String>,
    ) -> TaskOutcome {
        let mut oracle_failures = 0u32;
        let mut consecutive_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return failed(ErrorKind::UserAbort, "task cancelled");
            }
            if state.iteration_count >= self.config.max_iterations {
                return failed(
                    ErrorKind::IterationLimitExceeded,
                    format!(
                        "stopped after {} actions without finishing",
                        state.iteration_count
                    ),
                );
            }

            state.phase = LoopPhase::Planning;
            self.emit(AgentEvent::Thinking);
            let decision = tokio::select! {
                _ = cancel.cancelled() => {
                    return failed(ErrorKind::UserAbort, "task cancelled while planning");
                }
                decided = timeout(
                    self.config.oracle_timeout(),
                    self.oracle.decide(instruction, &state.history),
                ) => decided.unwrap_or(Err(OracleError::Timeout(self.config.oracle_timeout_secs))),
            };

            let request = match decision {
                Ok(Decision::Done { summary }) => return TaskOutcome::Completed { summary },
                Ok(Decision::Act(request)) => {
                    oracle_failures = 0;
                    request
                }
                Err(err) => {
                    oracle_failures += 1;
                    warn!(error = %err, attempt = oracle_failures, "oracle failed");
                    self.emit(AgentEvent::StepError {
                        message: err.to_string(),
                    });
                    if oracle_failures >= 2 {
                        return failed(ErrorKind::OracleError, err.to_string());
                    }
                    continue;
                }
            };

            state.phase = LoopPhase::Dispatch;
            let number = state.iteration_count + 1;
            let description = redact(&request.to_string(), secrets);
            info!(step = number, action = %description, "dispatching");
            self.emit(AgentEvent::Step {
                number,
                description,
            });

            let result = if request.verb == ActionVerb::AskUser {
                self.ask_user(&request, cancel, state, secrets).await
            } else {
                self.dispatch(&request, state).await
            };

            state.phase = LoopPhase::Observing;
            if let ActionResult::Failure { kind, detail } = &result {
                consecutive_failures += 1;
                warn!(step = number, %kind, detail = %redact(detail, secrets), "step failed");
                self.emit(AgentEvent::StepError {
                    message: redact(&result.observation(), secrets),
                });
            } else {
                consecutive_failures = 0;
            }
            state.history.push(HistoryEntry {
                request,
                result: result.clone(),
            });
            state.iteration_count += 1;

            if let ActionResult::Failure { kind, detail } = &result {
                if kind.is_fatal() {
                    return failed(*kind, detail.clone());
                }
                if let Some(repeated) = repeated_failure(&state.history) {
                    return failed(
                        ErrorKind::LoopDetected,
                        format!(
                            "the same failing action was requested twice in a row: {}",
                            redact(&repeated.to_string(), secrets)
                        ),
                    );
                }
                let limit = self.config.max_consecutive_failures;
                if limit > 0 && consecutive_failures >= limit {
                    return failed(
                        *kind,
                        format!("{} consecutive failures, last: {}", consecutive_failures, detail),
                    );
                }
            }
        }
    }

    /// Run a browser verb on a blocking thread, bounded by the action
    /// timeout. A timed-out action keeps running; the executor lock makes the
    /// next action wait for it.
    async fn dispatch(&self, request: &ActionRequest, state: &mut AgentState) -> ActionResult {
        let executor = self.executor.clone();
        let snapshot = state.current_snapshot.take();
        let owned = request.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut executor = executor.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            executor.execute(&owned, snapshot)
        });

        match timeout(self.config.action_timeout(), task).await {
            Ok(Ok((result, snapshot))) => {
                state.current_snapshot = snapshot;
                result
            }
            Ok(Err(join)) => {
                error!(error = %join, "action task failed");
                ActionResult::failure(ErrorKind::DriverError, format!("action aborted: {}", join))
            }
            Err(_) => {
                warn!(verb = %request.verb, "action timed out");
                ActionResult::failure(
                    ErrorKind::ActionTimeout,
                    format!(
                        "{} did not finish within {} seconds",
                        request.verb, self.config.action_timeout_secs
                    ),
                )
            }
        }
    }

    /// The single user-visible suspension point.
    async fn ask_user(
        &self,
        request: &ActionRequest,
        cancel: &CancellationToken,
        state: &mut AgentState,
        secrets: &mut Vec<String>,
    ) -> ActionResult {
        let Some(prompt) = request.prompt.as_ref() else {
            return ActionResult::failure(ErrorKind::InvalidRequest, "askUser requires a prompt");
        };

        state.phase = LoopPhase::AwaitingUser;
        info!(prompt = %prompt.prompt, kind = ?prompt.kind, "waiting for the user");
        self.emit(AgentEvent::AwaitingUser {
            prompt: prompt.clone(),
        });

        let answer = tokio::select! {
            _ = cancel.cancelled() => Err(UserError::Aborted),
            answered = timeout(self.config.user_timeout(), self.user.ask(prompt)) => {
                answered.unwrap_or(Err(UserError::Timeout(self.config.user_timeout_secs)))
            }
        };

        match answer {
            Ok(value) => {
                if prompt.kind == AskKind::Password {
                    if !value.is_empty() {
                        secrets.push(value.clone());
                    }
                    info!(answer = REDACTED, "user answered");
                } else {
                    info!(answer = %value, "user answered");
                }
                ActionResult::success(format!("User answered: {}", value))
            }
            Err(err) => {
                warn!(error = %err, "no answer from the user");
                ActionResult::failure(err.kind(), err.to_string())
            }
        }
    }

    async fn final_url(&self, state: &AgentState) -> Option<String> {
        let executor = self.executor.clone();
        let live = tokio::task::spawn_blocking(move || {
            executor
                .try_lock()
                .ok()
                .and_then(|executor| executor.current_url())
        });
        match timeout(std::time::Duration::from_secs(2), live).await {
            Ok(Ok(Some(url))) => Some(url),
            _ => state
                .current_snapshot
                .as_ref()
                .map(|snapshot| snapshot.url.clone())
                .filter(|url| !url.is_empty()),
        }
    }
}

fn failed(kind: ErrorKind, detail: impl Into<String>) -> TaskOutcome {
    TaskOutcome::Failed {
        kind,
        detail: detail.into(),
    }
}

/// The request repeated when the last two entries are the same failed
/// request.
fn repeated_failure(history: &[HistoryEntry]) -> Option<&ActionRequest> {
    let [.., previous, last] = history else {
        return None;
    };
    let both_failed = !previous.result.is_success() && !last.result.is_success();
    (both_failed && previous.request == last.request).then_some(&last.request)
}

fn redact(text: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
}

fn redact_entry(entry: &HistoryEntry, secrets: &[String]) -> HistoryEntry {
    if secrets.is_empty() {
        return entry.clone();
    }
    let mut request = entry.request.clone();
    request.payload = request.payload.map(|p| redact(&p, secrets));
    let result = match &entry.result {
        ActionResult::Success { observation } => ActionResult::success(redact(observation, secrets)),
        ActionResult::Failure { kind, detail } => {
            ActionResult::failure(*kind, redact(detail, secrets))
        }
    };
    HistoryEntry { request, result }
}
