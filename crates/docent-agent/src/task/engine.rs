use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use docent_ai::{GenerateRequest, ModelTask, SharedGenerator};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::TaskEvent;
use super::model::{StepStatus, Task, TaskStatus, TaskStatusReport};
use super::planner::{self, PLANNER_SYSTEM_PROMPT, Plan};
use crate::agents::{AgentContext, AgentKind, AgentRegistry};
use crate::config::TaskEngineConfig;
use crate::error::{Error, PlanError, Result};

const PLAN_TEMPERATURE: f32 = 0.1;
const PLAN_MAX_TOKENS: u32 = 2048;
const SYNTHESIS_TEMPERATURE: f32 = 0.2;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a result synthesis specialist. Combine the \
results of several task steps into one coherent final response. Keep the logical flow, include \
the key findings and conclusions, and cite step numbers when referring to specific results. \
Be concise but complete.";

/// Result of a task that ran to completion
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub final_text: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub execution_time: Duration,
}

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
}

/// One step handed to an agent in the current round
struct Dispatch {
    step_number: u32,
    agent: AgentKind,
    instruction: String,
    attempt: u32,
    dependency_results: Vec<(u32, String)>,
}

/// Plans requests into steps and executes them in dependency order.
///
/// Ready steps run concurrently in rounds of at most `max_concurrent_steps`.
/// The registry lock is never held across an agent call.
pub struct TaskEngine {
    generator: SharedGenerator,
    agents: AgentRegistry,
    config: TaskEngineConfig,
    tasks: Mutex<HashMap<Uuid, TaskEntry>>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl TaskEngine {
    pub fn new(generator: SharedGenerator, agents: AgentRegistry, config: TaskEngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            generator,
            agents,
            config,
            tasks: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &TaskEngineConfig {
        &self.config
    }

    /// Subscribe to task events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Plan, execute and synthesize one request
    pub async fn run_task(&self, request: &str, session_id: &str) -> Result<TaskOutcome> {
        let request = request.trim();
        if request.is_empty() {
            return Err(Error::InvalidInput("task request is empty".to_string()));
        }

        let started = Instant::now();
        let task = Task::new(request, session_id);
        let task_id = task.id;
        let cancel = CancellationToken::new();
        self.tasks.lock().insert(
            task_id,
            TaskEntry {
                task,
                cancel: cancel.clone(),
            },
        );
        self.emit(TaskEvent::TaskCreated {
            task_id,
            session_id: session_id.to_string(),
            request: request.to_string(),
        });
        tracing::info!(%task_id, session_id, "task created");

        match self.drive(task_id, request, session_id, &cancel).await {
            Ok(final_text) => self.finish_completed(task_id, final_text, started.elapsed()),
            Err(Error::Cancelled) => {
                tracing::info!(%task_id, "task cancelled");
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.finish_failed(task_id, &e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        task_id: Uuid,
        request: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.set_status(task_id, TaskStatus::Planning);
        let plan = self.decompose(request).await.inspect_err(|e| {
            tracing::warn!(%task_id, "decomposition failed: {}", e);
        })?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let total_steps = plan.steps.len();
        let analysis = plan.summary.analysis.clone();
        self.with_task(task_id, |task| {
            task.steps = plan.steps;
            task.plan = Some(plan.summary);
            if !task.status.is_terminal() {
                task.status = TaskStatus::Executing;
            }
        })?;
        self.emit(TaskEvent::PlanReady {
            task_id,
            total_steps,
            analysis,
        });
        tracing::info!(%task_id, total_steps, "task decomposed");

        self.execute(task_id, session_id, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let task = self
            .get_task(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        Ok(self.synthesize(&task).await)
    }

    async fn decompose(&self, request: &str) -> std::result::Result<Plan, PlanError> {
        let prompt = planner::planning_prompt(request, self.config.max_steps);
        let generate = GenerateRequest::new(prompt)
            .system(PLANNER_SYSTEM_PROMPT)
            .temperature(PLAN_TEMPERATURE)
            .max_tokens(PLAN_MAX_TOKENS)
            .task(ModelTask::Reasoning);
        let raw = self
            .generator
            .generate(&generate)
            .await
            .map_err(|e| PlanError::Generation(e.to_string()))?;
        planner::parse_plan(&raw, self.config.max_steps)
    }

    async fn execute(
        &self,
        task_id: Uuid,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(batch) = self.next_round(task_id)? else {
                return Ok(());
            };

            for d in &batch {
                tracing::debug!(%task_id, step = d.step_number, agent = %d.agent, attempt = d.attempt, "dispatching step");
                self.emit(TaskEvent::StepStarted {
                    task_id,
                    step_number: d.step_number,
                    agent: d.agent,
                    attempt: d.attempt,
                });
            }
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|d| self.execute_step(task_id, session_id, d)),
            )
            .await;
            self.apply_round(task_id, &batch, outcomes);
        }
    }

    /// Pick the next batch of ready steps and mark them running.
    ///
    /// `None` when every step is done.
    fn next_round(&self, task_id: Uuid) -> Result<Option<Vec<Dispatch>>> {
        let max_batch = self.config.max_concurrent_steps.max(1);
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        let task = &mut entry.task;

        let failed = task.failed_steps();
        if !failed.is_empty() {
            return Err(Error::StepsFailed { steps: failed });
        }
        if task.is_completed() {
            return Ok(None);
        }
        let ready = task.ready_steps();
        if ready.is_empty() {
            return Err(Error::Deadlock {
                pending: task.pending_steps(),
            });
        }

        let mut batch = Vec::new();
        for step_number in ready.into_iter().take(max_batch) {
            let dependency_results: Vec<(u32, String)> = match task.step(step_number) {
                Some(step) => step
                    .dependencies
                    .iter()
                    .filter_map(|d| {
                        let result = task.step(*d)?.result.clone()?;
                        Some((*d, result))
                    })
                    .collect(),
                None => continue,
            };
            let Some(step) = task.step_mut(step_number) else {
                continue;
            };
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
            batch.push(Dispatch {
                step_number,
                agent: step.suggested_agent,
                instruction: step.instruction.clone(),
                attempt: step.retry_count + 1,
                dependency_results,
            });
        }
        Ok(Some(batch))
    }

    async fn execute_step(
        &self,
        task_id: Uuid,
        session_id: &str,
        dispatch: &Dispatch,
    ) -> std::result::Result<String, String> {
        let agent = self.agents.get(dispatch.agent);
        let context = AgentContext {
            session_id: Some(session_id.to_string()),
            task_id: Some(task_id),
            step_number: Some(dispatch.step_number),
            dependency_results: dispatch.dependency_results.clone(),
        };
        let timeout = self.config.step_timeout();
        match tokio::time::timeout(timeout, agent.handle_message(&dispatch.instruction, &context))
            .await
        {
            Ok(reply) if reply.success => Ok(reply.text),
            Ok(reply) => Err(reply.text),
            Err(_) => Err(format!("Step timed out after {}s", timeout.as_secs())),
        }
    }

    fn apply_round(
        &self,
        task_id: Uuid,
        batch: &[Dispatch],
        outcomes: Vec<std::result::Result<String, String>>,
    ) {
        let max_retries = self.config.max_retries.max(1);
        let mut events = Vec::new();
        {
            let mut tasks = self.tasks.lock();
            let Some(entry) = tasks.get_mut(&task_id) else {
                return;
            };
            for (dispatch, outcome) in batch.iter().zip(outcomes) {
                let Some(step) = entry.task.step_mut(dispatch.step_number) else {
                    continue;
                };
                // cancelled while the agent was working
                if step.status != StepStatus::Running {
                    continue;
                }
                let step_number = step.step_number;
                match outcome {
                    Ok(text) => {
                        step.status = StepStatus::Completed;
                        step.result = Some(text);
                        step.error = None;
                        step.completed_at = Some(Utc::now());
                        tracing::info!(%task_id, step = step_number, "step completed");
                        events.push(TaskEvent::StepCompleted {
                            task_id,
                            step_number,
                        });
                    }
                    Err(error) => {
                        step.retry_count += 1;
                        step.error = Some(error.clone());
                        if step.retry_count < max_retries {
                            step.status = StepStatus::Pending;
                            tracing::warn!(%task_id, step = step_number, retry = step.retry_count, "step failed, retrying: {}", error);
                            events.push(TaskEvent::StepRetrying {
                                task_id,
                                step_number,
                                retry_count: step.retry_count,
                                error,
                            });
                        } else {
                            step.status = StepStatus::Failed;
                            step.completed_at = Some(Utc::now());
                            tracing::warn!(%task_id, step = step_number, "step failed permanently: {}", error);
                            events.push(TaskEvent::StepFailed {
                                task_id,
                                step_number,
                                error,
                            });
                        }
                    }
                }
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    /// Combine step results into one answer, concatenating them if the model fails
    async fn synthesize(&self, task: &Task) -> String {
        let completed: Vec<_> = task
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .collect();
        if completed.is_empty() {
            return "Task completed but no results were generated.".to_string();
        }

        let summaries = completed
            .iter()
            .map(|s| {
                format!(
                    "Step {} ({}): {}\nResult: {}",
                    s.step_number,
                    s.suggested_agent,
                    s.instruction,
                    s.result.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Original task: {}\n\nStep results:\n{summaries}\n\n\
             Provide a comprehensive final response that addresses the original task using \
             the results of every completed step.",
            task.request
        );
        let request = GenerateRequest::new(prompt)
            .system(SYNTHESIS_SYSTEM_PROMPT)
            .temperature(SYNTHESIS_TEMPERATURE)
            .task(ModelTask::Reasoning);

        match self.generator.generate(&request).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => concatenate_results(&completed),
            Err(e) => {
                tracing::warn!(task_id = %task.id, "synthesis failed, concatenating results: {}", e);
                concatenate_results(&completed)
            }
        }
    }

    fn with_task<T>(&self, task_id: Uuid, f: impl FnOnce(&mut Task) -> T) -> Result<T> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        Ok(f(&mut entry.task))
    }

    fn set_status(&self, task_id: Uuid, status: TaskStatus) {
        let _ = self.with_task(task_id, |task| {
            if !task.status.is_terminal() {
                task.status = status;
            }
        });
    }

    fn finish_completed(
        &self,
        task_id: Uuid,
        final_text: String,
        execution_time: Duration,
    ) -> Result<TaskOutcome> {
        let outcome = self.with_task(task_id, |task| {
            if task.status == TaskStatus::Cancelled {
                return Err(Error::Cancelled);
            }
            task.status = TaskStatus::Completed;
            task.final_result = Some(final_text.clone());
            task.completed_at = Some(Utc::now());
            Ok(TaskOutcome {
                task_id,
                final_text,
                steps_completed: task.steps_completed(),
                total_steps: task.steps.len(),
                execution_time,
            })
        })??;

        tracing::info!(%task_id, steps = outcome.total_steps, elapsed_ms = execution_time.as_millis() as u64, "task completed");
        self.emit(TaskEvent::TaskCompleted {
            task_id,
            steps_completed: outcome.steps_completed,
            total_steps: outcome.total_steps,
        });
        Ok(outcome)
    }

    fn finish_failed(&self, task_id: Uuid, error: &Error) {
        let marked = self.with_task(task_id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Failed;
            task.error = Some(error.to_string());
            task.completed_at = Some(Utc::now());
            true
        });
        if matches!(marked, Ok(true)) {
            tracing::warn!(%task_id, "task failed: {}", error);
            self.emit(TaskEvent::TaskFailed {
                task_id,
                error: error.to_string(),
            });
        }
    }

    /// Cancel a task that has not finished. Running steps are marked
    /// cancelled; the execution loop stops before its next round.
    pub fn cancel_task(&self, task_id: Uuid) -> bool {
        {
            let mut tasks = self.tasks.lock();
            let Some(entry) = tasks.get_mut(&task_id) else {
                return false;
            };
            if entry.task.status.is_terminal() {
                return false;
            }
            entry.cancel.cancel();
            entry.task.status = TaskStatus::Cancelled;
            entry.task.completed_at = Some(Utc::now());
            for step in &mut entry.task.steps {
                if step.status == StepStatus::Running {
                    step.status = StepStatus::Cancelled;
                }
            }
        }
        self.emit(TaskEvent::TaskCancelled { task_id });
        true
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.lock().get(&task_id).map(|e| e.task.clone())
    }

    pub fn task_status(&self, task_id: Uuid) -> Option<TaskStatusReport> {
        self.tasks
            .lock()
            .get(&task_id)
            .map(|e| e.task.status_report())
    }

    /// The `n` most recently created tasks, newest first
    pub fn last_tasks(&self, n: usize) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().values().map(|e| e.task.clone()).collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(n);
        tasks
    }

    /// Number of tasks held, and how many of them are still running
    pub fn counts(&self) -> (usize, usize) {
        let tasks = self.tasks.lock();
        let active = tasks
            .values()
            .filter(|e| !e.task.status.is_terminal())
            .count();
        (tasks.len(), active)
    }

    /// Remove finished tasks that settled more than `max_age` ago
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, e| !(e.task.status.is_terminal() && e.task.settled_at() <= cutoff));
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::info!(removed, "cleaned up finished tasks");
        }
        removed
    }
}

fn concatenate_results(completed: &[&super::model::TaskStep]) -> String {
    let results = completed
        .iter()
        .map(|s| {
            format!(
                "Step {}: {}",
                s.step_number,
                s.result.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Task completed with {} steps:\n\n{results}", completed.len())
}
