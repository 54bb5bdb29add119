//! Task and step state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::AgentKind;

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Planning,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    /// 1-based, unique within the task
    pub step_number: u32,
    pub instruction: String,
    pub suggested_agent: AgentKind,
    pub dependencies: Vec<u32>,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Failed executions so far
    pub retry_count: u32,
    pub complexity: Option<String>,
    pub estimated_time: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn new(step_number: u32, instruction: impl Into<String>, agent: AgentKind) -> Self {
        Self {
            step_number,
            instruction: instruction.into(),
            suggested_agent: agent,
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            complexity: None,
            estimated_time: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn depends_on(mut self, dependencies: Vec<u32>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Summary of the decomposition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub analysis: String,
    pub estimated_duration: Option<String>,
    pub step_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub request: String,
    pub session_id: String,
    pub steps: Vec<TaskStep>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_result: Option<String>,
    pub plan: Option<ExecutionPlan>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(request: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request: request.into(),
            session_id: session_id.into(),
            steps: Vec::new(),
            status: TaskStatus::Created,
            created_at: Utc::now(),
            completed_at: None,
            final_result: None,
            plan: None,
            error: None,
        }
    }

    /// Every step is completed or cancelled
    pub fn is_completed(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Cancelled))
    }

    fn is_step_completed(&self, step_number: u32) -> bool {
        self.steps
            .iter()
            .any(|s| s.step_number == step_number && s.status == StepStatus::Completed)
    }

    /// Pending steps whose dependencies have all completed, in step order
    pub fn ready_steps(&self) -> Vec<u32> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .filter(|s| s.dependencies.iter().all(|d| self.is_step_completed(*d)))
            .map(|s| s.step_number)
            .collect()
    }

    fn steps_with(&self, status: StepStatus) -> Vec<u32> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.step_number)
            .collect()
    }

    pub fn pending_steps(&self) -> Vec<u32> {
        self.steps_with(StepStatus::Pending)
    }

    pub fn failed_steps(&self) -> Vec<u32> {
        self.steps_with(StepStatus::Failed)
    }

    pub fn steps_completed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn step(&self, step_number: u32) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn step_mut(&mut self, step_number: u32) -> Option<&mut TaskStep> {
        self.steps.iter_mut().find(|s| s.step_number == step_number)
    }

    /// When the task reached a terminal status, or was created if it has not
    pub fn settled_at(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }

    pub fn status_report(&self) -> TaskStatusReport {
        let total_steps = self.steps.len();
        let steps_completed = self.steps_completed();
        TaskStatusReport {
            task_id: self.id,
            request: self.request.clone(),
            status: self.status,
            steps_completed,
            total_steps,
            progress: if total_steps == 0 {
                0.0
            } else {
                steps_completed as f32 / total_steps as f32 * 100.0
            },
            steps: self
                .steps
                .iter()
                .map(|s| StepReport {
                    step_number: s.step_number,
                    agent: s.suggested_agent,
                    status: s.status,
                    retry_count: s.retry_count,
                    error: s.error.clone(),
                })
                .collect(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step_number: u32,
    pub agent: AgentKind,
    pub status: StepStatus,
    pub retry_count: u32,
    pub error: Option<String>,
}

/// Snapshot of a task's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task_id: Uuid,
    pub request: String,
    pub status: TaskStatus,
    pub steps_completed: usize,
    pub total_steps: usize,
    /// Percentage of completed steps
    pub progress: f32,
    pub steps: Vec<StepReport>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(steps: Vec<TaskStep>) -> Task {
        let mut task = Task::new("request", "session");
        task.steps = steps;
        task
    }

    #[test]
    fn test_ready_steps_respect_dependencies() {
        let mut task = task_with(vec![
            TaskStep::new(1, "a", AgentKind::Search),
            TaskStep::new(2, "b", AgentKind::Function).depends_on(vec![1]),
            TaskStep::new(3, "c", AgentKind::File),
        ]);
        assert_eq!(task.ready_steps(), vec![1, 3]);

        task.step_mut(1).unwrap().status = StepStatus::Completed;
        task.step_mut(3).unwrap().status = StepStatus::Running;
        assert_eq!(task.ready_steps(), vec![2]);
    }

    #[test]
    fn test_cancelled_dependency_does_not_satisfy() {
        let mut task = task_with(vec![
            TaskStep::new(1, "a", AgentKind::Search),
            TaskStep::new(2, "b", AgentKind::Search).depends_on(vec![1]),
        ]);
        task.step_mut(1).unwrap().status = StepStatus::Cancelled;
        assert!(task.ready_steps().is_empty());
        assert_eq!(task.pending_steps(), vec![2]);
    }

    #[test]
    fn test_is_completed_requires_no_pending_or_running() {
        let mut task = task_with(vec![
            TaskStep::new(1, "a", AgentKind::Search),
            TaskStep::new(2, "b", AgentKind::Search),
        ]);
        assert!(!task.is_completed());
        task.step_mut(1).unwrap().status = StepStatus::Completed;
        task.step_mut(2).unwrap().status = StepStatus::Running;
        assert!(!task.is_completed());
        task.step_mut(2).unwrap().status = StepStatus::Cancelled;
        assert!(task.is_completed());
        assert!(!task_with(Vec::new()).is_completed());
    }

    #[test]
    fn test_status_report_progress() {
        let mut task = task_with(vec![
            TaskStep::new(1, "a", AgentKind::Search),
            TaskStep::new(2, "b", AgentKind::Search),
            TaskStep::new(3, "c", AgentKind::Search),
            TaskStep::new(4, "d", AgentKind::Search),
        ]);
        task.step_mut(1).unwrap().status = StepStatus::Completed;
        let report = task.status_report();
        assert_eq!(report.steps_completed, 1);
        assert_eq!(report.total_steps, 4);
        assert_eq!(report.progress, 25.0);
    }
}
