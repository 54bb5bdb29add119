//! Task lifecycle events

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::AgentKind;

/// Events emitted while a task is planned and executed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task registered, planning about to start
    TaskCreated {
        task_id: Uuid,
        session_id: String,
        request: String,
    },

    /// Decomposition succeeded
    PlanReady {
        task_id: Uuid,
        total_steps: usize,
        analysis: String,
    },

    /// A step was dispatched to its agent
    StepStarted {
        task_id: Uuid,
        step_number: u32,
        agent: AgentKind,
        attempt: u32,
    },

    StepCompleted { task_id: Uuid, step_number: u32 },

    /// A step failed and was requeued
    StepRetrying {
        task_id: Uuid,
        step_number: u32,
        retry_count: u32,
        error: String,
    },

    /// A step exhausted its retries
    StepFailed {
        task_id: Uuid,
        step_number: u32,
        error: String,
    },

    TaskCompleted {
        task_id: Uuid,
        steps_completed: usize,
        total_steps: usize,
    },

    TaskFailed { task_id: Uuid, error: String },

    TaskCancelled { task_id: Uuid },
}

impl TaskEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::TaskCompleted { .. }
                | TaskEvent::TaskFailed { .. }
                | TaskEvent::TaskCancelled { .. }
        )
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            TaskEvent::TaskCreated { task_id, .. }
            | TaskEvent::PlanReady { task_id, .. }
            | TaskEvent::StepStarted { task_id, .. }
            | TaskEvent::StepCompleted { task_id, .. }
            | TaskEvent::StepRetrying { task_id, .. }
            | TaskEvent::StepFailed { task_id, .. }
            | TaskEvent::TaskCompleted { task_id, .. }
            | TaskEvent::TaskFailed { task_id, .. }
            | TaskEvent::TaskCancelled { task_id } => *task_id,
        }
    }
}
