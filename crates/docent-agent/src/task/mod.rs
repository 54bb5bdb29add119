//! Decomposing requests into dependent steps and running them

mod engine;
mod events;
mod model;
mod planner;

pub use engine::{TaskEngine, TaskOutcome};
pub use events::TaskEvent;
pub use model::{
    ExecutionPlan, StepReport, StepStatus, Task, TaskStatus, TaskStatusReport, TaskStep,
};
pub use planner::{Plan, extract_json_object, parse_plan, planning_prompt};
