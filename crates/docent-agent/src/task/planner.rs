//! Turning a model's decomposition reply into a validated plan

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Value, json};

use super::model::{ExecutionPlan, TaskStep};
use crate::agents::AgentKind;
use crate::error::PlanError;

pub const PLANNER_SYSTEM_PROMPT: &str = "You are an expert task decomposition specialist. \
Break the user's request into logical, executable steps. For each step give a clear, specific \
instruction, the most appropriate agent type, the step numbers it depends on and an estimated \
complexity (low, medium, high). Keep steps atomic and focused, and consider dependencies \
carefully. Reply with JSON only.";

/// A validated decomposition
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub summary: ExecutionPlan,
    pub steps: Vec<TaskStep>,
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default, alias = "analysis")]
    task_analysis: String,
    #[serde(default)]
    estimated_duration: Option<Value>,
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    step_number: u32,
    instruction: String,
    suggested_agent_type: String,
    #[serde(default)]
    dependencies: Vec<u32>,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    estimated_time: Option<Value>,
}

fn plan_schema() -> Value {
    json!({
        "type": "object",
        "required": ["steps"],
        "properties": {
            "task_analysis": { "type": "string" },
            "estimated_duration": { "type": ["string", "number"] },
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["step_number", "instruction", "suggested_agent_type"],
                    "properties": {
                        "step_number": { "type": "integer", "minimum": 1 },
                        "instruction": { "type": "string", "minLength": 1 },
                        "suggested_agent_type": { "type": "string" },
                        "dependencies": {
                            "type": "array",
                            "items": { "type": "integer", "minimum": 1 }
                        },
                        "complexity": { "type": "string" },
                        "estimated_time": { "type": ["string", "number"] }
                    }
                }
            }
        }
    })
}

/// Build the decomposition prompt for `request`
pub fn planning_prompt(request: &str, max_steps: usize) -> String {
    let agents = AgentKind::ALL
        .iter()
        .map(|k| format!("- {}: {}", k.name(), k.description()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Task to decompose: {request}\n\n\
         Available agents:\n{agents}\n\n\
         Use at most {max_steps} steps. Provide the breakdown in this JSON format:\n\
         {{\n  \"task_analysis\": \"Brief analysis of the task and approach\",\n  \
         \"estimated_duration\": \"Estimated time in minutes\",\n  \"steps\": [\n    {{\n      \
         \"step_number\": 1,\n      \"instruction\": \"Specific instruction for this step\",\n      \
         \"suggested_agent_type\": \"SearchAgent|FileAgent|FunctionAgent|MultimediaAgent\",\n      \
         \"dependencies\": [],\n      \"complexity\": \"low|medium|high\",\n      \
         \"estimated_time\": \"Estimated time in seconds\"\n    }}\n  ]\n}}"
    )
}

/// First balanced `{...}` in `text`, ignoring braces inside string literals
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn scalar_to_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Parse and validate a decomposition reply
pub fn parse_plan(raw: &str, max_steps: usize) -> Result<Plan, PlanError> {
    let value: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(direct) => {
            let candidate = extract_json_object(raw)
                .ok_or_else(|| PlanError::Unparseable(direct.to_string()))?;
            serde_json::from_str(candidate).map_err(|e| PlanError::Unparseable(e.to_string()))?
        }
    };

    let step_count = match value.get("steps") {
        None | Some(Value::Null) => 0,
        Some(Value::Array(steps)) => steps.len(),
        Some(_) => usize::MAX,
    };
    if step_count == 0 {
        return Err(PlanError::NoSteps);
    }

    let schema = plan_schema();
    let validator =
        jsonschema::validator_for(&schema).map_err(|e| PlanError::Schema(e.to_string()))?;
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();
    if !errors.is_empty() {
        return Err(PlanError::Schema(errors.join("\n")));
    }

    let raw_plan: RawPlan =
        serde_json::from_value(value).map_err(|e| PlanError::Schema(e.to_string()))?;
    if raw_plan.steps.len() > max_steps {
        return Err(PlanError::TooManySteps {
            count: raw_plan.steps.len(),
            max: max_steps,
        });
    }

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(raw_plan.steps.len());
    for raw_step in raw_plan.steps {
        if !seen.insert(raw_step.step_number) {
            return Err(PlanError::DuplicateStep(raw_step.step_number));
        }
        let agent: AgentKind =
            raw_step
                .suggested_agent_type
                .parse()
                .map_err(|agent| PlanError::UnknownAgent {
                    step: raw_step.step_number,
                    agent,
                })?;
        let mut step = TaskStep::new(raw_step.step_number, raw_step.instruction, agent)
            .depends_on(raw_step.dependencies);
        step.complexity = raw_step.complexity;
        step.estimated_time = scalar_to_string(raw_step.estimated_time);
        steps.push(step);
    }
    steps.sort_by_key(|s| s.step_number);

    Ok(Plan {
        summary: ExecutionPlan {
            analysis: raw_plan.task_analysis,
            estimated_duration: scalar_to_string(raw_plan.estimated_duration),
            step_count: steps.len(),
        },
        steps,
    })
}
