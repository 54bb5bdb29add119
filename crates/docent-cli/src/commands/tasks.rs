//! /tasks, /task and /cancel commands

use docent_agent::TaskEngine;
use docent_agent::task::Task;

use super::CommandResult;

const DEFAULT_LISTED: usize = 3;

pub struct TaskCommand;

impl TaskCommand {
    /// List the most recent tasks
    pub fn list(tasks: &TaskEngine, args: &str) -> CommandResult {
        let n = match args {
            "" => DEFAULT_LISTED,
            n => match n.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return CommandResult::Message("Usage: /tasks [count]".to_string()),
            },
        };

        let recent = tasks.last_tasks(n);
        if recent.is_empty() {
            return CommandResult::Message("No tasks yet.".to_string());
        }

        let mut output = String::from("Recent tasks\n");
        output.push_str(&"-".repeat(40));
        for task in &recent {
            output.push_str(&format!(
                "\n{}  {:<9}  {}/{} steps  {}",
                short_id(task),
                task.status.as_str(),
                task.steps_completed(),
                task.steps.len(),
                truncate(&task.request, 50),
            ));
        }
        CommandResult::Message(output)
    }

    /// Show one task step by step
    pub fn status(tasks: &TaskEngine, args: &str) -> CommandResult {
        let task = match find_task(tasks, args) {
            Ok(task) => task,
            Err(message) => return CommandResult::Message(message),
        };
        let Some(report) = tasks.task_status(task.id) else {
            return CommandResult::Message(format!("Task not found: {args}"));
        };

        let mut output = format!("Task {}\n", report.task_id);
        output.push_str(&"-".repeat(40));
        output.push('\n');
        output.push_str(&format!("Request:   {}\n", report.request));
        output.push_str(&format!("Status:    {}\n", report.status.as_str()));
        output.push_str(&format!(
            "Progress:  {}/{} steps ({:.0}%)\n",
            report.steps_completed, report.total_steps, report.progress
        ));
        if let Some(error) = &report.error {
            output.push_str(&format!("Error:     {error}\n"));
        }
        for step in &report.steps {
            output.push_str(&format!(
                "\n  {}. [{}] {}",
                step.step_number,
                step.status.as_str(),
                step.agent.name()
            ));
            if step.retry_count > 0 {
                output.push_str(&format!(" (retries: {})", step.retry_count));
            }
            if let Some(error) = &step.error {
                output.push_str(&format!("\n     {error}"));
            }
        }
        CommandResult::Message(output)
    }

    /// Cancel a task that is still running
    pub fn cancel(tasks: &TaskEngine, args: &str) -> CommandResult {
        let task = match find_task(tasks, args) {
            Ok(task) => task,
            Err(message) => return CommandResult::Message(message),
        };
        if tasks.cancel_task(task.id) {
            CommandResult::Message(format!("Cancelled task {}", short_id(&task)))
        } else {
            CommandResult::Message(format!(
                "Task {} already {}",
                short_id(&task),
                task.status.as_str()
            ))
        }
    }
}

/// Resolve a full task id or a unique prefix of one
fn find_task(tasks: &TaskEngine, id: &str) -> Result<Task, String> {
    let id = id.trim().to_lowercase();
    if id.is_empty() {
        return Err("Usage: /task <id> (a unique prefix is enough)".to_string());
    }

    let mut matches: Vec<Task> = tasks
        .last_tasks(usize::MAX)
        .into_iter()
        .filter(|t| t.id.to_string().starts_with(&id))
        .collect();
    match matches.len() {
        0 => Err(format!("Task not found: {id}")),
        1 => Ok(matches.remove(0)),
        n => Err(format!("{n} tasks match '{id}', use a longer prefix")),
    }
}

fn short_id(task: &Task) -> String {
    task.id.to_string().chars().take(8).collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
