//! Background sweep of idle conversations and finished tasks

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::conversation::ConversationStore;
use crate::task::TaskEngine;

/// Counts removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub conversations: usize,
    pub tasks: usize,
}

/// Expire idle conversations and drop old finished tasks, using the
/// thresholds from each component's config
pub fn sweep(conversations: &ConversationStore, tasks: &TaskEngine) -> SweepReport {
    SweepReport {
        conversations: conversations.expire(conversations.config().expiry()),
        tasks: tasks.cleanup(tasks.config().task_max_age()),
    }
}

/// Run [`sweep`] every `interval` until `cancel` fires
pub fn spawn_sweeper(
    conversations: Arc<ConversationStore>,
    tasks: Arc<TaskEngine>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let report = sweep(&conversations, &tasks);
                    if report != SweepReport::default() {
                        tracing::info!(
                            conversations = report.conversations,
                            tasks = report.tasks,
                            "maintenance sweep"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentKind, AgentRegistry};
    use crate::config::{ConversationConfig, TaskEngineConfig};
    use crate::conversation::Role;
    use crate::test_support::{FlakyAgent, ScriptedGenerator};

    const PLAN: &str = r#"{"steps": [{"step_number": 1, "instruction": "look it up",
        "suggested_agent_type": "SearchAgent"}]}"#;

    fn engine(max_age_hours: u64) -> Arc<TaskEngine> {
        let agents = AgentRegistry::new(
            FlakyAgent::new(AgentKind::Search, 0),
            FlakyAgent::new(AgentKind::File, 0),
            FlakyAgent::new(AgentKind::Function, 0),
            FlakyAgent::new(AgentKind::Multimedia, 0),
        );
        let config = TaskEngineConfig {
            task_max_age_hours: max_age_hours,
            ..TaskEngineConfig::default()
        };
        Arc::new(TaskEngine::new(ScriptedGenerator::fixed(PLAN), agents, config))
    }

    fn store(expiry_hours: u64) -> Arc<ConversationStore> {
        Arc::new(ConversationStore::new(ConversationConfig {
            expiry_hours,
            ..ConversationConfig::default()
        }))
    }

    #[tokio::test]
    async fn test_sweep_uses_configured_thresholds() {
        let conversations = store(0);
        conversations.append_message("s1", Role::User, "hi", Vec::new());
        let tasks = engine(0);
        tasks.run_task("find it", "s1").await.unwrap();

        let report = sweep(&conversations, &tasks);
        assert_eq!(report.tasks, 1);
        assert_eq!(tasks.counts(), (0, 0));

        let kept = store(24);
        kept.append_message("s2", Role::User, "hi", Vec::new());
        assert_eq!(sweep(&kept, &engine(24)), SweepReport::default());
        assert!(kept.get("s2").is_some());
    }

    #[tokio::test]
    async fn test_sweep_with_huge_ages_keeps_everything() {
        let conversations = store(u64::MAX);
        conversations.append_message("s1", Role::User, "hi", Vec::new());
        let tasks = engine(u64::MAX);
        tasks.run_task("find it", "s1").await.unwrap();

        assert_eq!(sweep(&conversations, &tasks), SweepReport::default());
        assert_eq!(tasks.counts().0, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_cancelled() {
        let tasks = engine(0);
        let conversations = store(24);
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            conversations.clone(),
            tasks.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        );

        tasks.run_task("find it", "s1").await.unwrap();
        assert_eq!(tasks.counts().0, 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(tasks.counts().0, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
