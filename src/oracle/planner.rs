//! 规划适配器
//!
//! 包装规划预言机：有界重试 + 单次超时；malformed / 超时耗尽后转为可恢复的
//! 暂停（保留 paused_at_step），绝不硬崩。若预言机宣告目标达成但配置的强制
//! 终结操作尚未出现在历史中，则合成一个指向该操作的强制计划。

use std::sync::Arc;

use crate::core::{retry_with_timeout, EngineError, RetryFailure, RetryPolicy};
use crate::oracle::parse::{parse_planner_reply, PlannerReply};
use crate::oracle::traits::{PlanRequest, PlanningOracle};
use crate::state::{StepPlan, WorkflowRun};

/// 暂停原因：上报时区分超时与格式错误
#[derive(Debug, Clone)]
pub enum PauseReason {
    OracleTimeout(String),
    OracleMalformed(String),
}

impl PauseReason {
    /// 以引擎错误分类法的措辞描述暂停原因
    pub fn describe(&self) -> String {
        self.to_error().to_string()
    }

    pub fn to_error(&self) -> EngineError {
        match self {
            PauseReason::OracleTimeout(detail) => EngineError::OracleTimeout(detail.clone()),
            PauseReason::OracleMalformed(detail) => EngineError::OracleMalformed(detail.clone()),
        }
    }
}

/// 一次规划的产出
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Plan(StepPlan),
    GoalAchieved,
    NeedsClarification(String),
    /// 重试耗尽，run 应转入 paused
    Paused(PauseReason),
}

/// 规划适配器：持有预言机、重试策略与强制终结操作策略
pub struct PlannerAdapter {
    oracle: Arc<dyn PlanningOracle>,
    policy: RetryPolicy,
    terminal_atom: Option<String>,
}

impl PlannerAdapter {
    pub fn new(
        oracle: Arc<dyn PlanningOracle>,
        policy: RetryPolicy,
        terminal_atom: Option<String>,
    ) -> Self {
        Self {
            oracle,
            policy,
            terminal_atom,
        }
    }

    /// 强制终结操作是否仍未满足
    pub fn terminal_pending(&self, run: &WorkflowRun) -> bool {
        match &self.terminal_atom {
            Some(atom) => !run.has_atom_in_history(atom),
            None => false,
        }
    }

    /// 合成指向强制终结操作的计划，绑定最新工件
    pub fn forced_terminal_plan(&self, run: &WorkflowRun) -> Option<StepPlan> {
        let atom = self.terminal_atom.clone()?;
        let input_refs = run.priority_artifacts(1);
        Some(StepPlan {
            step_number: run.current_step,
            atom_id: atom.clone(),
            description: format!("Mandatory final operation '{atom}' before completion"),
            input_refs,
            output_alias: None,
            prompt: String::new(),
        })
    }

    /// 规划下一步；corrected_prompt 来自上一轮 retry_with_correction 决策
    pub async fn plan_next(
        &self,
        run: &WorkflowRun,
        corrected_prompt: Option<String>,
    ) -> PlanOutcome {
        let request = PlanRequest {
            run_id: run.run_id.clone(),
            goal_prompt: run.goal_prompt.clone(),
            step_number: run.current_step,
            history: run.execution_history.clone(),
            available_artifacts: run.available_artifacts.clone(),
            priority_artifacts: run.priority_artifacts(3),
            clarification_context: run.clarification_context.clone(),
            corrected_prompt,
        };
        let current_step = run.current_step;

        let reply = retry_with_timeout(&self.policy, "plan", |_attempt| {
            let request = request.clone();
            let oracle = self.oracle.clone();
            async move {
                let raw = oracle.plan(&request).await?;
                parse_planner_reply(&raw, current_step)
            }
        })
        .await;

        match reply {
            Ok(PlannerReply::Plan(plan)) => PlanOutcome::Plan(plan),
            Ok(PlannerReply::GoalAchieved) => {
                if self.terminal_pending(run) {
                    // 目标虽已宣告达成，仍需先跑强制终结操作
                    match self.forced_terminal_plan(run) {
                        Some(plan) => {
                            tracing::info!(
                                run_id = %run.run_id,
                                atom = %plan.atom_id,
                                "goal achieved but terminal operation missing; forcing step"
                            );
                            PlanOutcome::Plan(plan)
                        }
                        None => PlanOutcome::GoalAchieved,
                    }
                } else {
                    PlanOutcome::GoalAchieved
                }
            }
            Ok(PlannerReply::NeedsClarification(question)) => {
                PlanOutcome::NeedsClarification(question)
            }
            Err(RetryFailure::Timeout { attempts }) => PlanOutcome::Paused(
                PauseReason::OracleTimeout(format!("{attempts} attempts timed out")),
            ),
            Err(RetryFailure::Exhausted { last_error, .. }) => {
                PlanOutcome::Paused(PauseReason::OracleMalformed(last_error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::mock::ScriptedPlanner;
    use crate::state::{Evaluation, ExecutionResult, StepRecord};
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            Duration::from_millis(100),
            Duration::from_millis(1),
        )
    }

    fn run_with_history(atoms: &[&str]) -> WorkflowRun {
        let mut run = WorkflowRun::new("r", "goal");
        for (i, atom) in atoms.iter().enumerate() {
            let result = ExecutionResult::ok();
            run.execution_history.push(StepRecord {
                step_number: (i + 1) as u32,
                atom_id: atom.to_string(),
                input_refs_used: vec![],
                description: String::new(),
                output_alias: None,
                artifact_path: None,
                result: result.clone(),
                evaluation: Evaluation::fallback_from(&result),
                recorded_at: chrono::Utc::now(),
            });
        }
        run
    }

    #[tokio::test]
    async fn test_plan_next_returns_plan() {
        let oracle = Arc::new(ScriptedPlanner::new(vec![
            r#"{"atom_id": "merge", "input_refs": ["a.csv"], "prompt": "p"}"#.to_string(),
        ]));
        let adapter = PlannerAdapter::new(oracle, policy(3), None);
        let run = WorkflowRun::new("r", "goal");
        match adapter.plan_next(&run, None).await {
            PlanOutcome::Plan(plan) => assert_eq!(plan.atom_id, "merge"),
            other => panic!("Expected Plan, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_retried_then_paused() {
        let oracle = Arc::new(ScriptedPlanner::new(vec![
            "garbage".to_string(),
            "more garbage".to_string(),
        ]));
        let adapter = PlannerAdapter::new(oracle.clone(), policy(2), None);
        let run = WorkflowRun::new("r", "goal");
        match adapter.plan_next(&run, None).await {
            PlanOutcome::Paused(PauseReason::OracleMalformed(_)) => {}
            other => panic!("Expected Paused(OracleMalformed), got {other:?}"),
        }
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_then_valid_recovers() {
        let oracle = Arc::new(ScriptedPlanner::new(vec![
            "garbage".to_string(),
            r#"{"atom_id": "merge", "prompt": "p"}"#.to_string(),
        ]));
        let adapter = PlannerAdapter::new(oracle, policy(3), None);
        let run = WorkflowRun::new("r", "goal");
        assert!(matches!(
            adapter.plan_next(&run, None).await,
            PlanOutcome::Plan(_)
        ));
    }

    #[tokio::test]
    async fn test_goal_achieved_passthrough_without_policy() {
        let oracle = Arc::new(ScriptedPlanner::new(vec![
            r#"{"goal_achieved": true}"#.to_string(),
        ]));
        let adapter = PlannerAdapter::new(oracle, policy(3), None);
        let run = WorkflowRun::new("r", "goal");
        assert!(matches!(
            adapter.plan_next(&run, None).await,
            PlanOutcome::GoalAchieved
        ));
    }

    #[tokio::test]
    async fn test_goal_achieved_redirected_to_forced_terminal() {
        let oracle = Arc::new(ScriptedPlanner::new(vec![
            r#"{"goal_achieved": true}"#.to_string(),
        ]));
        let adapter =
            PlannerAdapter::new(oracle, policy(3), Some("chart-maker".to_string()));
        let mut run = run_with_history(&["merge"]);
        run.available_artifacts.push("merged.dat".to_string());
        run.current_step = 2;
        match adapter.plan_next(&run, None).await {
            PlanOutcome::Plan(plan) => {
                assert_eq!(plan.atom_id, "chart-maker");
                assert_eq!(plan.step_number, 2);
                assert_eq!(plan.input_refs, vec!["merged.dat"]);
            }
            other => panic!("Expected forced Plan, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_goal_achieved_after_terminal_ran() {
        let oracle = Arc::new(ScriptedPlanner::new(vec![
            r#"{"goal_achieved": true}"#.to_string(),
        ]));
        let adapter =
            PlannerAdapter::new(oracle, policy(3), Some("chart-maker".to_string()));
        let run = run_with_history(&["merge", "chart-maker"]);
        assert!(matches!(
            adapter.plan_next(&run, None).await,
            PlanOutcome::GoalAchieved
        ));
    }

    #[tokio::test]
    async fn test_clarification_request() {
        let oracle = Arc::new(ScriptedPlanner::new(vec![
            r#"{"clarification": "which file?"}"#.to_string(),
        ]));
        let adapter = PlannerAdapter::new(oracle, policy(3), None);
        let run = WorkflowRun::new("r", "goal");
        match adapter.plan_next(&run, None).await {
            PlanOutcome::NeedsClarification(q) => assert_eq!(q, "which file?"),
            other => panic!("Expected NeedsClarification, got {other:?}"),
        }
    }
}
