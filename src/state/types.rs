//! 运行状态类型定义
//!
//! 定义工作流运行、步骤计划、执行记录、评估决策等核心数据类型

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::alias::AliasRegistry;

pub type RunId = String;
pub type AtomId = String;

/// 一次规划迭代产出的步骤计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPlan {
    pub step_number: u32,
    /// 不透明的操作类型标识，由外部任务服务解释
    pub atom_id: AtomId,
    pub description: String,
    /// 工件路径或别名令牌，执行前由 Resolver 就地重写
    pub input_refs: Vec<String>,
    pub output_alias: Option<String>,
    /// 由外部 Prompt Composer 产出，引擎不解析
    pub prompt: String,
}

/// 执行结果：引擎只检查 success、尽力提取的行数与物化提示，不触碰领域内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            payload: serde_json::Map::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_payload(mut self, key: &str, value: serde_json::Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }
}

/// 评估决策
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    RetryWithCorrection,
    ChangeApproach,
    Complete,
}

/// 评估结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub decision: Decision,
    pub reasoning: String,
    pub correctness: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub corrected_prompt: Option<String>,
    #[serde(default)]
    pub alternative_approach: Option<String>,
}

impl Evaluation {
    /// 评估预言机不可用时的兜底：仅依据 success 合成，保证循环始终能前进
    pub fn fallback_from(result: &ExecutionResult) -> Self {
        let (decision, reasoning) = if result.success {
            (
                Decision::Continue,
                "evaluation oracle unavailable; execution succeeded".to_string(),
            )
        } else {
            (
                Decision::RetryWithCorrection,
                "evaluation oracle unavailable; execution failed".to_string(),
            )
        };
        Self {
            decision,
            reasoning,
            correctness: result.success,
            issues: Vec::new(),
            corrected_prompt: None,
            alternative_approach: None,
        }
    }
}

/// 执行历史条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_number: u32,
    pub atom_id: AtomId,
    pub input_refs_used: Vec<String>,
    pub description: String,
    pub output_alias: Option<String>,
    /// 物化后的工件路径；缺失表示该步输出未落盘
    pub artifact_path: Option<String>,
    pub result: ExecutionResult,
    pub evaluation: Evaluation,
    pub recorded_at: DateTime<Utc>,
}

/// 一次工作流运行；Run State Store 独占所有权
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub run_id: RunId,
    pub goal_prompt: String,
    pub goal_achieved: bool,
    /// 从 1 开始；重试复用当前步号直至成功或中止
    pub current_step: u32,
    pub paused: bool,
    pub paused_at_step: u32,
    pub awaiting_clarification: bool,
    pub clarification_context: Option<String>,
    /// 按步重置
    pub retry_count: u32,
    /// 步号单调不减；仅重试原地复用时不追加
    pub execution_history: Vec<StepRecord>,
    /// 已物化工件路径，按物化顺序
    pub available_artifacts: Vec<String>,
    pub alias_registry: AliasRegistry,
    /// 按步号缓存的计划，供 Replay 回放
    pub plan_cache: HashMap<u32, StepPlan>,
    pub replay_budget_used: u32,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(run_id: impl Into<String>, goal_prompt: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            goal_prompt: goal_prompt.into(),
            goal_achieved: false,
            current_step: 1,
            paused: false,
            paused_at_step: 0,
            awaiting_clarification: false,
            clarification_context: None,
            retry_count: 0,
            execution_history: Vec::new(),
            available_artifacts: Vec::new(),
            alias_registry: AliasRegistry::default(),
            plan_cache: HashMap::new(),
            replay_budget_used: 0,
            created_at: Utc::now(),
        }
    }

    pub fn last_record(&self) -> Option<&StepRecord> {
        self.execution_history.last()
    }

    /// 某操作是否已出现在历史中（强制终结操作策略用）
    pub fn has_atom_in_history(&self, atom_id: &str) -> bool {
        self.execution_history.iter().any(|r| r.atom_id == atom_id)
    }

    /// 追加历史条目；步号必须不小于最后一条（不变量，违反时记日志并照常追加）
    pub fn push_record(&mut self, record: StepRecord) {
        if let Some(last) = self.execution_history.last() {
            if record.step_number < last.step_number {
                tracing::error!(
                    run_id = %self.run_id,
                    step = record.step_number,
                    last = last.step_number,
                    "history step numbers must be monotonically non-decreasing"
                );
            }
        }
        self.execution_history.push(record);
    }

    /// 最近的若干工件路径（新在前），作为规划时的优先工件提示
    pub fn priority_artifacts(&self, limit: usize) -> Vec<String> {
        self.available_artifacts
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn mark_paused(&mut self) {
        self.paused = true;
        self.paused_at_step = self.current_step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_evaluation_from_success() {
        let eval = Evaluation::fallback_from(&ExecutionResult::ok());
        assert_eq!(eval.decision, Decision::Continue);
        assert!(eval.correctness);
    }

    #[test]
    fn test_fallback_evaluation_from_failure() {
        let eval = Evaluation::fallback_from(&ExecutionResult::fail("boom"));
        assert_eq!(eval.decision, Decision::RetryWithCorrection);
        assert!(!eval.correctness);
    }

    #[test]
    fn test_decision_serde_snake_case() {
        let json = serde_json::to_string(&Decision::RetryWithCorrection).unwrap();
        assert_eq!(json, "\"retry_with_correction\"");
        let parsed: Decision = serde_json::from_str("\"change_approach\"").unwrap();
        assert_eq!(parsed, Decision::ChangeApproach);
    }

    #[test]
    fn test_priority_artifacts_most_recent_first() {
        let mut run = WorkflowRun::new("r", "goal");
        run.available_artifacts = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(run.priority_artifacts(2), vec!["c", "b"]);
    }
}
