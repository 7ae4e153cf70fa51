//! 预言机抽象
//!
//! 规划/评估预言机实现 PlanningOracle / EvaluationOracle，返回原始文本，
//! 由适配器负责超时、重试与解析。与具体推理服务解耦（HTTP / 进程内 / Mock）。

use async_trait::async_trait;
use serde::Serialize;

use crate::state::{ExecutionResult, StepPlan, StepRecord};

/// 一次规划调用的上下文快照
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub run_id: String,
    pub goal_prompt: String,
    pub step_number: u32,
    pub history: Vec<StepRecord>,
    pub available_artifacts: Vec<String>,
    /// 优先工件提示（新在前）
    pub priority_artifacts: Vec<String>,
    pub clarification_context: Option<String>,
    /// 评估器给出的修正提示（retry_with_correction 时）
    pub corrected_prompt: Option<String>,
}

/// 规划预言机：返回原始回复文本（JSON 计划 / goal_achieved / 澄清请求）
#[async_trait]
pub trait PlanningOracle: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<String, String>;
}

/// 评估预言机：对一次执行结果返回原始评估文本
#[async_trait]
pub trait EvaluationOracle: Send + Sync {
    async fn evaluate(
        &self,
        result: &ExecutionResult,
        plan: &StepPlan,
        history: &[StepRecord],
    ) -> Result<String, String>;
}
