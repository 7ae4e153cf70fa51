//! 脚本化预言机（用于测试与演示，无需外部推理服务）
//!
//! 按预置序列依次返回回复文本；序列耗尽后返回 goal_achieved / continue，
//! 便于本地跑通完整编排循环。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::oracle::traits::{EvaluationOracle, PlanRequest, PlanningOracle};
use crate::state::{ExecutionResult, StepPlan, StepRecord};

/// 脚本化规划预言机：依次弹出预置回复，耗尽后宣告目标达成
pub struct ScriptedPlanner {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicU32,
}

impl ScriptedPlanner {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanningOracle for ScriptedPlanner {
    async fn plan(&self, _request: &PlanRequest) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(next.unwrap_or_else(|| r#"{"goal_achieved": true}"#.to_string()))
    }
}

/// 脚本化评估预言机：依次弹出预置回复，耗尽后返回 continue
pub struct ScriptedEvaluator {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicU32,
}

impl ScriptedEvaluator {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvaluationOracle for ScriptedEvaluator {
    async fn evaluate(
        &self,
        _result: &ExecutionResult,
        _plan: &StepPlan,
        _history: &[StepRecord],
    ) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(next.unwrap_or_else(|| {
            r#"{"decision": "continue", "reasoning": "scripted default", "correctness": true}"#
                .to_string()
        }))
    }
}

/// 便捷构造：一条步骤计划回复
pub fn plan_reply(atom_id: &str, input_refs: &[&str], output_alias: Option<&str>) -> String {
    serde_json::json!({
        "atom_id": atom_id,
        "description": format!("run {atom_id}"),
        "input_refs": input_refs,
        "output_alias": output_alias,
        "prompt": format!("execute {atom_id}"),
    })
    .to_string()
}

/// 便捷构造：一条评估回复
pub fn evaluation_reply(decision: &str, reasoning: &str) -> String {
    serde_json::json!({
        "decision": decision,
        "reasoning": reasoning,
        "correctness": decision != "retry_with_correction",
        "issues": [],
    })
    .to_string()
}
