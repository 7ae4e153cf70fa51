//! 评估适配器
//!
//! 与规划适配器同一套重试/超时包装，但尝试预算更短（默认 2 次）；
//! 耗尽后不暂停，而是仅凭 result.success 合成兜底评估，保证循环始终前进。

use std::sync::Arc;

use crate::core::{retry_with_timeout, RetryPolicy};
use crate::oracle::parse::parse_evaluation_reply;
use crate::oracle::traits::EvaluationOracle;
use crate::state::{Evaluation, ExecutionResult, StepPlan, StepRecord};

/// 评估适配器
pub struct EvaluatorAdapter {
    oracle: Arc<dyn EvaluationOracle>,
    policy: RetryPolicy,
}

impl EvaluatorAdapter {
    pub fn new(oracle: Arc<dyn EvaluationOracle>, policy: RetryPolicy) -> Self {
        Self { oracle, policy }
    }

    /// 评估一次执行结果；预言机不可用时返回兜底评估，永不失败
    pub async fn evaluate(
        &self,
        result: &ExecutionResult,
        plan: &StepPlan,
        history: &[StepRecord],
    ) -> Evaluation {
        let reply = retry_with_timeout(&self.policy, "evaluate", |_attempt| {
            let oracle = self.oracle.clone();
            async move {
                let raw = oracle.evaluate(result, plan, history).await?;
                parse_evaluation_reply(&raw)
            }
        })
        .await;

        match reply {
            Ok(evaluation) => evaluation,
            Err(failure) => {
                tracing::warn!(
                    step = plan.step_number,
                    atom = %plan.atom_id,
                    failure = ?failure,
                    "evaluation oracle unavailable, synthesizing fallback"
                );
                Evaluation::fallback_from(result)
            }
        }
    }
}
