//! 回放恢复
//!
//! 仅在链式校验报「上一步输出未物化」时触发：取出该步缓存计划，
//! 把输入重绑到当前实际可用的工件，端到端重跑（执行 -> 评估 -> 物化），
//! 成功后由调用方重新校验原链。总次数受 ReplayBudget 约束。

use std::sync::Arc;

use chrono::Utc;

use crate::core::EngineError;
use crate::events::{EngineEvent, EventEmitter};
use crate::exec::StepExecutor;
use crate::materialize::Materializer;
use crate::oracle::EvaluatorAdapter;
use crate::state::{StepRecord, WorkflowRun};

/// 回放结果
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    /// 已恢复：工件重新物化，可重试原校验
    Recovered { step_number: u32, artifact_path: String },
    /// 预算耗尽：向调用方上报 retry_required
    BudgetExhausted,
}

/// 回放恢复器：复用执行/评估/物化组件重跑缓存计划
pub struct ReplayRecovery {
    executor: Arc<StepExecutor>,
    evaluator: Arc<EvaluatorAdapter>,
    materializer: Arc<Materializer>,
    budget: u32,
}

impl ReplayRecovery {
    pub fn new(
        executor: Arc<StepExecutor>,
        evaluator: Arc<EvaluatorAdapter>,
        materializer: Arc<Materializer>,
        budget: u32,
    ) -> Self {
        Self {
            executor,
            evaluator,
            materializer,
            budget: budget.max(1),
        }
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// 回放指定步号的缓存计划
    pub async fn replay(
        &self,
        run: &mut WorkflowRun,
        failed_step: u32,
        emitter: &EventEmitter,
    ) -> Result<ReplayOutcome, EngineError> {
        if run.replay_budget_used >= self.budget {
            return Ok(ReplayOutcome::BudgetExhausted);
        }

        let mut plan = run.plan_cache.get(&failed_step).cloned().ok_or_else(|| {
            EngineError::DependencyUnsatisfied(format!(
                "no cached plan for step {failed_step}; cannot replay"
            ))
        })?;

        // 重绑输入：优先实际可用的工件，而非计划里的原始令牌
        for input in plan.input_refs.iter_mut() {
            let resolved = run.alias_registry.resolve(input);
            if run.available_artifacts.iter().any(|a| a == &resolved) {
                *input = resolved;
            } else if let Some(latest) = run.available_artifacts.last() {
                tracing::debug!(
                    step = failed_step,
                    original = %input,
                    rebound = %latest,
                    "rebinding replay input to latest artifact"
                );
                *input = latest.clone();
            } else {
                *input = resolved;
            }
        }

        run.replay_budget_used += 1;
        emitter.emit(EngineEvent::Replay {
            step: failed_step,
            replays_used: run.replay_budget_used,
            budget: self.budget,
        });
        tracing::info!(
            run_id = %run.run_id,
            step = failed_step,
            used = run.replay_budget_used,
            budget = self.budget,
            "replaying cached step"
        );

        let result = self.executor.execute_with_retry(&plan, emitter).await?;
        if !result.success {
            return Err(EngineError::DependencyUnsatisfied(format!(
                "replayed step {failed_step} failed: {}",
                result.error.as_deref().unwrap_or("unknown")
            )));
        }

        let evaluation = self
            .evaluator
            .evaluate(&result, &plan, &run.execution_history)
            .await;

        let mut record = StepRecord {
            step_number: plan.step_number,
            atom_id: plan.atom_id.clone(),
            input_refs_used: plan.input_refs.clone(),
            description: plan.description.clone(),
            output_alias: plan.output_alias.clone(),
            artifact_path: None,
            result,
            evaluation,
            recorded_at: Utc::now(),
        };
        let artifact_path = self.materializer.materialize(run, &mut record).await?;
        emitter.emit(EngineEvent::Materialized {
            step: record.step_number,
            alias: record.output_alias.clone(),
            path: artifact_path.clone(),
        });

        // 历史中已有该步记录则原地刷新（保持步号单调），否则仅登记工件
        if let Some(existing) = run
            .execution_history
            .iter_mut()
            .find(|r| r.step_number == failed_step)
        {
            *existing = record;
        }

        Ok(ReplayOutcome::Recovered {
            step_number: failed_step,
            artifact_path,
        })
    }
}
