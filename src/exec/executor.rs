//! 步骤执行器
//!
//! 对每次调用施加超时与有界退避重试：硬失败重试后向上抛出（绝不吞掉）；
//! success=false 为软失败，重试后返回最后一次结果；每次尝试输出结构化审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::EngineError;
use crate::events::{EngineEvent, EventEmitter};
use crate::exec::invoker::TaskInvoker;
use crate::state::{ExecutionResult, StepPlan};

/// 失败原因截断长度（事件预览用）
const REASON_PREVIEW_CHARS: usize = 120;

fn truncate_reason(reason: &str) -> String {
    let preview: String = reason.chars().take(REASON_PREVIEW_CHARS).collect();
    if reason.chars().count() > REASON_PREVIEW_CHARS {
        format!("{preview}...")
    } else {
        preview
    }
}

/// 步骤执行器：持有任务调用端与重试参数
pub struct StepExecutor {
    invoker: Arc<dyn TaskInvoker>,
    max_attempts: u32,
    retry_delay: Duration,
    invoke_timeout: Duration,
}

impl StepExecutor {
    pub fn new(
        invoker: Arc<dyn TaskInvoker>,
        max_attempts: u32,
        retry_delay: Duration,
        invoke_timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            max_attempts: max_attempts.max(1),
            retry_delay,
            invoke_timeout,
        }
    }

    /// 由计划构造对任务服务不透明转发的参数
    fn parameters(plan: &StepPlan) -> serde_json::Value {
        serde_json::json!({
            "prompt": plan.prompt,
            "input_refs": plan.input_refs,
            "description": plan.description,
        })
    }

    /// 执行计划所指操作，软/硬失败均有界重试。
    ///
    /// 硬失败耗尽后以 ExecutorFailure 向上抛出；软失败耗尽后返回最后一次结果。
    /// 每次重试前通过 emitter 发出带截断原因的重试通知。
    pub async fn execute_with_retry(
        &self,
        plan: &StepPlan,
        emitter: &EventEmitter,
    ) -> Result<ExecutionResult, EngineError> {
        let parameters = Self::parameters(plan);
        let mut last_soft: Option<ExecutionResult> = None;
        let mut last_hard: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            tracing::info!(
                step = plan.step_number,
                atom = %plan.atom_id,
                attempt = attempt,
                max = self.max_attempts,
                "invoking atom"
            );
            let start = Instant::now();
            let outcome = match timeout(
                self.invoke_timeout,
                self.invoker.invoke(&plan.atom_id, &parameters),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(format!(
                    "invoke timed out after {}s",
                    self.invoke_timeout.as_secs()
                )),
            };

            let (ok, kind) = match &outcome {
                Ok(r) if r.success => (true, "ok"),
                Ok(_) => (false, "soft_failure"),
                Err(_) => (false, "hard_failure"),
            };
            let audit = serde_json::json!({
                "event": "atom_audit",
                "step": plan.step_number,
                "atom": plan.atom_id,
                "attempt": attempt,
                "ok": ok,
                "outcome": kind,
                "duration_ms": start.elapsed().as_millis() as u64,
            });
            tracing::info!(audit = %audit.to_string(), "atom");

            match outcome {
                Ok(result) if result.success => return Ok(result),
                Ok(result) => {
                    let reason = result.error.clone().unwrap_or_else(|| "unknown".to_string());
                    last_soft = Some(result);
                    last_hard = None;
                    if attempt < self.max_attempts {
                        emitter.emit(EngineEvent::ExecutorRetry {
                            step: plan.step_number,
                            atom: plan.atom_id.clone(),
                            attempt,
                            reason: truncate_reason(&reason),
                        });
                    }
                }
                Err(e) => {
                    last_hard = Some(e.clone());
                    if attempt < self.max_attempts {
                        emitter.emit(EngineEvent::ExecutorRetry {
                            step: plan.step_number,
                            atom: plan.atom_id.clone(),
                            attempt,
                            reason: truncate_reason(&e),
                        });
                    }
                }
            }

            if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        if let Some(e) = last_hard {
            return Err(EngineError::ExecutorFailure(format!(
                "atom '{}' failed after {} attempts: {e}",
                plan.atom_id, self.max_attempts
            )));
        }
        // 软失败：返回最后一次结果，由评估/决策层接手
        Ok(last_soft.unwrap_or_else(|| ExecutionResult::fail("no attempt produced a result")))
    }
}
