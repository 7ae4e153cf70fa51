//! 编排主循环
//!
//! Plan -> Validate -> Execute -> Evaluate -> Decide，每 run 一个独立循环实例；
//! 守卫保证单飞，看门狗防停滞/死循环/无限迭代，校验失败触发有界回放，
//! 预言机不可用转为可恢复暂停。全程通过 EventEmitter 推送去重状态事件。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;

use crate::config::{EngineSection, EventsSection};
use crate::core::{
    detect_repeat, ComplexityLimiter, EngineError, GuardPhase, GuardStore, LoopCheck, RunOutcome,
    RunStatus, StallWatchdog,
};
use crate::events::{EngineEvent, EventEmitter, EventSink};
use crate::exec::StepExecutor;
use crate::materialize::{Materializer, ReplayOutcome, ReplayRecovery};
use crate::oracle::{EvaluatorAdapter, PlanOutcome, PlannerAdapter};
use crate::state::{
    resolve_step_inputs, validate_chain, ChainIssue, Decision, RunStateStore, StepPlan, StepRecord,
    WorkflowRun,
};

/// 编排引擎：组件由 EngineBuilder 注入，可被多个并发 run 共享
pub struct Engine {
    pub(crate) store: Arc<RunStateStore>,
    pub(crate) guards: Arc<GuardStore>,
    pub(crate) planner: Arc<PlannerAdapter>,
    pub(crate) evaluator: Arc<EvaluatorAdapter>,
    pub(crate) executor: Arc<StepExecutor>,
    pub(crate) materializer: Arc<Materializer>,
    pub(crate) replay: Arc<ReplayRecovery>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) engine_cfg: EngineSection,
    pub(crate) events_cfg: EventsSection,
}

/// 物化（决策处理）的结果
enum RecordOutcome {
    Recorded,
    /// 物化超时：按超时策略转入可恢复暂停
    MaterializeTimeout,
}

impl Engine {
    pub fn store(&self) -> &Arc<RunStateStore> {
        &self.store
    }

    pub fn guards(&self) -> &Arc<GuardStore> {
        &self.guards
    }

    /// 创建并驱动一个新 run 直至终态
    pub async fn start(&self, run_id: &str, goal_prompt: &str) -> Result<RunOutcome, EngineError> {
        self.store.create(run_id, goal_prompt).await?;
        self.run(run_id).await
    }

    /// 驱动已存在的 run（resume 后再次调用）
    pub async fn run(&self, run_id: &str) -> Result<RunOutcome, EngineError> {
        let cancel = self
            .store
            .cancel_token(run_id)
            .await
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let emitter = EventEmitter::new(
            self.sink.clone(),
            self.events_cfg.required,
            self.events_cfg.dedupe,
            cancel.clone(),
        );

        {
            let run = self
                .store
                .get(run_id)
                .await
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            if run.paused {
                return Ok(RunOutcome::with_reason(
                    RunStatus::Paused,
                    run.execution_history.len(),
                    "run is paused; resume required",
                ));
            }
            // 仅首次进入（从未暂停过、尚无历史）时宣告开始
            if run.execution_history.is_empty() && run.paused_at_step == 0 {
                emitter.emit(EngineEvent::RunStarted {
                    run_id: run.run_id.clone(),
                    goal: run.goal_prompt.clone(),
                });
            }
        }

        let mut watchdog = StallWatchdog::new(self.engine_cfg.stall_threshold);
        let mut limiter = ComplexityLimiter::new(self.engine_cfg.max_iterations);
        let guard_backoff = Duration::from_millis(self.engine_cfg.guard_backoff_ms);
        // retry_with_correction 的修正提示，传入下一轮规划
        let mut corrected_prompt: Option<String> = None;
        // complete 决策被强制终结操作拦截后，下一轮跳过预言机直接出强制计划
        let mut force_terminal = false;

        loop {
            // 取消检查：外部标志置位则干净退出，在途结果丢弃
            if cancel.is_cancelled() {
                return self.finish_stopped(run_id, &emitter).await;
            }

            // 复杂度上限：超限中止而非无限继续
            if limiter.tick() {
                let run = self.store.get(run_id).await;
                let steps = run.map(|r| r.execution_history.len()).unwrap_or(0);
                let reason =
                    EngineError::ComplexityExceeded(self.engine_cfg.max_iterations).to_string();
                emitter.emit(EngineEvent::Aborted {
                    reason: reason.clone(),
                });
                self.store.destroy(run_id).await;
                return Ok(RunOutcome::with_reason(
                    RunStatus::AbortedComplexity,
                    steps,
                    reason,
                ));
            }

            // 单飞守卫：忙则退避重试，绝不并发推进同一 run
            let step_hint = self
                .store
                .get(run_id)
                .await
                .map(|r| r.current_step)
                .unwrap_or(0);
            let Some(token) = self
                .guards
                .acquire_with_backoff(run_id, step_hint, guard_backoff, &cancel)
                .await
            else {
                return self.finish_stopped(run_id, &emitter).await;
            };

            let mut run = match self.store.get(run_id).await {
                Some(run) => run,
                None => {
                    self.guards.release(run_id, &token);
                    return Err(EngineError::RunNotFound(run_id.to_string()));
                }
            };

            emitter.emit(EngineEvent::IterationUpdate {
                step: run.current_step,
                iteration: limiter.iterations(),
                max_iterations: self.engine_cfg.max_iterations,
            });

            // 停滞看门狗：历史长度持续不增长则强制完成
            if watchdog.observe(run.execution_history.len()) {
                emitter.emit(EngineEvent::Stalled {
                    attempts: watchdog.stalled_attempts(),
                });
                run.goal_achieved = true;
                let steps = run.execution_history.len();
                self.store.save(run).await;
                emitter.emit(EngineEvent::Completed { steps });
                self.guards.release(run_id, &token);
                self.store.destroy(run_id).await;
                return Ok(RunOutcome::with_reason(
                    RunStatus::Completed,
                    steps,
                    format!(
                        "{}: stalled with no history growth",
                        EngineError::StallDetected
                    ),
                ));
            }

            // 规划
            emitter.emit(EngineEvent::Planning {
                step: run.current_step,
            });
            let outcome = if force_terminal {
                force_terminal = false;
                match self.planner.forced_terminal_plan(&run) {
                    Some(plan) => PlanOutcome::Plan(plan),
                    None => PlanOutcome::GoalAchieved,
                }
            } else {
                self.planner.plan_next(&run, corrected_prompt.take()).await
            };

            let mut plan = match outcome {
                PlanOutcome::Plan(plan) => plan,
                PlanOutcome::GoalAchieved => {
                    run.goal_achieved = true;
                    let steps = run.execution_history.len();
                    self.store.save(run).await;
                    emitter.emit(EngineEvent::Completed { steps });
                    self.guards.release(run_id, &token);
                    self.store.destroy(run_id).await;
                    return Ok(RunOutcome::new(RunStatus::Completed, steps));
                }
                PlanOutcome::NeedsClarification(question) => {
                    run.mark_paused();
                    run.awaiting_clarification = true;
                    run.clarification_context = Some(question.clone());
                    let steps = run.execution_history.len();
                    let step = run.current_step;
                    self.store.save(run).await;
                    self.guards
                        .update_phase(run_id, &token, GuardPhase::PausedClarification);
                    emitter.emit(EngineEvent::Paused {
                        step,
                        reason: format!("awaiting clarification: {question}"),
                    });
                    self.guards.release(run_id, &token);
                    return Ok(RunOutcome::with_reason(
                        RunStatus::Paused,
                        steps,
                        question,
                    ));
                }
                PlanOutcome::Paused(reason) => {
                    run.mark_paused();
                    let steps = run.execution_history.len();
                    let step = run.current_step;
                    self.store.save(run).await;
                    emitter.emit(EngineEvent::Paused {
                        step,
                        reason: reason.describe(),
                    });
                    self.guards.release(run_id, &token);
                    return Ok(RunOutcome::with_reason(
                        RunStatus::Paused,
                        steps,
                        reason.describe(),
                    ));
                }
            };

            plan.step_number = run.current_step;
            emitter.emit(EngineEvent::PlanReady {
                step: plan.step_number,
                atom: plan.atom_id.clone(),
                description: plan.description.clone(),
            });

            // 校验
            self.guards
                .update_phase(run_id, &token, GuardPhase::Validating);
            resolve_step_inputs(&run.alias_registry, &mut plan);
            run.plan_cache.insert(plan.step_number, plan.clone());

            // 重复步骤检测：atom + 已解析输入集与上一条完全一致则中止
            match detect_repeat(run.last_record(), &plan) {
                LoopCheck::Repeat => {
                    let reason = EngineError::LoopDetected(format!(
                        "step {} repeats atom '{}' with identical inputs",
                        plan.step_number, plan.atom_id
                    ))
                    .to_string();
                    let steps = run.execution_history.len();
                    self.store.save(run).await;
                    emitter.emit(EngineEvent::Aborted {
                        reason: reason.clone(),
                    });
                    self.guards.release(run_id, &token);
                    self.store.destroy(run_id).await;
                    return Ok(RunOutcome::with_reason(
                        RunStatus::AbortedLoop,
                        steps,
                        reason,
                    ));
                }
                LoopCheck::SameAtomDifferentInputs => {
                    tracing::warn!(
                        run_id = run_id,
                        atom = %plan.atom_id,
                        "same atom as previous step with different inputs"
                    );
                }
                LoopCheck::Distinct => {}
            }

            let mut validation = validate_chain(&run, &plan);
            if !validation.ok && validation.issue == Some(ChainIssue::MissingMaterialized) {
                emitter.emit(EngineEvent::ValidationFailed {
                    step: plan.step_number,
                    reason: validation.reason.clone().unwrap_or_default(),
                });
                // 仅「输出未物化」触发回放：每次出现回放一次，随后重验
                let failed_step = run
                    .last_record()
                    .map(|r| r.step_number)
                    .unwrap_or(plan.step_number.saturating_sub(1));
                match self.replay.replay(&mut run, failed_step, &emitter).await {
                    Ok(ReplayOutcome::Recovered { .. }) => {
                        resolve_step_inputs(&run.alias_registry, &mut plan);
                        run.plan_cache.insert(plan.step_number, plan.clone());
                        validation = validate_chain(&run, &plan);
                    }
                    Ok(ReplayOutcome::BudgetExhausted) => {
                        let reason = format!(
                            "{} (recovering step {failed_step})",
                            EngineError::ReplayBudgetExhausted(self.replay.budget())
                        );
                        let steps = run.execution_history.len();
                        self.store.save(run).await;
                        emitter.emit(EngineEvent::RetryRequired {
                            reason: reason.clone(),
                        });
                        self.guards.release(run_id, &token);
                        self.store.destroy(run_id).await;
                        return Ok(RunOutcome::with_reason(
                            RunStatus::RetryRequired,
                            steps,
                            reason,
                        ));
                    }
                    Err(e) => {
                        emitter.emit(EngineEvent::Error {
                            text: e.to_string(),
                        });
                    }
                }
            }
            if !validation.ok {
                // 其余校验失败：阻断执行，交还规划重新出计划
                // （未物化一类已在回放前上报过，不重复发）
                if validation.issue != Some(ChainIssue::MissingMaterialized) {
                    emitter.emit(EngineEvent::ValidationFailed {
                        step: plan.step_number,
                        reason: validation.reason.clone().unwrap_or_default(),
                    });
                }
                self.store.save(run).await;
                self.guards.release(run_id, &token);
                continue;
            }

            // 执行
            self.guards
                .update_phase(run_id, &token, GuardPhase::Executing);
            emitter.emit(EngineEvent::Executing {
                step: plan.step_number,
                atom: plan.atom_id.clone(),
            });
            let result = match self.executor.execute_with_retry(&plan, &emitter).await {
                Ok(result) => result,
                Err(e) => {
                    // 硬失败重试耗尽：上报错误事件与终态后向上抛出
                    emitter.emit(EngineEvent::Error {
                        text: e.to_string(),
                    });
                    emitter.emit(EngineEvent::Aborted {
                        reason: e.to_string(),
                    });
                    self.store.save(run).await;
                    self.guards.release(run_id, &token);
                    self.store.destroy(run_id).await;
                    return Err(e);
                }
            };
            emitter.emit(EngineEvent::Executed {
                step: plan.step_number,
                atom: plan.atom_id.clone(),
                success: result.success,
            });

            // 取消在执行期间到达：在途结果丢弃
            if cancel.is_cancelled() {
                self.guards.release(run_id, &token);
                return self.finish_stopped(run_id, &emitter).await;
            }

            // 评估
            self.guards
                .update_phase(run_id, &token, GuardPhase::Evaluating);
            emitter.emit(EngineEvent::Evaluating {
                step: plan.step_number,
            });
            let evaluation = self
                .evaluator
                .evaluate(&result, &plan, &run.execution_history)
                .await;
            self.guards
                .update_phase(run_id, &token, GuardPhase::DecisionReady);
            emitter.emit(EngineEvent::DecisionReady {
                step: plan.step_number,
                decision: format!("{:?}", evaluation.decision),
                reasoning: evaluation.reasoning.clone(),
            });

            // 决策
            match evaluation.decision {
                Decision::Complete => {
                    match self
                        .record_step(&mut run, &plan, result, evaluation.clone(), &emitter)
                        .await
                    {
                        Ok(RecordOutcome::Recorded) => {}
                        Ok(RecordOutcome::MaterializeTimeout) => {
                            return self.pause_on_timeout(run, &token, &emitter).await;
                        }
                        Err(e) => {
                            self.guards.release(run_id, &token);
                            self.store.destroy(run_id).await;
                            return Err(e);
                        }
                    }
                    if self.planner.terminal_pending(&run) {
                        // 终结操作未跑过：不置 goal_achieved，转为强制步骤
                        tracing::info!(
                            run_id = run_id,
                            "complete decision intercepted: terminal operation pending"
                        );
                        run.current_step += 1;
                        run.retry_count = 0;
                        force_terminal = true;
                        self.store.save(run).await;
                        self.guards.release(run_id, &token);
                        continue;
                    }
                    run.goal_achieved = true;
                    let steps = run.execution_history.len();
                    self.store.save(run).await;
                    emitter.emit(EngineEvent::Completed { steps });
                    self.guards.release(run_id, &token);
                    self.store.destroy(run_id).await;
                    return Ok(RunOutcome::new(RunStatus::Completed, steps));
                }
                Decision::RetryWithCorrection => {
                    // 原地重试：不追加历史，复用当前步号
                    run.retry_count += 1;
                    if run.retry_count > self.engine_cfg.max_retries_per_step {
                        emitter.emit(EngineEvent::RetryEscalated {
                            step: plan.step_number,
                            retries: run.retry_count,
                        });
                        run.retry_count = 0;
                        corrected_prompt = None;
                    } else {
                        corrected_prompt = evaluation.corrected_prompt.clone();
                    }
                    self.store.save(run).await;
                    self.guards.release(run_id, &token);
                    continue;
                }
                Decision::ChangeApproach => {
                    run.retry_count = 0;
                    corrected_prompt = None;
                    self.store.save(run).await;
                    self.guards.release(run_id, &token);
                    continue;
                }
                Decision::Continue => {
                    match self
                        .record_step(&mut run, &plan, result, evaluation, &emitter)
                        .await
                    {
                        Ok(RecordOutcome::Recorded) => {}
                        Ok(RecordOutcome::MaterializeTimeout) => {
                            return self.pause_on_timeout(run, &token, &emitter).await;
                        }
                        Err(e) => {
                            self.guards.release(run_id, &token);
                            self.store.destroy(run_id).await;
                            return Err(e);
                        }
                    }
                    run.retry_count = 0;
                    run.current_step += 1;
                    self.store.save(run).await;
                    self.guards.release(run_id, &token);
                }
            }
        }
    }

    /// 落一条历史记录；成功结果先物化（别名随后才可解析），物化受决策超时约束
    async fn record_step(
        &self,
        run: &mut WorkflowRun,
        plan: &StepPlan,
        result: crate::state::ExecutionResult,
        evaluation: crate::state::Evaluation,
        emitter: &EventEmitter,
    ) -> Result<RecordOutcome, EngineError> {
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

        if record.result.success {
            let decision_timeout = Duration::from_secs(self.engine_cfg.decision_timeout_secs);
            match timeout(
                decision_timeout,
                self.materializer.materialize(run, &mut record),
            )
            .await
            {
                Ok(Ok(path)) => {
                    emitter.emit(EngineEvent::Materialized {
                        step: record.step_number,
                        alias: record.output_alias.clone(),
                        path,
                    });
                }
                Ok(Err(e)) => {
                    emitter.emit(EngineEvent::Error {
                        text: e.to_string(),
                    });
                    emitter.emit(EngineEvent::Aborted {
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
                Err(_) => return Ok(RecordOutcome::MaterializeTimeout),
            }
        }

        run.push_record(record);
        Ok(RecordOutcome::Recorded)
    }

    /// 物化超时：转入可恢复暂停
    async fn pause_on_timeout(
        &self,
        mut run: WorkflowRun,
        token: &crate::core::GuardToken,
        emitter: &EventEmitter,
    ) -> Result<RunOutcome, EngineError> {
        let run_id = run.run_id.clone();
        run.mark_paused();
        let steps = run.execution_history.len();
        let step = run.current_step;
        self.store.save(run).await;
        emitter.emit(EngineEvent::Paused {
            step,
            reason: "materialization timed out".to_string(),
        });
        self.guards.release(&run_id, token);
        Ok(RunOutcome::with_reason(
            RunStatus::Paused,
            steps,
            "materialization timed out",
        ))
    }

    /// 用户取消：干净收尾，清标志并销毁状态
    async fn finish_stopped(
        &self,
        run_id: &str,
        emitter: &EventEmitter,
    ) -> Result<RunOutcome, EngineError> {
        let steps = self
            .store
            .get(run_id)
            .await
            .map(|r| r.execution_history.len())
            .unwrap_or(0);
        emitter.emit(EngineEvent::Stopped);
        self.store.reset_cancel(run_id).await;
        self.store.purge(run_id).await;
        Ok(RunOutcome::with_reason(
            RunStatus::Stopped,
            steps,
            "stopped by user",
        ))
    }
}
