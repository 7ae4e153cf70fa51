//! 编排过程事件：用于流式推送运行进度、重试、暂停与终态

use serde::Serialize;

/// 单次运行的过程事件（可序列化为 JSON 供前端/客户端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// 运行开始
    RunStarted { run_id: String, goal: String },
    /// 迭代进度（当前步号 / 迭代数 / 上限）
    IterationUpdate {
        step: u32,
        iteration: u32,
        max_iterations: u32,
    },
    /// 正在调用规划预言机
    Planning { step: u32 },
    /// 计划就绪
    PlanReady {
        step: u32,
        atom: String,
        description: String,
    },
    /// 执行前校验失败（阻断并重新规划）
    ValidationFailed { step: u32, reason: String },
    /// 回放缺失工件的前序步骤
    Replay {
        step: u32,
        replays_used: u32,
        budget: u32,
    },
    /// 调用任务执行器
    Executing { step: u32, atom: String },
    /// 软失败后的重试通知（含截断的失败原因）
    ExecutorRetry {
        step: u32,
        atom: String,
        attempt: u32,
        reason: String,
    },
    /// 执行结束（结果预览）
    Executed {
        step: u32,
        atom: String,
        success: bool,
    },
    /// 正在调用评估预言机
    Evaluating { step: u32 },
    /// 决策就绪
    DecisionReady {
        step: u32,
        decision: String,
        reasoning: String,
    },
    /// 工件已物化并注册别名
    Materialized {
        step: u32,
        alias: Option<String>,
        path: String,
    },
    /// 重试升级为更换方案
    RetryEscalated { step: u32, retries: u32 },
    /// 停滞判定（强制完成前发出）
    Stalled { attempts: u32 },
    /// 运行暂停（可 resume）
    Paused { step: u32, reason: String },
    /// 运行恢复
    Resumed { step: u32 },
    /// 正常完成
    Completed { steps: usize },
    /// 异常中止（复杂度超限 / 循环 / 执行器失败）
    Aborted { reason: String },
    /// 用户取消
    Stopped,
    /// Replay 预算耗尽，请调用方重试
    RetryRequired { reason: String },
    /// 错误
    Error { text: String },
}
