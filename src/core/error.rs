//! 引擎错误类型与终态
//!
//! 与编排循环配合：OracleTimeout / OracleMalformed 转为可恢复的暂停，
//! DependencyUnsatisfied 触发 Replay，ExecutorFailure 在重试耗尽后向上抛出。

use thiserror::Error;

/// 引擎运行过程中可能出现的错误（外部预言机、执行器、通道、看门狗等）
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Oracle timeout: {0}")]
    OracleTimeout(String),

    #[error("Oracle returned malformed output: {0}")]
    OracleMalformed(String),

    #[error("Dependency unsatisfied: {0}")]
    DependencyUnsatisfied(String),

    #[error("Executor failure: {0}")]
    ExecutorFailure(String),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Replay budget exhausted after {0} replays")]
    ReplayBudgetExhausted(u32),

    #[error("Complexity limit exceeded: {0} iterations")]
    ComplexityExceeded(u32),

    #[error("Loop detected: {0}")]
    LoopDetected(String),

    #[error("Stall detected")]
    StallDetected,

    #[error("Materialization failed: {0}")]
    MaterializeFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already exists: {0}")]
    RunExists(String),
}

/// 运行终态：每个异常终止路径都有独立状态，便于客户端区分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// 目标达成（含被 Stall 看门狗强制完成的情况）
    Completed,
    /// 已暂停，可通过 resume 继续
    Paused,
    /// 用户取消
    Stopped,
    /// 迭代数超过复杂度上限
    AbortedComplexity,
    /// 连续重复步骤
    AbortedLoop,
    /// Replay 预算耗尽，请求调用方重试
    RetryRequired,
}

/// 运行结果：终态 + 已执行步数 + 人类可读原因
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub steps_executed: usize,
    pub reason: Option<String>,
}

impl RunOutcome {
    pub fn new(status: RunStatus, steps_executed: usize) -> Self {
        Self {
            status,
            steps_executed,
            reason: None,
        }
    }

    pub fn with_reason(status: RunStatus, steps_executed: usize, reason: impl Into<String>) -> Self {
        Self {
            status,
            steps_executed,
            reason: Some(reason.into()),
        }
    }
}
