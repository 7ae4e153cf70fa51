//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WEAVER__*` 覆盖（双下划线表示嵌套，
//! 如 `WEAVER__ENGINE__MAX_ITERATIONS=50`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub engine: EngineSection,
    pub planner: PlannerSection,
    pub evaluator: EvaluatorSection,
    pub executor: ExecutorSection,
    pub replay: ReplaySection,
    pub events: EventsSection,
}

/// [app] 段：应用名与工件落盘根目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 文件系统工件存储根目录，未设置时用 ./artifacts
    pub workspace_root: Option<PathBuf>,
}

/// [engine] 段：循环上限、停滞阈值、守卫退避、强制终结操作策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 单 run 迭代数硬上限，超限中止（aborted_complexity）
    pub max_iterations: u32,
    /// 历史连续不增长多少轮判停滞
    pub stall_threshold: u32,
    /// 单步 retry_with_correction 上限，超过则升级为 change_approach
    pub max_retries_per_step: u32,
    /// 守卫忙时的退避间隔（毫秒）
    pub guard_backoff_ms: u64,
    /// 决策处理（物化）超时（秒）
    pub decision_timeout_secs: u64,
    /// 强制终结操作：设置后 run 必须至少执行过一次该操作才能完成
    pub terminal_atom: Option<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            stall_threshold: 3,
            max_retries_per_step: 3,
            guard_backoff_ms: 200,
            decision_timeout_secs: 10,
            terminal_atom: None,
        }
    }
}

/// [planner] 段：规划预言机重试与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub retry_delay_ms: u64,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_secs: 90,
            retry_delay_ms: 500,
        }
    }
}

impl PlannerSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.timeout_secs),
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// [evaluator] 段：评估预言机重试与超时（预算比规划短）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorSection {
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub retry_delay_ms: u64,
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            timeout_secs: 120,
            retry_delay_ms: 500,
        }
    }
}

impl EvaluatorSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.timeout_secs),
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// [executor] 段：任务调用重试、退避与单次超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub invoke_timeout_secs: u64,
    /// HTTP 任务服务端点；未设置时需注入进程内调用端
    pub endpoint: Option<String>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            invoke_timeout_secs: 120,
            endpoint: None,
        }
    }
}

/// [replay] 段：回放预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplaySection {
    pub budget: u32,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self { budget: 7 }
    }
}

/// [events] 段：事件通道是否为运行存活所必需、是否去重
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// true 时通道关闭转为该 run 的取消信号
    pub required: bool,
    pub dedupe: bool,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            required: false,
            dedupe: true,
        }
    }
}

/// 从 config 目录加载配置，环境变量 WEAVER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WEAVER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WEAVER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_iterations, 30);
        assert_eq!(cfg.engine.stall_threshold, 3);
        assert_eq!(cfg.planner.max_attempts, 3);
        assert_eq!(cfg.evaluator.max_attempts, 2);
        assert_eq!(cfg.replay.budget, 7);
        assert!(cfg.engine.terminal_atom.is_none());
        assert!(!cfg.events.required);
    }

    #[test]
    fn test_retry_policies_from_sections() {
        let cfg = AppConfig::default();
        let p = cfg.planner.retry_policy();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.attempt_timeout, Duration::from_secs(90));
        let e = cfg.evaluator.retry_policy();
        assert_eq!(e.max_attempts, 2);
        assert_eq!(e.attempt_timeout, Duration::from_secs(120));
    }
}
