//! 引擎构建器：统一的依赖注入与组件装配
//!
//! 预言机/任务调用端/持久化协作方/事件落地端均以 trait 对象注入；
//! 未显式给出的部分按配置取默认（endpoint -> HttpInvoker，workspace_root -> 文件系统工件存储）。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{EngineError, GuardStore};
use crate::engine::loop_::Engine;
use crate::events::{EventSink, NullSink};
use crate::exec::{HttpInvoker, StepExecutor, TaskInvoker};
use crate::materialize::{
    ArtifactStore, FsArtifactStore, Materializer, MemoryArtifactStore, ReplayRecovery,
};
use crate::oracle::{EvaluationOracle, EvaluatorAdapter, PlannerAdapter, PlanningOracle};
use crate::state::RunStateStore;

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    planning_oracle: Arc<dyn PlanningOracle>,
    evaluation_oracle: Arc<dyn EvaluationOracle>,
    invoker: Option<Arc<dyn TaskInvoker>>,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    pub fn new(
        config: AppConfig,
        planning_oracle: Arc<dyn PlanningOracle>,
        evaluation_oracle: Arc<dyn EvaluationOracle>,
    ) -> Self {
        Self {
            config,
            planning_oracle,
            evaluation_oracle,
            invoker: None,
            artifact_store: None,
            sink: None,
        }
    }

    /// 注入任务调用端；缺省时按 [executor].endpoint 构造 HttpInvoker
    pub fn with_invoker(mut self, invoker: Arc<dyn TaskInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// 注入持久化协作方；缺省时按 [app].workspace_root 选文件系统或内存存储
    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    /// 注入事件落地端；缺省丢弃所有事件
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 装配引擎
    pub fn build(self) -> Result<Engine, EngineError> {
        let cfg = self.config;

        let invoker: Arc<dyn TaskInvoker> = match self.invoker {
            Some(invoker) => invoker,
            None => match &cfg.executor.endpoint {
                Some(endpoint) => Arc::new(HttpInvoker::new(
                    endpoint.clone(),
                    cfg.executor.invoke_timeout_secs,
                )),
                None => {
                    return Err(EngineError::ConfigError(
                        "no task invoker: inject one or set [executor].endpoint".to_string(),
                    ))
                }
            },
        };

        let artifact_store: Arc<dyn ArtifactStore> = match self.artifact_store {
            Some(store) => store,
            None => match &cfg.app.workspace_root {
                Some(root) => Arc::new(FsArtifactStore::new(root.clone())),
                None => Arc::new(MemoryArtifactStore),
            },
        };

        let executor = Arc::new(StepExecutor::new(
            invoker,
            cfg.executor.max_attempts,
            Duration::from_millis(cfg.executor.retry_delay_ms),
            Duration::from_secs(cfg.executor.invoke_timeout_secs),
        ));
        let planner = Arc::new(PlannerAdapter::new(
            self.planning_oracle,
            cfg.planner.retry_policy(),
            cfg.engine.terminal_atom.clone(),
        ));
        let evaluator = Arc::new(EvaluatorAdapter::new(
            self.evaluation_oracle,
            cfg.evaluator.retry_policy(),
        ));
        let materializer = Arc::new(Materializer::new(artifact_store));
        let replay = Arc::new(ReplayRecovery::new(
            executor.clone(),
            evaluator.clone(),
            materializer.clone(),
            cfg.replay.budget,
        ));

        Ok(Engine {
            store: Arc::new(RunStateStore::new()),
            guards: Arc::new(GuardStore::new()),
            planner,
            evaluator,
            executor,
            materializer,
            replay,
            sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
            engine_cfg: cfg.engine,
            events_cfg: cfg.events,
        })
    }
}
