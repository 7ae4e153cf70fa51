//! 控制面：resume / cancel / find_resumable
//!
//! 暂停的 run 保留在状态存储中；resume 合并澄清信息并清除暂停标志，
//! 随后由调用方再次调用 Engine::run 继续推进（已完成的步骤不重跑）。

use tokio_util::sync::CancellationToken;

use crate::engine::loop_::Engine;
use crate::events::{EngineEvent, EventEmitter};

impl Engine {
    /// 恢复暂停的 run；返回是否成功切回可运行状态。
    ///
    /// clarification_message 与 values 会合并进 clarification_context，
    /// 供下一次规划调用作为上下文。
    pub async fn resume(
        &self,
        run_id: &str,
        clarification_message: Option<&str>,
        values: Option<serde_json::Value>,
    ) -> bool {
        let Some(mut run) = self.store.get(run_id).await else {
            return false;
        };
        if !run.paused {
            return false;
        }

        let mut context_parts: Vec<String> = Vec::new();
        if let Some(question) = &run.clarification_context {
            context_parts.push(question.clone());
        }
        if let Some(message) = clarification_message {
            if !message.trim().is_empty() {
                context_parts.push(message.trim().to_string());
            }
        }
        if let Some(values) = values {
            context_parts.push(values.to_string());
        }
        run.clarification_context = if context_parts.is_empty() {
            None
        } else {
            Some(context_parts.join(" | "))
        };

        run.paused = false;
        run.awaiting_clarification = false;
        run.retry_count = 0;
        let step = run.paused_at_step;
        self.store.save(run).await;
        self.store.reset_cancel(run_id).await;

        let emitter = EventEmitter::new(
            self.sink.clone(),
            self.events_cfg.required,
            self.events_cfg.dedupe,
            self.store
                .cancel_token(run_id)
                .await
                .unwrap_or_else(CancellationToken::new),
        );
        emitter.emit(EngineEvent::Resumed { step });
        tracing::info!(run_id = run_id, step = step, "run resumed");
        true
    }

    /// 置取消标志；循环在下一个检查点干净退出
    pub async fn cancel(&self, run_id: &str) -> bool {
        self.store.cancel(run_id).await
    }

    /// 候选中第一个可恢复（paused）的 run
    pub async fn find_resumable(&self, candidates: &[String]) -> Option<String> {
        self.store.find_resumable(candidates).await
    }
}
