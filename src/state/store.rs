//! 运行状态存储：每 run 一条内存记录 + 取消令牌
//!
//! 存储本身不做并发写保护——调用方必须先持有守卫（core::guard）再改写历史。
//! destroy 对 paused 的 run 为空操作，以便 resume。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::EngineError;
use crate::state::types::{RunId, WorkflowRun};

struct RunEntry {
    run: WorkflowRun,
    cancel: CancellationToken,
}

/// 运行状态存储
#[derive(Default)]
pub struct RunStateStore {
    runs: RwLock<HashMap<RunId, RunEntry>>,
}

impl RunStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建新 run；run_id 已存在时报错（外部身份不可复用）
    pub async fn create(
        &self,
        run_id: &str,
        goal_prompt: &str,
    ) -> Result<WorkflowRun, EngineError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(run_id) {
            return Err(EngineError::RunExists(run_id.to_string()));
        }
        let run = WorkflowRun::new(run_id, goal_prompt);
        runs.insert(
            run_id.to_string(),
            RunEntry {
                run: run.clone(),
                cancel: CancellationToken::new(),
            },
        );
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> Option<WorkflowRun> {
        self.runs.read().await.get(run_id).map(|e| e.run.clone())
    }

    /// 写回快照；条目已销毁时不复活，仅告警
    pub async fn save(&self, run: WorkflowRun) {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.run_id) {
            Some(entry) => entry.run = run,
            None => {
                tracing::warn!(run_id = %run.run_id, "save on destroyed run ignored");
            }
        }
    }

    /// 销毁条目；paused 的 run 保留以便 resume
    pub async fn destroy(&self, run_id: &str) {
        let mut runs = self.runs.write().await;
        if let Some(entry) = runs.get(run_id) {
            if entry.run.paused {
                tracing::debug!(run_id = run_id, "destroy skipped: run is paused");
                return;
            }
        }
        runs.remove(run_id);
    }

    /// 无条件销毁（显式取消路径）
    pub async fn purge(&self, run_id: &str) {
        self.runs.write().await.remove(run_id);
    }

    /// 获取 run 的取消令牌
    pub async fn cancel_token(&self, run_id: &str) -> Option<CancellationToken> {
        self.runs.read().await.get(run_id).map(|e| e.cancel.clone())
    }

    /// 置取消标志；run 不存在时返回 false
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.runs.read().await.get(run_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 观察到取消并退出后换新令牌（标志随之清除）
    pub async fn reset_cancel(&self, run_id: &str) {
        if let Some(entry) = self.runs.write().await.get_mut(run_id) {
            entry.cancel = CancellationToken::new();
        }
    }

    /// 候选中第一个可恢复（paused）的 run
    pub async fn find_resumable(&self, candidates: &[String]) -> Option<RunId> {
        let runs = self.runs.read().await;
        candidates
            .iter()
            .find(|id| runs.get(*id).map(|e| e.run.paused).unwrap_or(false))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

/// 共享句柄
pub type SharedRunStateStore = Arc<RunStateStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_save_destroy() {
        let store = RunStateStore::new();
        let mut run = store.create("run-1", "merge A and B").await.unwrap();
        assert!(store.create("run-1", "again").await.is_err());

        run.current_step = 3;
        store.save(run).await;
        assert_eq!(store.get("run-1").await.unwrap().current_step, 3);

        store.destroy("run-1").await;
        assert!(store.get("run-1").await.is_none());
    }

    #[tokio::test]
    async fn test_destroy_noop_when_paused() {
        let store = RunStateStore::new();
        let mut run = store.create("run-1", "goal").await.unwrap();
        run.mark_paused();
        store.save(run).await;

        store.destroy("run-1").await;
        assert!(store.get("run-1").await.is_some());

        store.purge("run-1").await;
        assert!(store.get("run-1").await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_flag_and_reset() {
        let store = RunStateStore::new();
        store.create("run-1", "goal").await.unwrap();
        let token = store.cancel_token("run-1").await.unwrap();
        assert!(!token.is_cancelled());
        assert!(store.cancel("run-1").await);
        assert!(token.is_cancelled());

        store.reset_cancel("run-1").await;
        let fresh = store.cancel_token("run-1").await.unwrap();
        assert!(!fresh.is_cancelled());
        assert!(!store.cancel("missing").await);
    }

    #[tokio::test]
    async fn test_find_resumable() {
        let store = RunStateStore::new();
        store.create("a", "goal").await.unwrap();
        let mut b = store.create("b", "goal").await.unwrap();
        b.mark_paused();
        store.save(b).await;

        let found = store
            .find_resumable(&["missing".into(), "a".into(), "b".into()])
            .await;
        assert_eq!(found.as_deref(), Some("b"));
    }
}
