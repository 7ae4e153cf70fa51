//! 单飞守卫：每个 run 同一时刻至多一个活动令牌
//!
//! acquire 返回 Busy 时调用方退避重试而非并发推进；release 幂等，
//! 令牌不匹配时为空操作（防止重试后旧令牌误释放新持有者）。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state::RunId;

/// 守卫阶段：标记当前 run 推进到循环的哪一环
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Planning,
    Validating,
    Executing,
    Evaluating,
    DecisionReady,
    PausedClarification,
}

/// 守卫令牌：token 值 + 步号 + 阶段 + 最近更新时间
#[derive(Debug, Clone)]
pub struct GuardToken {
    pub token: String,
    pub step_number: u32,
    pub phase: GuardPhase,
    pub updated_at: DateTime<Utc>,
}

/// acquire 的结果
#[derive(Debug)]
pub enum GuardAcquire {
    Acquired(GuardToken),
    /// 已有活动令牌，调用方应退避后重试
    Busy,
}

/// 守卫存储：run_id -> 活动令牌（至多一个）
#[derive(Debug, Default)]
pub struct GuardStore {
    live: Mutex<HashMap<RunId, GuardToken>>,
}

impl GuardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试获取守卫；已有活动令牌时返回 Busy
    pub fn acquire(&self, run_id: &str, step_number: u32) -> GuardAcquire {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.contains_key(run_id) {
            return GuardAcquire::Busy;
        }
        let token = GuardToken {
            token: Uuid::new_v4().to_string(),
            step_number,
            phase: GuardPhase::Planning,
            updated_at: Utc::now(),
        };
        live.insert(run_id.to_string(), token.clone());
        GuardAcquire::Acquired(token)
    }

    /// 带退避的获取：Busy 时 sleep 后重试；取消时返回 None
    pub async fn acquire_with_backoff(
        &self,
        run_id: &str,
        step_number: u32,
        backoff: Duration,
        cancel: &CancellationToken,
    ) -> Option<GuardToken> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.acquire(run_id, step_number) {
                GuardAcquire::Acquired(token) => return Some(token),
                GuardAcquire::Busy => {
                    tracing::debug!(run_id = run_id, "guard busy, backing off");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// 更新活动令牌阶段；令牌不匹配时返回 false
    pub fn update_phase(&self, run_id: &str, token: &GuardToken, phase: GuardPhase) -> bool {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        match live.get_mut(run_id) {
            Some(current) if current.token == token.token => {
                current.phase = phase;
                current.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// 释放守卫：幂等；令牌与当前活动令牌不一致时为空操作
    pub fn release(&self, run_id: &str, token: &GuardToken) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = live.get(run_id) {
            if current.token == token.token {
                live.remove(run_id);
            }
        }
    }

    /// 查询当前活动令牌（观测用）
    pub fn current(&self, run_id: &str) -> Option<GuardToken> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let store = GuardStore::new();
        let first = match store.acquire("run-1", 1) {
            GuardAcquire::Acquired(t) => t,
            GuardAcquire::Busy => panic!("Expected Acquired"),
        };
        assert!(matches!(store.acquire("run-1", 1), GuardAcquire::Busy));
        // 不同 run 互不阻塞
        assert!(matches!(
            store.acquire("run-2", 1),
            GuardAcquire::Acquired(_)
        ));
        store.release("run-1", &first);
        assert!(matches!(
            store.acquire("run-1", 2),
            GuardAcquire::Acquired(_)
        ));
    }

    #[test]
    fn test_stale_release_is_noop() {
        let store = GuardStore::new();
        let stale = match store.acquire("run-1", 1) {
            GuardAcquire::Acquired(t) => t,
            GuardAcquire::Busy => panic!("Expected Acquired"),
        };
        store.release("run-1", &stale);
        // 新一轮重新获取后，旧令牌的 release 不得打断新持有者
        let fresh = match store.acquire("run-1", 2) {
            GuardAcquire::Acquired(t) => t,
            GuardAcquire::Busy => panic!("Expected Acquired"),
        };
        store.release("run-1", &stale);
        assert!(matches!(store.acquire("run-1", 2), GuardAcquire::Busy));
        store.release("run-1", &fresh);
    }

    #[test]
    fn test_release_idempotent() {
        let store = GuardStore::new();
        let token = match store.acquire("run-1", 1) {
            GuardAcquire::Acquired(t) => t,
            GuardAcquire::Busy => panic!("Expected Acquired"),
        };
        store.release("run-1", &token);
        store.release("run-1", &token);
        assert!(store.current("run-1").is_none());
    }

    #[test]
    fn test_update_phase() {
        let store = GuardStore::new();
        let token = match store.acquire("run-1", 1) {
            GuardAcquire::Acquired(t) => t,
            GuardAcquire::Busy => panic!("Expected Acquired"),
        };
        assert!(store.update_phase("run-1", &token, GuardPhase::Executing));
        assert_eq!(
            store.current("run-1").unwrap().phase,
            GuardPhase::Executing
        );
        store.release("run-1", &token);
        assert!(!store.update_phase("run-1", &token, GuardPhase::Evaluating));
    }

    #[tokio::test]
    async fn test_acquire_with_backoff_respects_cancel() {
        let store = GuardStore::new();
        let _held = store.acquire("run-1", 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let got = store
            .acquire_with_backoff("run-1", 1, Duration::from_millis(5), &cancel)
            .await;
        assert!(got.is_none());
    }
}
