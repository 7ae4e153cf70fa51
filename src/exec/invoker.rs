//! 任务调用抽象
//!
//! 外部任务服务实现 TaskInvoker；atom_id 对引擎不透明，
//! 不认识的标识符由调用方（任务服务）负责报错。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::state::ExecutionResult;

/// 任务调用端：对指定操作类型发起一次调用
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    /// Err 表示硬失败（网络/协议层）；Ok(success=false) 表示软失败
    async fn invoke(
        &self,
        atom_id: &str,
        parameters: &serde_json::Value,
    ) -> Result<ExecutionResult, String>;
}

/// 脚本化调用端（测试/演示用）：依次弹出预置结果；最后一条不弹出、反复返回
pub struct ScriptedInvoker {
    results: Mutex<VecDeque<Result<ExecutionResult, String>>>,
    calls: AtomicU32,
}

impl ScriptedInvoker {
    pub fn new(results: Vec<Result<ExecutionResult, String>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// 所有调用都返回同一结果
    pub fn always(result: ExecutionResult) -> Self {
        Self::new(vec![Ok(result)])
    }

    /// 所有调用都硬失败
    pub fn always_err(error: &str) -> Self {
        Self::new(vec![Err(error.to_string())])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        atom_id: &str,
        _parameters: &serde_json::Value,
    ) -> Result<ExecutionResult, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        if results.len() > 1 {
            return results.pop_front().unwrap_or_else(|| Ok(ExecutionResult::ok()));
        }
        results.front().cloned().unwrap_or_else(|| {
            Ok(ExecutionResult::ok().with_payload("atom", serde_json::json!(atom_id)))
        })
    }
}
