//! HTTP 任务调用端
//!
//! 把 invoke 转为对任务服务端点的 POST {atom_id, parameters}；
//! 响应体按 ExecutionResult 的 JSON 形状解析。传输层错误一律作硬失败上抛。

use async_trait::async_trait;
use reqwest::Client;

use crate::exec::invoker::TaskInvoker;
use crate::state::ExecutionResult;

/// HTTP 调用端：持有连接池化的 Client 与服务端点
pub struct HttpInvoker {
    client: Client,
    endpoint: String,
}

impl HttpInvoker {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TaskInvoker for HttpInvoker {
    async fn invoke(
        &self,
        atom_id: &str,
        parameters: &serde_json::Value,
    ) -> Result<ExecutionResult, String> {
        let body = serde_json::json!({
            "atom_id": atom_id,
            "parameters": parameters,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.json::<ExecutionResult>()
            .await
            .map_err(|e| format!("Decode response: {e}"))
    }
}
