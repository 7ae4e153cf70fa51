//! 物化层：把步骤输出交给持久化协作方，注册别名并登记可用工件
//!
//! 协作方给不出路径时返回类型化错误——调用方不得带着幽灵别名继续。

pub mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::EngineError;
use crate::state::{ExecutionResult, StepRecord, WorkflowRun};

pub use replay::{ReplayOutcome, ReplayRecovery};

/// 持久化协作方：把一次执行输出变成持久工件，返回其路径
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(
        &self,
        run_id: &str,
        step_number: u32,
        result: &ExecutionResult,
    ) -> Result<String, String>;
}

/// 内存工件存储（测试/演示用）：返回合成路径
#[derive(Debug, Default)]
pub struct MemoryArtifactStore;

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn save(
        &self,
        run_id: &str,
        step_number: u32,
        _result: &ExecutionResult,
    ) -> Result<String, String> {
        Ok(format!("mem://{run_id}/step_{step_number}.json"))
    }
}

/// 文件系统工件存储：payload 以 JSON 落盘到 root/run_id/step_N.json
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(
        &self,
        run_id: &str,
        step_number: u32,
        result: &ExecutionResult,
    ) -> Result<String, String> {
        let dir = self.root.join(run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("create artifact dir: {e}"))?;
        let path = dir.join(format!("step_{step_number}.json"));
        let body = serde_json::to_vec_pretty(&result.payload)
            .map_err(|e| format!("encode payload: {e}"))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| format!("write artifact: {e}"))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// 物化器：save -> 注册别名 -> 登记可用工件，一次完成
pub struct Materializer {
    store: Arc<dyn ArtifactStore>,
}

impl Materializer {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// 物化一条记录的输出；成功后别名立即可解析、工件立即可用
    pub async fn materialize(
        &self,
        run: &mut WorkflowRun,
        record: &mut StepRecord,
    ) -> Result<String, EngineError> {
        let path = self
            .store
            .save(&run.run_id, record.step_number, &record.result)
            .await
            .map_err(EngineError::MaterializeFailed)?;

        if let Some(alias) = &record.output_alias {
            run.alias_registry.register(alias, &path);
        }
        if !run.available_artifacts.iter().any(|a| a == &path) {
            run.available_artifacts.push(path.clone());
        }
        record.artifact_path = Some(path.clone());
        tracing::debug!(
            run_id = %run.run_id,
            step = record.step_number,
            path = %path,
            "artifact materialized"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Evaluation;

    fn record(step: u32, alias: Option<&str>) -> StepRecord {
        let result = ExecutionResult::ok();
        StepRecord {
            step_number: step,
            atom_id: "merge".to_string(),
            input_refs_used: vec![],
            description: String::new(),
            output_alias: alias.map(|s| s.to_string()),
            artifact_path: None,
            result: result.clone(),
            evaluation: Evaluation::fallback_from(&result),
            recorded_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_materialize_registers_alias_and_artifact() {
        let materializer = Materializer::new(Arc::new(MemoryArtifactStore));
        let mut run = WorkflowRun::new("r1", "goal");
        let mut rec = record(1, Some("m1"));
        let path = materializer.materialize(&mut run, &mut rec).await.unwrap();

        assert_eq!(rec.artifact_path.as_deref(), Some(path.as_str()));
        assert_eq!(run.alias_registry.resolve("m1"), path);
        assert_eq!(run.available_artifacts, vec![path]);
    }

    #[tokio::test]
    async fn test_materialize_without_alias() {
        let materializer = Materializer::new(Arc::new(MemoryArtifactStore));
        let mut run = WorkflowRun::new("r1", "goal");
        let mut rec = record(2, None);
        materializer.materialize(&mut run, &mut rec).await.unwrap();
        assert!(run.alias_registry.is_empty());
        assert_eq!(run.available_artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_materialize_failure_is_typed() {
        struct BrokenStore;
        #[async_trait]
        impl ArtifactStore for BrokenStore {
            async fn save(
                &self,
                _run_id: &str,
                _step_number: u32,
                _result: &ExecutionResult,
            ) -> Result<String, String> {
                Err("disk full".to_string())
            }
        }
        let materializer = Materializer::new(Arc::new(BrokenStore));
        let mut run = WorkflowRun::new("r1", "goal");
        let mut rec = record(1, Some("m1"));
        let err = materializer
            .materialize(&mut run, &mut rec)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MaterializeFailed(_)));
        // 失败后不得留下幽灵别名或工件
        assert!(run.alias_registry.is_empty());
        assert!(run.available_artifacts.is_empty());
        assert!(rec.artifact_path.is_none());
    }

    #[tokio::test]
    async fn test_fs_store_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let result = ExecutionResult::ok().with_payload("rows", serde_json::json!(3));
        let path = store.save("run-1", 1, &result).await.unwrap();
        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(body.contains("rows"));
    }
}
