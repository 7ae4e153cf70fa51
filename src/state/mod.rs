//! 状态层：运行记录、别名注册表、依赖解析、状态存储

pub mod alias;
pub mod resolver;
pub mod store;
pub mod types;

pub use alias::{normalize_alias, AliasRegistry};
pub use resolver::{
    extract_record_count, resolve_step_inputs, validate_chain, ChainIssue, ChainValidation,
};
pub use store::{RunStateStore, SharedRunStateStore};
pub use types::{
    AtomId, Decision, Evaluation, ExecutionResult, RunId, StepPlan, StepRecord, WorkflowRun,
};
