//! 依赖解析与链式校验
//!
//! 在每次执行前运行 validate_chain，阻止把上一步的失败/空结果/幽灵工件
//! 级联进下游步骤。只有「上一步输出未物化」这一种失败可触发 Replay。

use regex::Regex;
use std::sync::OnceLock;

use crate::state::alias::{normalize_alias, AliasRegistry};
use crate::state::types::{ExecutionResult, StepPlan, WorkflowRun};

/// 规划中常见的「使用上一步输出」占位令牌
const PREVIOUS_OUTPUT_PLACEHOLDERS: &[&str] = &[
    "use-previous-output",
    "previous_output",
    "previous-output",
    "prev_output",
    "last_output",
];

/// 校验失败类别；MissingMaterialized 是唯一可触发 Replay 的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainIssue {
    PrevStepFailed,
    MissingMaterialized,
    ArtifactUnavailable,
    EmptyResult,
}

/// 链式校验结果
#[derive(Debug, Clone)]
pub struct ChainValidation {
    pub ok: bool,
    pub reason: Option<String>,
    pub issue: Option<ChainIssue>,
}

impl ChainValidation {
    fn pass() -> Self {
        Self {
            ok: true,
            reason: None,
            issue: None,
        }
    }

    fn fail(issue: ChainIssue, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            issue: Some(issue),
        }
    }
}

/// 就地把计划的 input_refs 重写为已注册的工件路径；未注册的令牌保持原样
pub fn resolve_step_inputs(registry: &AliasRegistry, plan: &mut StepPlan) {
    for input in plan.input_refs.iter_mut() {
        *input = registry.resolve(input);
    }
}

/// 计划是否引用了上一条记录的输出（别名、工件路径或通用占位符）
fn references_previous_output(run: &WorkflowRun, plan: &StepPlan) -> bool {
    let Some(prev) = run.last_record() else {
        return false;
    };
    for input in &plan.input_refs {
        let normalized = normalize_alias(input);
        if PREVIOUS_OUTPUT_PLACEHOLDERS.contains(&normalized.as_str()) {
            return true;
        }
        if let Some(alias) = &prev.output_alias {
            if input.trim() == alias.trim() || normalized == normalize_alias(alias) {
                return true;
            }
        }
        if let Some(path) = &prev.artifact_path {
            if input == path {
                return true;
            }
        }
    }
    false
}

/// 执行前校验：上一步成败、输出物化、工件可用、结果非空
pub fn validate_chain(run: &WorkflowRun, next_plan: &StepPlan) -> ChainValidation {
    let Some(prev) = run.last_record() else {
        return ChainValidation::pass();
    };

    if !prev.result.success {
        return ChainValidation::fail(
            ChainIssue::PrevStepFailed,
            "previous step failed; re-plan",
        );
    }

    if references_previous_output(run, next_plan) && prev.artifact_path.is_none() {
        return ChainValidation::fail(
            ChainIssue::MissingMaterialized,
            "no materialized output from prior step; cannot chain safely",
        );
    }

    if let Some(path) = &prev.artifact_path {
        if !run.available_artifacts.iter().any(|a| a == path) {
            return ChainValidation::fail(
                ChainIssue::ArtifactUnavailable,
                format!("materialized artifact '{path}' missing from available artifacts"),
            );
        }
    }

    if let Some(count) = extract_record_count(&prev.result) {
        if count <= 0 {
            return ChainValidation::fail(
                ChainIssue::EmptyResult,
                "previous step produced an empty result",
            );
        }
    }

    ChainValidation::pass()
}

fn count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d+)\s*(?:rows?|records?)\b").unwrap())
}

/// 尽力从结果中提取行数/记录数：先查常见数值键，再对字符串值做正则匹配
pub fn extract_record_count(result: &ExecutionResult) -> Option<i64> {
    const COUNT_KEYS: &[&str] = &["row_count", "rows", "record_count", "records", "count"];
    for key in COUNT_KEYS {
        if let Some(value) = result.payload.get(*key) {
            if let Some(n) = value.as_i64() {
                return Some(n);
            }
            if let Some(s) = value.as_str() {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Some(n);
                }
            }
        }
    }
    for value in result.payload.values() {
        if let Some(s) = value.as_str() {
            if let Some(caps) = count_regex().captures(s) {
                if let Ok(n) = caps[1].parse::<i64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{Evaluation, StepRecord};

    fn plan(inputs: &[&str]) -> StepPlan {
        StepPlan {
            step_number: 2,
            atom_id: "chart-maker".to_string(),
            description: String::new(),
            input_refs: inputs.iter().map(|s| s.to_string()).collect(),
            output_alias: None,
            prompt: String::new(),
        }
    }

    fn record(success: bool, artifact: Option<&str>) -> StepRecord {
        let result = if success {
            ExecutionResult::ok()
        } else {
            ExecutionResult::fail("boom")
        };
        StepRecord {
            step_number: 1,
            atom_id: "merge".to_string(),
            input_refs_used: vec!["a.csv".into(), "b.csv".into()],
            description: String::new(),
            output_alias: Some("m1".to_string()),
            artifact_path: artifact.map(|s| s.to_string()),
            result: result.clone(),
            evaluation: Evaluation::fallback_from(&result),
            recorded_at: chrono::Utc::now(),
        }
    }

    fn run_with(record: StepRecord, artifacts: &[&str]) -> WorkflowRun {
        let mut run = WorkflowRun::new("r", "goal");
        if let Some(path) = &record.artifact_path {
            run.alias_registry.register("m1", path);
        }
        run.available_artifacts = artifacts.iter().map(|s| s.to_string()).collect();
        run.execution_history.push(record);
        run
    }

    #[test]
    fn test_resolve_step_inputs_in_place() {
        let mut registry = AliasRegistry::default();
        registry.register("m1", "merged.dat");
        let mut p = plan(&["m1", "raw.csv"]);
        resolve_step_inputs(&registry, &mut p);
        assert_eq!(p.input_refs, vec!["merged.dat", "raw.csv"]);
    }

    #[test]
    fn test_chain_ok_with_materialized_artifact() {
        let run = run_with(record(true, Some("m.dat")), &["m.dat"]);
        let v = validate_chain(&run, &plan(&["m.dat"]));
        assert!(v.ok, "reason: {:?}", v.reason);
    }

    #[test]
    fn test_chain_fails_when_prev_step_failed() {
        let run = run_with(record(false, None), &[]);
        let v = validate_chain(&run, &plan(&["anything"]));
        assert!(!v.ok);
        assert_eq!(v.issue, Some(ChainIssue::PrevStepFailed));
    }

    #[test]
    fn test_chain_fails_on_missing_materialized_output() {
        let run = run_with(record(true, None), &[]);
        let v = validate_chain(&run, &plan(&["m1"]));
        assert!(!v.ok);
        assert_eq!(v.issue, Some(ChainIssue::MissingMaterialized));
        assert!(v.reason.unwrap().contains("no materialized output"));
    }

    #[test]
    fn test_chain_detects_placeholder_reference() {
        let run = run_with(record(true, None), &[]);
        let v = validate_chain(&run, &plan(&["{use-previous-output}"]));
        assert_eq!(v.issue, Some(ChainIssue::MissingMaterialized));
    }

    #[test]
    fn test_chain_fails_when_artifact_absent_from_list() {
        let run = run_with(record(true, Some("m.dat")), &[]);
        let v = validate_chain(&run, &plan(&["m.dat"]));
        assert!(!v.ok);
        assert_eq!(v.issue, Some(ChainIssue::ArtifactUnavailable));
    }

    #[test]
    fn test_chain_fails_on_empty_result() {
        let mut rec = record(true, Some("m.dat"));
        rec.result = ExecutionResult::ok().with_payload("row_count", serde_json::json!(0));
        let run = run_with(rec, &["m.dat"]);
        let v = validate_chain(&run, &plan(&["m.dat"]));
        assert!(!v.ok);
        assert_eq!(v.issue, Some(ChainIssue::EmptyResult));
    }

    #[test]
    fn test_first_step_always_passes() {
        let run = WorkflowRun::new("r", "goal");
        assert!(validate_chain(&run, &plan(&["a.csv"])).ok);
    }

    #[test]
    fn test_extract_record_count_from_keys() {
        let r = ExecutionResult::ok().with_payload("rows", serde_json::json!(42));
        assert_eq!(extract_record_count(&r), Some(42));
        let r = ExecutionResult::ok().with_payload("count", serde_json::json!("7"));
        assert_eq!(extract_record_count(&r), Some(7));
    }

    #[test]
    fn test_extract_record_count_from_text() {
        let r = ExecutionResult::ok()
            .with_payload("summary", serde_json::json!("merged 1280 rows into m.dat"));
        assert_eq!(extract_record_count(&r), Some(1280));
        let r = ExecutionResult::ok().with_payload("summary", serde_json::json!("no counts here"));
        assert_eq!(extract_record_count(&r), None);
    }
}
