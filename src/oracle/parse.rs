//! 预言机回复解析
//!
//! 从文本中提取 JSON 块（```json 围栏或花括号跨度），解析为步骤计划、
//! goal_achieved 信号、澄清请求或评估结果。缺失必填字段视为 malformed。

use serde::Deserialize;

use crate::state::{Decision, Evaluation, StepPlan};

/// 规划回复的三种形态
#[derive(Debug, Clone)]
pub enum PlannerReply {
    Plan(StepPlan),
    GoalAchieved,
    NeedsClarification(String),
}

/// 提取文本中的 JSON 块：优先 ```json 围栏，否则取首个 '{' 到末个 '}' 的跨度
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(
            rest.find("```")
                .map(|end| rest[..end].trim())
                .unwrap_or(rest.trim()),
        );
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&trimmed[start..=end])
}

#[derive(Debug, Deserialize)]
struct RawPlannerReply {
    #[serde(default)]
    goal_achieved: Option<bool>,
    #[serde(default)]
    clarification: Option<String>,
    #[serde(default)]
    step_number: Option<u32>,
    #[serde(default)]
    atom_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_refs: Option<Vec<String>>,
    #[serde(default)]
    output_alias: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// 解析规划回复；step_number 缺省时采用引擎给定的当前步号
pub fn parse_planner_reply(raw: &str, current_step: u32) -> Result<PlannerReply, String> {
    let json = extract_json_block(raw).ok_or_else(|| format!("no JSON block in reply: {raw}"))?;
    let parsed: RawPlannerReply =
        serde_json::from_str(json).map_err(|e| format!("{e}: {json}"))?;

    if parsed.goal_achieved == Some(true) {
        return Ok(PlannerReply::GoalAchieved);
    }
    if let Some(question) = parsed.clarification {
        if !question.trim().is_empty() {
            return Ok(PlannerReply::NeedsClarification(question));
        }
    }

    let atom_id = parsed
        .atom_id
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| format!("missing required field 'atom_id': {json}"))?;

    Ok(PlannerReply::Plan(StepPlan {
        step_number: parsed.step_number.unwrap_or(current_step),
        atom_id,
        description: parsed.description.unwrap_or_default(),
        input_refs: parsed.input_refs.unwrap_or_default(),
        output_alias: parsed.output_alias,
        prompt: parsed.prompt.unwrap_or_default(),
    }))
}

#[derive(Debug, Deserialize)]
struct RawEvaluation {
    decision: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    correctness: Option<bool>,
    #[serde(default)]
    issues: Option<Vec<String>>,
    #[serde(default)]
    corrected_prompt: Option<String>,
    #[serde(default)]
    alternative_approach: Option<String>,
}

/// 解析评估回复；未知 decision 视为 malformed（由重试/兜底处理）
pub fn parse_evaluation_reply(raw: &str) -> Result<Evaluation, String> {
    let json = extract_json_block(raw).ok_or_else(|| format!("no JSON block in reply: {raw}"))?;
    let parsed: RawEvaluation =
        serde_json::from_str(json).map_err(|e| format!("{e}: {json}"))?;

    let decision = match parsed.decision.as_deref() {
        Some("continue") => Decision::Continue,
        Some("retry_with_correction") => Decision::RetryWithCorrection,
        Some("change_approach") => Decision::ChangeApproach,
        Some("complete") => Decision::Complete,
        other => return Err(format!("unknown decision {other:?}: {json}")),
    };

    Ok(Evaluation {
        decision,
        reasoning: parsed.reasoning.unwrap_or_default(),
        correctness: parsed.correctness.unwrap_or(decision != Decision::RetryWithCorrection),
        issues: parsed.issues.unwrap_or_default(),
        corrected_prompt: parsed.corrected_prompt,
        alternative_approach: parsed.alternative_approach,
    })
}
