//! 预言机层：规划/评估抽象、回复解析、适配器与脚本化实现

pub mod evaluator;
pub mod mock;
pub mod parse;
pub mod planner;
pub mod traits;

pub use evaluator::EvaluatorAdapter;
pub use mock::{evaluation_reply, plan_reply, ScriptedEvaluator, ScriptedPlanner};
pub use parse::{extract_json_block, parse_evaluation_reply, parse_planner_reply, PlannerReply};
pub use planner::{PlanOutcome, PlannerAdapter, PauseReason};
pub use traits::{EvaluationOracle, PlanRequest, PlanningOracle};
