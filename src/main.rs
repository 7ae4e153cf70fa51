//! Weaver - Rust 工作流编排引擎
//!
//! 入口：初始化日志、装配脚本化协作方的演示引擎，驱动一次「合并再出图」的
//! 两步工作流，把过程事件打印到终端。

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use weaver::config::load_config;
use weaver::events::ChannelSink;
use weaver::exec::ScriptedInvoker;
use weaver::oracle::{evaluation_reply, plan_reply, ScriptedEvaluator, ScriptedPlanner};
use weaver::state::ExecutionResult;
use weaver::EngineBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    weaver::observability::init();

    let config = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    // 脚本化协作方：步骤 1 合并 A/B 产出别名 m1，步骤 2 引用 m1 出图
    let planner = Arc::new(ScriptedPlanner::new(vec![
        plan_reply("merge", &["a.csv", "b.csv"], Some("m1")),
        plan_reply("chart-maker", &["m1"], Some("chart")),
    ]));
    let evaluator = Arc::new(ScriptedEvaluator::new(vec![
        evaluation_reply("continue", "merge looks correct"),
        evaluation_reply("complete", "chart produced; goal achieved"),
    ]));
    let invoker = Arc::new(ScriptedInvoker::always(
        ExecutionResult::ok().with_payload("rows", serde_json::json!(128)),
    ));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = EngineBuilder::new(config, planner, evaluator)
        .with_invoker(invoker)
        .with_event_sink(Arc::new(ChannelSink::new(tx)))
        .build()
        .context("Failed to build engine")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    let outcome = engine
        .start("demo-run", "merge A and B then chart the result")
        .await
        .context("Run failed")?;
    tracing::info!(
        status = ?outcome.status,
        steps = outcome.steps_executed,
        reason = outcome.reason.as_deref().unwrap_or("-"),
        "run finished"
    );

    drop(engine);
    let _ = printer.await;
    Ok(())
}
