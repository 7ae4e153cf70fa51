//! Weaver - Rust 工作流编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、重试原语、单飞守卫、看门狗
//! - **engine**: 构建器、编排主循环（Plan/Validate/Execute/Evaluate/Decide）、控制面
//! - **events**: 过程事件与去重发射器
//! - **exec**: 任务调用抽象与带重试的步骤执行器
//! - **materialize**: 工件物化与回放恢复
//! - **oracle**: 规划/评估预言机抽象、解析与适配器
//! - **state**: 运行状态、别名注册表、依赖解析、状态存储

pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod exec;
pub mod materialize;
pub mod observability;
pub mod oracle;
pub mod state;

pub use engine::{Engine, EngineBuilder};
