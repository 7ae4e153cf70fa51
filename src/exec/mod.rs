//! 执行层：任务调用抽象、HTTP 调用端、带重试的步骤执行器

pub mod executor;
pub mod http;
pub mod invoker;

pub use executor::StepExecutor;
pub use http::HttpInvoker;
pub use invoker::{ScriptedInvoker, TaskInvoker};
