//! 核心层：错误、重试原语、单飞守卫、看门狗

pub mod error;
pub mod guard;
pub mod retry;
pub mod watchdog;

pub use error::{EngineError, RunOutcome, RunStatus};
pub use guard::{GuardAcquire, GuardPhase, GuardStore, GuardToken};
pub use retry::{retry_with_timeout, RetryFailure, RetryPolicy};
pub use watchdog::{detect_repeat, ComplexityLimiter, LoopCheck, StallWatchdog};
