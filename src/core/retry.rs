//! 共享重试原语：带单次超时的有界重试
//!
//! Planner / Evaluator 适配器共用：每次尝试受 per-attempt timeout 约束，
//! 失败（出错或超时）后延迟重试，直到 max_attempts 耗尽。

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

/// 重试策略：尝试次数、单次超时、重试间隔
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            retry_delay,
        }
    }
}

/// 重试耗尽的原因：区分「最后一次是超时」与「最后一次是业务失败」，
/// 上层据此报告 OracleTimeout 或 OracleMalformed。
#[derive(Debug)]
pub enum RetryFailure {
    /// 最后一次尝试超时
    Timeout { attempts: u32 },
    /// 最后一次尝试返回错误
    Exhausted { attempts: u32, last_error: String },
}

/// 在策略约束下反复调用 `f(attempt)`，返回第一次成功的结果。
///
/// `f` 应把「调用 + 解析」整体包进来：解析失败同样算一次失败尝试。
pub async fn retry_with_timeout<T, F, Fut>(
    policy: &RetryPolicy,
    op: &str,
    mut f: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut last_error: Option<String> = None;
    let mut last_was_timeout = false;

    for attempt in 1..=policy.max_attempts {
        match timeout(policy.attempt_timeout, f(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(
                    op = op,
                    attempt = attempt,
                    max = policy.max_attempts,
                    error = %e,
                    "attempt failed"
                );
                last_error = Some(e);
                last_was_timeout = false;
            }
            Err(_) => {
                tracing::warn!(
                    op = op,
                    attempt = attempt,
                    max = policy.max_attempts,
                    timeout_secs = policy.attempt_timeout.as_secs(),
                    "attempt timed out"
                );
                last_was_timeout = true;
            }
        }

        if attempt < policy.max_attempts && !policy.retry_delay.is_zero() {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    if last_was_timeout {
        Err(RetryFailure::Timeout {
            attempts: policy.max_attempts,
        })
    } else {
        Err(RetryFailure::Exhausted {
            attempts: policy.max_attempts,
            last_error: last_error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(50),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_with_timeout(&quick_policy(3), "op", |_| async { Ok::<_, String>(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_timeout(&quick_policy(3), "op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err("not yet".to_string())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_reports_last_error() {
        let failure = retry_with_timeout(&quick_policy(2), "op", |attempt| async move {
            Err::<(), _>(format!("error {attempt}"))
        })
        .await
        .unwrap_err();
        match failure {
            RetryFailure::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "error 2");
            }
            RetryFailure::Timeout { .. } => panic!("Expected Exhausted"),
        }
    }

    #[tokio::test]
    async fn test_timeout_classified_distinctly() {
        let failure = retry_with_timeout(&quick_policy(2), "op", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), String>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(failure, RetryFailure::Timeout { attempts: 2 }));
    }
}
