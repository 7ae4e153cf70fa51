//! 事件发射器
//!
//! 向流式通道推送去重后的状态事件；通道关闭不是异常控制流——
//! 非必需通道仅记日志继续，必需通道则转为该 run 的取消信号。

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::types::EngineEvent;

/// 通道已关闭信号（显式和类型，不用异常表达断连）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

impl From<ChannelClosed> for crate::core::EngineError {
    fn from(_: ChannelClosed) -> Self {
        crate::core::EngineError::ChannelClosed
    }
}

/// 事件落地端：由外部通道实现（进程内 mpsc / SSE / WebSocket 等）
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent) -> Result<(), ChannelClosed>;
}

/// 进程内 mpsc 通道实现
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &EngineEvent) -> Result<(), ChannelClosed> {
        self.tx.send(event.clone()).map_err(|_| ChannelClosed)
    }
}

/// 丢弃所有事件（无监听方的场景）
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &EngineEvent) -> Result<(), ChannelClosed> {
        Ok(())
    }
}

/// 每 run 一个发射器：连续重复事件去重；必需通道关闭时触发取消
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    required: bool,
    dedupe: bool,
    last_fingerprint: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl EventEmitter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        required: bool,
        dedupe: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            required,
            dedupe,
            last_fingerprint: Mutex::new(None),
            cancel,
        }
    }

    /// 推送事件；与上一条完全相同时跳过
    pub fn emit(&self, event: EngineEvent) {
        if self.dedupe {
            let fingerprint = serde_json::to_string(&event).unwrap_or_default();
            let mut last = self
                .last_fingerprint
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if last.as_deref() == Some(fingerprint.as_str()) {
                return;
            }
            *last = Some(fingerprint);
        }

        if let Err(ChannelClosed) = self.sink.emit(&event) {
            if self.required {
                tracing::warn!("required event channel closed, cancelling run");
                self.cancel.cancel();
            } else {
                tracing::debug!("event channel closed, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter(
        dedupe: bool,
        required: bool,
    ) -> (
        EventEmitter,
        mpsc::UnboundedReceiver<EngineEvent>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            EventEmitter::new(Arc::new(ChannelSink::new(tx)), required, dedupe, cancel.clone()),
            rx,
            cancel,
        )
    }

    #[tokio::test]
    async fn test_dedupe_suppresses_consecutive_duplicates() {
        let (emitter, mut rx, _) = emitter(true, false);
        emitter.emit(EngineEvent::Planning { step: 1 });
        emitter.emit(EngineEvent::Planning { step: 1 });
        emitter.emit(EngineEvent::Planning { step: 2 });
        emitter.emit(EngineEvent::Planning { step: 1 });

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_no_dedupe_passes_all() {
        let (emitter, mut rx, _) = emitter(false, false);
        emitter.emit(EngineEvent::Planning { step: 1 });
        emitter.emit(EngineEvent::Planning { step: 1 });
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_required_channel_closed_cancels() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(
            Arc::new(ChannelSink::new(tx)),
            true,
            false,
            cancel.clone(),
        );
        emitter.emit(EngineEvent::Stopped);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_optional_channel_closed_is_nonfatal() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(
            Arc::new(ChannelSink::new(tx)),
            false,
            false,
            cancel.clone(),
        );
        emitter.emit(EngineEvent::Stopped);
        assert!(!cancel.is_cancelled());
    }
}
