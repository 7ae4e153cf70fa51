//! 事件层：过程事件类型与去重发射器

pub mod emitter;
pub mod types;

pub use emitter::{ChannelClosed, ChannelSink, EventEmitter, EventSink, NullSink};
pub use types::EngineEvent;
