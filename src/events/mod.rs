//! 事件模块
//!
//! - `types.rs`: 调用方可见的事件类型和监听器接口
//! - `dispatcher.rs`: 单任务串行分发，保证事件顺序

mod dispatcher;
mod types;

pub use dispatcher::*;
pub use types::*;
