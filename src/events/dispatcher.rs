//! 事件分发
//!
//! 每个任务一个分发任务，按发送顺序串行处理状态变更、进度和错误消息，
//! 保证同一任务的回调顺序与状态转换顺序一致

use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{DownloadListener, ProgressEvent};
use crate::downloader::{DownloadState, FileInfo, SegmentInfo};
use crate::error::DownloadError;

/// 发往分发任务的消息
#[derive(Debug, Clone)]
pub enum TaskMessage {
    /// 状态已切换
    StateChanged(DownloadState),
    /// 进度采样
    Progress(ProgressEvent),
    /// 错误
    Error(DownloadError),
}

/// 任务快照来源
pub trait SnapshotSource: Send + Sync {
    /// 当前任务状态
    fn current_state(&self) -> DownloadState;
    /// 文件信息和分段快照
    fn snapshot(&self) -> (FileInfo, Vec<SegmentInfo>);
}

/// 启动分发任务
///
/// 任务对象释放（弱引用失效）、通道关闭或取消令牌触发时退出
pub fn spawn_dispatcher(
    runtime: &Handle,
    mut rx: mpsc::UnboundedReceiver<TaskMessage>,
    source: Weak<dyn SnapshotSource>,
    listener: Arc<dyn DownloadListener>,
    token: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                message = rx.recv() => message,
                _ = token.cancelled() => None,
            };

            let Some(message) = message else {
                break;
            };

            let Some(task) = source.upgrade() else {
                break;
            };

            let (mut file, segments) = task.snapshot();
            match message {
                TaskMessage::StateChanged(state) => {
                    file.state = state;
                    listener.on_state_changed(&file, &segments, state);
                }
                TaskMessage::Progress(progress) => {
                    // 已离开 STARTED 的采样一律按零增量上报
                    let progress = if task.current_state() == DownloadState::Started {
                        progress
                    } else {
                        ProgressEvent::default()
                    };
                    listener.on_progress(&file, &segments, progress);
                }
                TaskMessage::Error(error) => {
                    listener.on_error(&file, &segments, &error);
                }
            }
        }
        debug!("事件分发任务退出");
    })
}
