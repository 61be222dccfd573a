//! 下载事件类型定义
//!
//! 调用方只通过这三类事件观察任务：状态变更、进度、错误

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::downloader::{DownloadState, FileInfo, SegmentInfo};
use crate::error::{DownloadError, DownloadErrorKind};

/// 一次进度采样
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 距上次采样的时间（毫秒）
    pub delta_time_millis: u64,
    /// 距上次采样新增的字节数
    pub delta_finished_bytes: u64,
}

impl ProgressEvent {
    pub fn new(delta_time_millis: u64, delta_finished_bytes: u64) -> Self {
        Self {
            delta_time_millis,
            delta_finished_bytes,
        }
    }

    /// 瞬时速度 (bytes/s)
    pub fn speed(&self) -> u64 {
        if self.delta_time_millis == 0 {
            return 0;
        }
        self.delta_finished_bytes * 1000 / self.delta_time_millis
    }
}

/// 下载任务事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// 状态变更
    StateChanged {
        file: FileInfo,
        segments: Vec<SegmentInfo>,
        state: DownloadState,
    },
    /// 进度更新
    Progress {
        file: FileInfo,
        segments: Vec<SegmentInfo>,
        #[serde(flatten)]
        progress: ProgressEvent,
    },
    /// 错误
    Error {
        file: FileInfo,
        segments: Vec<SegmentInfo>,
        kind: DownloadErrorKind,
        message: String,
        /// 是否可以通过再次 start() 断点续传
        retryable: bool,
    },
}

impl DownloadEvent {
    /// 获取事件对应的文件快照
    pub fn file(&self) -> &FileInfo {
        match self {
            Self::StateChanged { file, .. } => file,
            Self::Progress { file, .. } => file,
            Self::Error { file, .. } => file,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::Progress { .. } => "progress",
            Self::Error { .. } => "error",
        }
    }
}

/// 下载事件监听器
///
/// 同一任务的回调由同一个分发任务按发生顺序串行调用，
/// 回调内不要长时间阻塞
#[allow(unused_variables)]
pub trait DownloadListener: Send + Sync {
    fn on_state_changed(&self, file: &FileInfo, segments: &[SegmentInfo], state: DownloadState) {}

    fn on_progress(&self, file: &FileInfo, segments: &[SegmentInfo], progress: ProgressEvent) {}

    fn on_error(&self, file: &FileInfo, segments: &[SegmentInfo], error: &DownloadError) {}
}

/// 空监听器
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl DownloadListener for NoopListener {}

/// 把事件转发到 mpsc 通道的监听器
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: DownloadEvent) {
        // 接收端已关闭时丢弃
        let _ = self.tx.send(event);
    }
}

impl DownloadListener for ChannelListener {
    fn on_state_changed(&self, file: &FileInfo, segments: &[SegmentInfo], state: DownloadState) {
        self.send(DownloadEvent::StateChanged {
            file: file.clone(),
            segments: segments.to_vec(),
            state,
        });
    }

    fn on_progress(&self, file: &FileInfo, segments: &[SegmentInfo], progress: ProgressEvent) {
        self.send(DownloadEvent::Progress {
            file: file.clone(),
            segments: segments.to_vec(),
            progress,
        });
    }

    fn on_error(&self, file: &FileInfo, segments: &[SegmentInfo], error: &DownloadError) {
        self.send(DownloadEvent::Error {
            file: file.clone(),
            segments: segments.to_vec(),
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::FileKey;

    #[test]
    fn test_progress_speed() {
        assert_eq!(ProgressEvent::new(1000, 2048).speed(), 2048);
        assert_eq!(ProgressEvent::new(500, 1000).speed(), 2000);
        assert_eq!(ProgressEvent::new(0, 1000).speed(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = DownloadEvent::Progress {
            file: FileInfo::new(FileKey::default()),
            segments: vec![],
            progress: ProgressEvent::new(1000, 10),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "progress");
        assert_eq!(json["delta_time_millis"], 1000);
        assert_eq!(json["delta_finished_bytes"], 10);
        assert_eq!(event.event_type_name(), "progress");

        let event = DownloadEvent::StateChanged {
            file: FileInfo::new(FileKey::default()),
            segments: vec![],
            state: DownloadState::Paused,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "state_changed");
        assert_eq!(json["state"], "PAUSED");
    }

    #[tokio::test]
    async fn test_channel_listener_forwards_events() {
        let (listener, mut rx) = ChannelListener::new();
        let file = FileInfo::new(FileKey::default());

        listener.on_state_changed(&file, &[], DownloadState::Started);
        listener.on_error(&file, &[], &DownloadError::StreamIo("reset".into()));

        match rx.recv().await.unwrap() {
            DownloadEvent::StateChanged { state, .. } => assert_eq!(state, DownloadState::Started),
            other => panic!("意外的事件: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            DownloadEvent::Error {
                kind, retryable, ..
            } => {
                assert_eq!(kind, DownloadErrorKind::StreamIoError);
                assert!(retryable);
            }
            other => panic!("意外的事件: {:?}", other),
        }
    }
}
