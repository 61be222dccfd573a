use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use super::controller::{ControllerParts, TaskController};
use super::task::FileKey;
use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::events::{DownloadListener, NoopListener};
use crate::netclient::{RangeClient, ReqwestRangeClient};
use crate::persistence::{MemorySegmentStore, SegmentStore};

/// 下载任务构建器
///
/// ```ignore
/// let task = DownloadTaskBuilder::new("https://example.com/app.apk")
///     .save_path("/data/downloads")
///     .thread_count(4)
///     .listener(Arc::new(listener))
///     .store(Arc::new(SqliteSegmentStore::new(db_path)?))
///     .build(Handle::current())?;
/// task.init(true);
/// ```
pub struct DownloadTaskBuilder {
    key: FileKey,
    config: DownloadConfig,
    listener: Option<Arc<dyn DownloadListener>>,
    store: Option<Arc<dyn SegmentStore>>,
    client: Option<Arc<dyn RangeClient>>,
}

impl DownloadTaskBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            key: FileKey {
                file_url: url.into(),
                ..Default::default()
            },
            config: DownloadConfig::default(),
            listener: None,
            store: None,
            client: None,
        }
    }

    /// 使用已有的下载配置（覆盖此前设置的各项参数）
    pub fn config(mut self, config: DownloadConfig) -> Self {
        self.config = config;
        self
    }

    /// 指定文件名（不会被探测结果覆盖）
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.key.file_name = name.into();
        self
    }

    /// 指定文件大小；名称和大小都已知时跳过网络探测
    pub fn file_size(mut self, size: u64) -> Self {
        self.key.file_size = size;
        self
    }

    /// 保存目录，未设置时使用配置中的默认目录
    pub fn save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key.save_path = path.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn thread_count(mut self, count: usize) -> Self {
        self.config.thread_count = count;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn min_segment_bytes(mut self, bytes: u64) -> Self {
        self.config.min_segment_bytes = bytes;
        self
    }

    pub fn max_segments(mut self, count: usize) -> Self {
        self.config.max_segments = count;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn DownloadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn store(mut self, store: Arc<dyn SegmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn client(mut self, client: Arc<dyn RangeClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// 构建任务控制器，worker、采样器和事件分发都运行在 `runtime` 上
    pub fn build(self, runtime: Handle) -> Result<TaskController, DownloadError> {
        let client: Arc<dyn RangeClient> = match self.client {
            Some(client) => client,
            None => Arc::new(ReqwestRangeClient::new()?),
        };

        Ok(TaskController::new(ControllerParts {
            key: self.key,
            config: self.config,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemorySegmentStore::new())),
            client,
            listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
            runtime,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::DownloadState;

    #[tokio::test]
    async fn test_builder_chain() {
        let task = DownloadTaskBuilder::new("http://example.com/a.bin")
            .file_name("b.bin")
            .file_size(1024)
            .save_path("/tmp/downloads")
            .thread_count(3)
            .build(Handle::current())
            .unwrap();

        let key = task.key();
        assert_eq!(key.file_url, "http://example.com/a.bin");
        assert_eq!(key.file_name, "b.bin");
        assert_eq!(key.file_size, 1024);
        assert_eq!(key.save_path, PathBuf::from("/tmp/downloads"));
        assert_eq!(task.state(), DownloadState::New);
        assert!(!task.is_active());
    }
}
