// Segment Downloader Library
// 断点续传多连接 HTTP 分段下载核心库

// 配置管理模块
pub mod config;

// 下载引擎模块（状态机、分段规划、worker、汇合屏障、进度采样）
pub mod downloader;

// 错误类型
pub mod error;

// 事件模块
pub mod events;

// 日志模块
pub mod logging;

// 范围请求客户端模块
pub mod netclient;

// 分段持久化模块
pub mod persistence;

// 导出常用类型
pub use config::{AppConfig, DownloadConfig};
pub use downloader::{
    DownloadState, DownloadTaskBuilder, FileInfo, FileKey, SegmentInfo, TaskController,
};
pub use error::{DownloadError, DownloadErrorKind};
pub use events::{ChannelListener, DownloadEvent, DownloadListener, ProgressEvent};
pub use netclient::{RangeClient, ReqwestRangeClient};
pub use persistence::{MemorySegmentStore, SegmentStore, SqliteSegmentStore};
