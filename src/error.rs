//! 下载错误类型
//!
//! 所有初始化失败、分段下载失败都通过 [`DownloadError`] 报告给调用方，
//! `start/pause/stop` 的非法调用不属于错误（按状态表静默忽略）。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 下载错误
///
/// 错误只携带文本信息（而不是底层错误对象），以便跨线程克隆并随事件一起分发
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// 下载地址为空
    #[error("下载地址无效: {0}")]
    InvalidUrl(String),

    /// 保存目录无法创建
    #[error("保存目录创建失败: {0}")]
    DirectoryCreateFailed(String),

    /// 保存目录不可写
    #[error("保存目录不可写: {0}")]
    DirectoryNotWritable(String),

    /// URL 格式错误
    #[error("URL 格式错误: {0}")]
    MalformedUrl(String),

    /// 域名解析失败
    #[error("无法解析主机: {0}")]
    UnknownHost(String),

    /// 建立连接时的网络错误（尚未交换任何数据）
    #[error("连接失败: {0}")]
    ConnectIo(String),

    /// HTTP 状态码与预期不符
    #[error("HTTP 状态码异常: 期望 {expected}, 实际 {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },

    /// 传输过程中的读写错误（可通过再次 start() 断点续传）
    #[error("传输中断: {0}")]
    StreamIo(String),

    /// 无法从响应头或 URL 中获得文件名
    #[error("无法确定文件名: {0}")]
    FileNameMissing(String),

    /// 服务器未返回有效的文件大小
    #[error("文件大小无效: {0}")]
    FileSizeInvalid(String),

    /// 本地文件不存在
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    /// 本地文件删除失败
    #[error("文件删除失败: {0}")]
    FileDeleteFailed(String),

    /// 本地文件写入失败
    #[error("文件写入失败: {0}")]
    FileWriteFailed(String),

    /// 分段存储读写失败
    #[error("分段存储错误: {0}")]
    Store(String),
}

/// 错误类别（不带消息，便于调用方匹配和序列化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadErrorKind {
    InvalidUrl,
    DirectoryCreateFailed,
    DirectoryNotWritable,
    MalformedUrl,
    UnknownHost,
    ConnectIoError,
    UnexpectedStatus,
    StreamIoError,
    FileNameMissing,
    FileSizeInvalid,
    FileNotFound,
    FileDeleteFailed,
    FileWriteFailed,
    StoreError,
}

impl DownloadError {
    /// 错误类别
    pub fn kind(&self) -> DownloadErrorKind {
        match self {
            Self::InvalidUrl(_) => DownloadErrorKind::InvalidUrl,
            Self::DirectoryCreateFailed(_) => DownloadErrorKind::DirectoryCreateFailed,
            Self::DirectoryNotWritable(_) => DownloadErrorKind::DirectoryNotWritable,
            Self::MalformedUrl(_) => DownloadErrorKind::MalformedUrl,
            Self::UnknownHost(_) => DownloadErrorKind::UnknownHost,
            Self::ConnectIo(_) => DownloadErrorKind::ConnectIoError,
            Self::UnexpectedStatus { .. } => DownloadErrorKind::UnexpectedStatus,
            Self::StreamIo(_) => DownloadErrorKind::StreamIoError,
            Self::FileNameMissing(_) => DownloadErrorKind::FileNameMissing,
            Self::FileSizeInvalid(_) => DownloadErrorKind::FileSizeInvalid,
            Self::FileNotFound(_) => DownloadErrorKind::FileNotFound,
            Self::FileDeleteFailed(_) => DownloadErrorKind::FileDeleteFailed,
            Self::FileWriteFailed(_) => DownloadErrorKind::FileWriteFailed,
            Self::Store(_) => DownloadErrorKind::StoreError,
        }
    }

    /// 是否可由调用方重试（断网后轮询网络再 start() 即可从断点继续）
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StreamIo(_))
    }

    /// 把本地文件打开错误映射为对应的错误类别
    pub fn from_file_open(path: &std::path::Path, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(format!("{:?}", path))
        } else {
            Self::FileWriteFailed(format!("{:?}: {}", path, err))
        }
    }
}

impl From<rusqlite::Error> for DownloadError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            DownloadError::InvalidUrl(String::new()).kind(),
            DownloadErrorKind::InvalidUrl
        );
        assert_eq!(
            DownloadError::UnexpectedStatus {
                expected: 206,
                actual: 200
            }
            .kind(),
            DownloadErrorKind::UnexpectedStatus
        );
        assert_eq!(
            DownloadError::ConnectIo("reset".into()).kind(),
            DownloadErrorKind::ConnectIoError
        );
    }

    #[test]
    fn test_only_stream_errors_are_retryable() {
        assert!(DownloadError::StreamIo("broken pipe".into()).is_retryable());
        assert!(!DownloadError::ConnectIo("refused".into()).is_retryable());
        assert!(!DownloadError::UnexpectedStatus {
            expected: 200,
            actual: 404
        }
        .is_retryable());
    }

    #[test]
    fn test_file_open_mapping() {
        let path = std::path::Path::new("/nonexistent/file.bin");
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(
            DownloadError::from_file_open(path, &not_found).kind(),
            DownloadErrorKind::FileNotFound
        );

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            DownloadError::from_file_open(path, &denied).kind(),
            DownloadErrorKind::FileWriteFailed
        );
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&DownloadErrorKind::StreamIoError).unwrap();
        assert_eq!(json, "\"stream_io_error\"");
    }
}
