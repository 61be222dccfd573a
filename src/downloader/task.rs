use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::state::DownloadState;

/// 文件标识四元组 (url, name, size, path)
///
/// 分段记录按此键持久化，同一个键的再次初始化会加载已有分段实现断点续传
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct FileKey {
    /// 下载地址
    pub file_url: String,
    /// 文件名
    pub file_name: String,
    /// 文件大小
    pub file_size: u64,
    /// 保存目录
    pub save_path: PathBuf,
}

impl FileKey {
    /// 保存文件的完整路径
    pub fn save_file(&self) -> PathBuf {
        self.save_path.join(&self.file_name)
    }

    /// 文件名和大小是否都已确定（否则需要网络探测）
    pub fn is_resolved(&self) -> bool {
        !self.file_name.is_empty() && self.file_size > 0
    }
}

/// 文件信息（任务快照）
///
/// 随状态/进度/错误事件一起发给调用方
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 任务ID
    pub task_id: String,
    /// 文件标识
    #[serde(flatten)]
    pub key: FileKey,
    /// 任务状态
    pub state: DownloadState,
    /// 已下载总字节数
    pub finished_bytes: u64,
    /// 已下载总耗时（毫秒，不含暂停/停止期间）
    pub finished_time_millis: u64,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
}

impl FileInfo {
    pub fn new(key: FileKey) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            key,
            state: DownloadState::New,
            finished_bytes: 0,
            finished_time_millis: 0,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// 计算进度百分比
    pub fn progress_percent(&self) -> f64 {
        if self.key.file_size == 0 {
            return 0.0;
        }
        (self.finished_bytes as f64 / self.key.file_size as f64) * 100.0
    }

    /// 平均下载速度 (bytes/s)
    pub fn average_speed(&self) -> u64 {
        if self.finished_time_millis == 0 {
            return 0;
        }
        self.finished_bytes * 1000 / self.finished_time_millis
    }

    /// 估算剩余时间 (秒)
    pub fn eta(&self) -> Option<u64> {
        let speed = self.average_speed();
        if speed == 0 || self.finished_bytes >= self.key.file_size {
            return None;
        }
        Some((self.key.file_size - self.finished_bytes) / speed)
    }

    /// 保存文件的完整路径
    pub fn save_file(&self) -> PathBuf {
        self.key.save_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(size: u64) -> FileKey {
        FileKey {
            file_url: "http://example.com/file.bin".to_string(),
            file_name: "file.bin".to_string(),
            file_size: size,
            save_path: PathBuf::from("./downloads"),
        }
    }

    #[test]
    fn test_file_info_creation() {
        let info = FileInfo::new(key(1024));
        assert_eq!(info.state, DownloadState::New);
        assert_eq!(info.finished_bytes, 0);
        assert_eq!(info.progress_percent(), 0.0);
        assert_eq!(info.save_file(), PathBuf::from("./downloads/file.bin"));
    }

    #[test]
    fn test_progress_calculation() {
        let mut info = FileInfo::new(key(1000));

        info.finished_bytes = 250;
        assert_eq!(info.progress_percent(), 25.0);

        info.finished_bytes = 1000;
        assert_eq!(info.progress_percent(), 100.0);

        // 大小未知时不除零
        let info = FileInfo::new(key(0));
        assert_eq!(info.progress_percent(), 0.0);
    }

    #[test]
    fn test_speed_and_eta() {
        let mut info = FileInfo::new(key(1000));
        info.finished_bytes = 200;
        info.finished_time_millis = 2000;
        assert_eq!(info.average_speed(), 100);
        assert_eq!(info.eta(), Some(8));

        info.finished_time_millis = 0;
        assert_eq!(info.eta(), None);
    }

    #[test]
    fn test_key_resolution() {
        let mut k = key(0);
        assert!(!k.is_resolved());
        k.file_size = 10;
        assert!(k.is_resolved());
        k.file_name.clear();
        assert!(!k.is_resolved());
    }
}
