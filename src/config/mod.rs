// 配置管理模块

pub mod path_validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::downloader::planner::{DEFAULT_MAX_SEGMENTS, DEFAULT_MIN_SEGMENT_BYTES};
use crate::downloader::sampler::DEFAULT_PROGRESS_INTERVAL_MS;

pub use path_validator::{prepare_save_dir, PathValidator};

/// 线程数的实际上限，超过只警告不拒绝
pub const PRACTICAL_THREAD_CEILING: usize = 50;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 持久化配置
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadConfig {
    /// 连接超时（毫秒，默认 10 秒）
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 读缓冲区大小（字节，默认 16KB）
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 请求线程数（默认 1）
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    /// 进度采样间隔（毫秒，默认 1000）
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// 最小分段大小（字节，默认 5MB）
    #[serde(default = "default_min_segment_bytes")]
    pub min_segment_bytes: u64,
    /// 最大分段数（默认 100）
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// 默认保存目录
    #[serde(default = "default_save_dir")]
    pub default_save_dir: PathBuf,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_buffer_size() -> usize {
    16 * 1024 // 16KB
}

fn default_thread_count() -> usize {
    1
}

fn default_progress_interval_ms() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_MS
}

fn default_min_segment_bytes() -> u64 {
    DEFAULT_MIN_SEGMENT_BYTES
}

fn default_max_segments() -> usize {
    DEFAULT_MAX_SEGMENTS
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            buffer_size: default_buffer_size(),
            thread_count: default_thread_count(),
            progress_interval_ms: default_progress_interval_ms(),
            min_segment_bytes: default_min_segment_bytes(),
            max_segments: default_max_segments(),
            default_save_dir: default_save_dir(),
        }
    }
}

impl DownloadConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            anyhow::bail!("缓冲区大小必须大于 0");
        }
        if self.thread_count == 0 {
            anyhow::bail!("线程数必须大于 0");
        }
        if self.progress_interval_ms == 0 {
            anyhow::bail!("进度采样间隔必须大于 0");
        }
        if self.min_segment_bytes == 0 {
            anyhow::bail!("最小分段大小必须大于 0");
        }
        if self.max_segments == 0 {
            anyhow::bail!("最大分段数必须大于 0");
        }
        if self.thread_count > PRACTICAL_THREAD_CEILING {
            tracing::warn!(
                "⚠️ 线程数 {} 超过建议上限 {}，可能被服务器限流",
                self.thread_count,
                PRACTICAL_THREAD_CEILING
            );
        }
        Ok(())
    }
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// 分段数据库路径
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/segments.db")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .download
            .validate()
            .context("配置文件中的下载配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.download.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置（并尝试写出默认配置文件）
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.download.connect_timeout_ms, 10_000);
        assert_eq!(config.download.buffer_size, 16 * 1024);
        assert_eq!(config.download.thread_count, 1);
        assert_eq!(config.download.progress_interval_ms, 1000);
        assert_eq!(config.download.min_segment_bytes, 5 * 1024 * 1024);
        assert_eq!(config.download.max_segments, 100);
        assert!(config.download.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.download.thread_count = 8;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.download, config.download);
        assert_eq!(loaded.persistence.db_path, config.persistence.db_path);
    }

    #[tokio::test]
    async fn test_partial_config_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        std::fs::write(path, "[download]\nthread_count = 4\n").unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.download.thread_count, 4);
        assert_eq!(loaded.download.buffer_size, 16 * 1024);
        assert!(loaded.log.enabled);
    }

    #[tokio::test]
    async fn test_load_or_default_writes_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config").join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.download, DownloadConfig::default());
        assert!(std::path::Path::new(path).exists());
    }

    #[test]
    fn test_config_validation() {
        let mut config = DownloadConfig::default();
        config.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = DownloadConfig::default();
        config.max_segments = 0;
        assert!(config.validate().is_err());

        // 超过建议上限只警告
        let mut config = DownloadConfig::default();
        config.thread_count = 64;
        assert!(config.validate().is_ok());
    }
}
