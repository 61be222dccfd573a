//! 日志守卫释放后，非阻塞写入器中的日志必须已经写入文件
//!
//! 全局 subscriber 只能初始化一次，因此单独放在一个测试二进制里

use segment_downloader::config::LogConfig;
use segment_downloader::logging::{init_logging, LOG_FILE_PREFIX};
use tempfile::TempDir;

#[test]
fn test_dropping_guard_flushes_file_log() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        enabled: true,
        log_dir: dir.path().to_path_buf(),
        retention_days: 7,
        level: "info".to_string(),
    };

    let guard = init_logging(&config);
    for i in 0..200 {
        tracing::info!("填充日志 {}", i);
    }
    tracing::error!("❌ 下载失败: final-line-marker");
    drop(guard);

    let contents: String = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .map(|e| std::fs::read_to_string(e.path()).unwrap())
        .collect();
    assert!(contents.contains("final-line-marker"));
}
