// 保存目录校验模块

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DownloadError;

/// 保存目录校验器
pub struct PathValidator;

impl PathValidator {
    /// 准备保存目录
    ///
    /// 执行以下步骤：
    /// 1. 目录不存在时递归创建
    /// 2. 确认是目录而不是文件
    /// 3. 写入探测文件确认可写
    ///
    /// # 返回值
    /// - Ok(PathBuf): 可用的保存目录
    /// - Err(DirectoryCreateFailed): 创建失败或路径是文件
    /// - Err(DirectoryNotWritable): 目录不可写
    pub fn prepare_save_dir(path: &Path) -> Result<PathBuf, DownloadError> {
        Self::ensure_directory_exists(path)?;

        if !path.is_dir() {
            return Err(DownloadError::DirectoryCreateFailed(format!(
                "路径 {:?} 不是一个目录",
                path
            )));
        }

        if !Self::check_writable(path) {
            return Err(DownloadError::DirectoryNotWritable(format!(
                "路径 {:?} 没有写入权限",
                path
            )));
        }

        Ok(path.to_path_buf())
    }

    /// 检查路径是否可写
    ///
    /// 通过创建临时文件的方式检测写入权限
    pub fn check_writable(path: &Path) -> bool {
        let test_file = path.join(".write_test");

        match fs::File::create(&test_file) {
            Ok(_) => {
                // 创建成功，删除测试文件
                let _ = fs::remove_file(&test_file);
                true
            }
            Err(_) => false,
        }
    }

    /// 自动创建目录（如果不存在）
    pub fn ensure_directory_exists(path: &Path) -> Result<(), DownloadError> {
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| {
                DownloadError::DirectoryCreateFailed(format!("无法创建目录 {:?}: {}", path, e))
            })?;
            tracing::info!("自动创建保存目录: {:?}", path);
        }
        Ok(())
    }
}

/// 准备保存目录（[`PathValidator::prepare_save_dir`] 的简写）
pub fn prepare_save_dir(path: &Path) -> Result<PathBuf, DownloadError> {
    PathValidator::prepare_save_dir(path)
}
