//! 分段持久化模块
//!
//! 分段进度按文件标识四元组 (url, name, size, path) 存储，
//! 程序重启后对同一文件再次 `init()` 即可从断点继续。
//!
//! ## 实现
//!
//! - [`SqliteSegmentStore`]: 基于 rusqlite 的持久化存储（`segment_info` 表）
//! - [`MemorySegmentStore`]: 基于 DashMap 的内存存储，用于测试和一次性下载
//!
//! ## 写入时序
//!
//! worker 先写文件、再累加计数，最后才持久化分段行，
//! 因此崩溃后最多重新下载一个缓冲区的数据。
//!
//! ```ignore
//! use segment_downloader::persistence::{SegmentStore, SqliteSegmentStore};
//!
//! let store = SqliteSegmentStore::new(Path::new("data/segments.db"))?;
//! let id = store.save(&segment)?;
//! store.update(id, DownloadState::Paused, 1024, 300)?;
//! let rows = store.load_all(&key)?;
//! ```

pub mod memory;
pub mod segment_db;

pub use memory::MemorySegmentStore;
pub use segment_db::SqliteSegmentStore;

use crate::downloader::{DownloadState, FileKey, SegmentInfo};
use crate::error::DownloadError;

/// 分段存储接口
///
/// 实现方需在内部串行化写入；各分段行相互独立，不需要跨行事务
pub trait SegmentStore: Send + Sync {
    /// 保存新分段，返回分配的ID
    fn save(&self, segment: &SegmentInfo) -> Result<i64, DownloadError>;

    /// 更新分段进度，返回受影响的行数
    fn update(
        &self,
        id: i64,
        state: DownloadState,
        finished_bytes: u64,
        finished_time_millis: u64,
    ) -> Result<usize, DownloadError>;

    /// 加载文件的全部分段（按起始字节排序）
    fn load_all(&self, key: &FileKey) -> Result<Vec<SegmentInfo>, DownloadError>;

    /// 删除文件的全部分段，返回删除的行数
    fn delete_all(&self, key: &FileKey) -> Result<usize, DownloadError>;
}
