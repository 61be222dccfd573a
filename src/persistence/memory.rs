use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::SegmentStore;
use crate::downloader::{DownloadState, FileKey, SegmentInfo};
use crate::error::DownloadError;

/// 内存分段存储
///
/// 进程退出即丢失，适合测试和不需要断点续传的一次性下载
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    rows: DashMap<i64, SegmentInfo>,
    next_id: AtomicI64,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存储的总行数
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl SegmentStore for MemorySegmentStore {
    fn save(&self, segment: &SegmentInfo) -> Result<i64, DownloadError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut row = segment.clone();
        row.id = id;
        self.rows.insert(id, row);
        Ok(id)
    }

    fn update(
        &self,
        id: i64,
        state: DownloadState,
        finished_bytes: u64,
        finished_time_millis: u64,
    ) -> Result<usize, DownloadError> {
        match self.rows.get_mut(&id) {
            Some(mut row) => {
                row.state = state;
                row.finished_bytes = finished_bytes;
                row.finished_time_millis = finished_time_millis;
                row.updated_at = chrono::Utc::now().timestamp_millis();
                Ok(1)
            }
            None => {
                debug!("分段 {} 不存在，跳过更新", id);
                Ok(0)
            }
        }
    }

    fn load_all(&self, key: &FileKey) -> Result<Vec<SegmentInfo>, DownloadError> {
        let mut rows: Vec<SegmentInfo> = self
            .rows
            .iter()
            .filter(|r| &r.key == key)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.start);
        Ok(rows)
    }

    fn delete_all(&self, key: &FileKey) -> Result<usize, DownloadError> {
        let before = self.rows.len();
        self.rows.retain(|_, r| &r.key != key);
        Ok(before.saturating_sub(self.rows.len()))
    }
}
