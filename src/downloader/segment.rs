use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::{AtomicState, DownloadState};
use super::task::FileKey;

/// 分段信息（持久化行 / 事件快照）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// 存储分配的ID
    pub id: i64,
    /// 所属文件标识（冗余存储，便于独立查询）
    #[serde(flatten)]
    pub key: FileKey,
    /// 起始字节
    pub start: u64,
    /// 结束字节（包含）
    pub end: u64,
    /// 分段状态
    pub state: DownloadState,
    /// 已下载字节数
    pub finished_bytes: u64,
    /// 已下载耗时（毫秒）
    pub finished_time_millis: u64,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    /// 更新时间（毫秒时间戳）
    pub updated_at: i64,
}

impl SegmentInfo {
    /// 新规划的分段（尚未写入存储，id 为 0）
    pub fn planned(key: FileKey, start: u64, end: u64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: 0,
            key,
            start,
            end,
            state: DownloadState::New,
            finished_bytes: 0,
            finished_time_millis: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 分段长度
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// 断点续传的起始位置
    pub fn resume_offset(&self) -> u64 {
        self.start + self.finished_bytes
    }

    /// 剩余字节数
    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.finished_bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.finished_bytes >= self.len()
    }
}

/// 运行期分段
///
/// 每个分段同一时间只属于一个 worker：worker 独占写 `finished_bytes`，
/// 进度采样和事件分发只读
#[derive(Debug)]
pub struct LiveSegment {
    id: i64,
    start: u64,
    end: u64,
    created_at: i64,
    state: AtomicState,
    finished_bytes: AtomicU64,
    finished_time_millis: AtomicU64,
}

impl LiveSegment {
    /// 从存储中加载的行构建运行期分段
    ///
    /// 已写满的分段归一为 SUCCEEDED；异常退出时残留的
    /// STARTED/NEW/INITIALIZED 行按暂停处理
    pub fn from_info(info: &SegmentInfo) -> Self {
        let finished = info.finished_bytes.min(info.len());
        let state = if finished == info.len() {
            DownloadState::Succeeded
        } else {
            match info.state {
                DownloadState::New | DownloadState::Initialized | DownloadState::Started => {
                    DownloadState::Paused
                }
                DownloadState::Succeeded => DownloadState::Paused,
                other => other,
            }
        };

        Self {
            id: info.id,
            start: info.start,
            end: info.end,
            created_at: info.created_at,
            state: AtomicState::new(state),
            finished_bytes: AtomicU64::new(finished),
            finished_time_millis: AtomicU64::new(info.finished_time_millis),
        }
    }

    /// 刚规划、刚写入存储的分段
    pub fn fresh(info: &SegmentInfo) -> Self {
        let segment = Self::from_info(info);
        segment.set_state(DownloadState::Initialized);
        segment
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn state(&self) -> DownloadState {
        self.state.load()
    }

    pub fn set_state(&self, state: DownloadState) {
        self.state.store(state);
    }

    pub fn finished_bytes(&self) -> u64 {
        self.finished_bytes.load(Ordering::SeqCst)
    }

    /// 累计本分段已下载字节
    pub fn add_finished_bytes(&self, n: u64) -> u64 {
        self.finished_bytes.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn finished_time_millis(&self) -> u64 {
        self.finished_time_millis.load(Ordering::SeqCst)
    }

    pub fn add_finished_time(&self, millis: u64) -> u64 {
        self.finished_time_millis.fetch_add(millis, Ordering::SeqCst) + millis
    }

    pub fn resume_offset(&self) -> u64 {
        self.start + self.finished_bytes()
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.finished_bytes())
    }

    /// 生成快照
    pub fn snapshot(&self, key: &FileKey) -> SegmentInfo {
        SegmentInfo {
            id: self.id,
            key: key.clone(),
            start: self.start,
            end: self.end,
            state: self.state(),
            finished_bytes: self.finished_bytes(),
            finished_time_millis: self.finished_time_millis(),
            created_at: self.created_at,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
