use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// 下载状态
///
/// 任务和分段共用同一个枚举，分段只会用到其中的子集
/// (NEW/STARTED/PAUSED/STOPPED/SUCCEEDED/FAILED)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum DownloadState {
    /// 新建
    New = 0,
    /// 已初始化（文件名、大小已确定，分段已规划）
    Initialized = 1,
    /// 下载中
    Started = 2,
    /// 已暂停
    Paused = 3,
    /// 已停止（分段记录和文件均已删除）
    Stopped = 4,
    /// 下载成功
    Succeeded = 5,
    /// 失败（初始化失败或下载失败）
    Failed = 6,
}

impl DownloadState {
    /// 持久化使用的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Initialized => "INITIALIZED",
            Self::Started => "STARTED",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Initialized,
            2 => Self::Started,
            3 => Self::Paused,
            4 => Self::Stopped,
            5 => Self::Succeeded,
            _ => Self::Failed,
        }
    }

    /// 是否允许执行 start()
    pub fn can_start(&self) -> bool {
        !matches!(self, Self::Started)
    }

    /// 是否允许执行 pause()
    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// 是否允许执行 stop()
    pub fn can_stop(&self) -> bool {
        matches!(
            self,
            Self::Started | Self::Paused | Self::Succeeded | Self::Failed
        )
    }

    /// 是否允许执行 init()
    pub fn can_init(&self) -> bool {
        matches!(self, Self::New | Self::Failed)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "INITIALIZED" => Ok(Self::Initialized),
            "STARTED" => Ok(Self::Started),
            "PAUSED" => Ok(Self::Paused),
            "STOPPED" => Ok(Self::Stopped),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("未知的下载状态: {}", other)),
        }
    }
}

/// 原子状态单元
///
/// 任务状态在调用方线程（start/pause/stop）、分段 worker（失败上报）
/// 和屏障释放动作之间共享，所有转换都走 CAS
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: DownloadState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> DownloadState {
        DownloadState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: DownloadState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// 仅当当前状态为 `current` 时切换到 `new`
    pub fn transition(&self, current: DownloadState, new: DownloadState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 当前状态满足 `pred` 时切换到 `new`，返回切换前的状态
    pub fn transition_if<F>(&self, pred: F, new: DownloadState) -> Result<DownloadState, DownloadState>
    where
        F: Fn(DownloadState) -> bool,
    {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if pred(DownloadState::from_u8(v)) {
                    Some(new as u8)
                } else {
                    None
                }
            })
            .map(DownloadState::from_u8)
            .map_err(DownloadState::from_u8)
    }
}

/// 从重新加载的分段状态推断任务此前的状态
///
/// 优先级：STOPPED > FAILED > PAUSED > SUCCEEDED
pub fn infer_task_state<I>(states: I) -> DownloadState
where
    I: IntoIterator<Item = DownloadState>,
{
    let mut has_failed = false;
    let mut has_paused = false;

    for state in states {
        match state {
            DownloadState::Stopped => return DownloadState::Stopped,
            DownloadState::Failed => has_failed = true,
            DownloadState::Paused => has_paused = true,
            _ => {}
        }
    }

    if has_failed {
        DownloadState::Failed
    } else if has_paused {
        DownloadState::Paused
    } else {
        DownloadState::Succeeded
    }
}

/// 屏障释放时由参与分段的最终状态计算聚合结果
///
/// 与 [`infer_task_state`] 使用相同的优先级；worker 以外的状态
/// （仍处于 STARTED 等）按暂停处理，保证不会误报成功
pub fn aggregate_outcome<I>(states: I) -> DownloadState
where
    I: IntoIterator<Item = DownloadState>,
{
    infer_task_state(states.into_iter().map(|s| match s {
        DownloadState::New | DownloadState::Initialized | DownloadState::Started => {
            DownloadState::Paused
        }
        other => other,
    }))
}
