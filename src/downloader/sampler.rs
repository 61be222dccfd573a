//! 进度采样器
//!
//! 任务处于 STARTED 期间按固定间隔计算 (Δt, Δbytes) 并发布进度事件，
//! 同时把 Δt 累加进任务的已下载耗时

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 默认采样间隔（毫秒）
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// 采样数据源
pub trait SampleSource: Send + Sync {
    /// 任务累计已下载字节
    fn finished_bytes(&self) -> u64;
    /// 任务是否仍处于 STARTED
    fn is_running(&self) -> bool;
    /// 累加已下载耗时
    fn add_finished_time(&self, millis: u64);
}

/// 进度回调 `(delta_time_millis, delta_finished_bytes)`
pub type SampleSink = Box<dyn Fn(u64, u64) + Send + Sync + 'static>;

/// 进度采样器句柄
///
/// 任务离开 STARTED 或被取消后，采样器发布一次零增量事件并自行退出
#[derive(Debug)]
pub struct ProgressSampler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressSampler {
    pub fn spawn(
        runtime: &Handle,
        interval: Duration,
        source: Arc<dyn SampleSource>,
        sink: SampleSink,
    ) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let interval = interval.max(Duration::from_millis(1));

        // 基线在启动时确定，首次轮询前写入的字节计入第一个采样
        let mut last_time = Instant::now();
        let mut last_bytes = source.finished_bytes();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(last_time + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let cancelled = tokio::select! {
                    _ = child.cancelled() => true,
                    _ = ticker.tick() => false,
                };

                let now = Instant::now();
                let delta_time = now.duration_since(last_time).as_millis() as u64;
                let bytes = source.finished_bytes();
                let delta_bytes = bytes.saturating_sub(last_bytes);
                last_time = now;
                last_bytes = bytes;

                source.add_finished_time(delta_time);

                if cancelled || !source.is_running() {
                    // 速度归零，避免界面停留在过期的速度上
                    sink(0, 0);
                    debug!("进度采样器退出");
                    break;
                }

                sink(delta_time, delta_bytes);
            }
        });

        Self { token, handle }
    }

    /// 请求停止（异步生效，采样器发布最后一次零增量事件后退出）
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
