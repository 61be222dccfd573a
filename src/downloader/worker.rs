//! 分段下载 worker
//!
//! 一个 worker 在生命周期内只负责一个分段：按断点偏移打开范围请求，
//! 把字节流写到文件的对应位置，每次读取前检查任务状态以响应暂停/停止，
//! 结束（暂停/停止/完成/失败）时到达汇合屏障后退出

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, error, warn};

use super::barrier::RendezvousBarrier;
use super::segment::LiveSegment;
use super::state::DownloadState;
use super::task::FileKey;
use crate::error::DownloadError;
use crate::netclient::RangeClient;
use crate::persistence::SegmentStore;

/// worker 所属任务提供的回调
pub trait WorkerHost: Send + Sync {
    /// 任务当前状态
    fn task_state(&self) -> DownloadState;
    /// 累加任务的已下载字节
    fn on_bytes(&self, n: u64);
    /// 上报下载失败
    fn on_failure(&self, segment: &LiveSegment, error: DownloadError);
}

/// 分段下载 worker
pub struct SegmentWorker {
    pub segment: Arc<LiveSegment>,
    pub key: FileKey,
    pub client: Arc<dyn RangeClient>,
    pub store: Arc<dyn SegmentStore>,
    pub host: Arc<dyn WorkerHost>,
    pub barrier: Arc<RendezvousBarrier>,
    pub buffer_size: usize,
    pub connect_timeout: Duration,
}

impl SegmentWorker {
    /// 执行下载，结束时到达屏障
    pub async fn run(self) {
        let mut clock = Instant::now();

        match self.download(&mut clock).await {
            Ok(state) => {
                debug!(
                    "分段 #{} 结束: state={}, finished={}/{}",
                    self.segment.id(),
                    state,
                    self.segment.finished_bytes(),
                    self.segment.len()
                );
            }
            Err(e) => {
                error!("分段 #{} 下载失败: {}", self.segment.id(), e);
                self.record_elapsed(&mut clock);
                self.segment.set_state(DownloadState::Failed);
                if let Err(persist_err) = self.persist() {
                    warn!("分段 #{} 失败状态持久化失败: {}", self.segment.id(), persist_err);
                }
                self.host.on_failure(&self.segment, e);
            }
        }

        self.barrier.arrive();
    }

    async fn download(&self, clock: &mut Instant) -> Result<DownloadState, DownloadError> {
        let segment = &self.segment;

        if segment.remaining() == 0 {
            return self.finish(DownloadState::Succeeded, clock);
        }

        // 文件尚未打开，没有需要落盘的缓冲
        if let Some(target) = self.interrupt_target() {
            return self.leave(target, clock);
        }

        segment.set_state(DownloadState::Started);
        let offset = segment.resume_offset();

        debug!(
            "分段 #{} 开始下载: bytes={}-{}",
            segment.id(),
            offset,
            segment.end()
        );

        // 1. 打开范围请求
        let resp = self
            .client
            .open_range(&self.key.file_url, offset, segment.end(), self.connect_timeout)
            .await?;
        if resp.status != 206 {
            return Err(DownloadError::UnexpectedStatus {
                expected: 206,
                actual: resp.status,
            });
        }

        // 2. 打开文件并定位到断点位置
        // 文件被外部删除时按原大小重建（不截断已有内容）
        let path = self.key.save_file();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| DownloadError::from_file_open(&path, &e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| DownloadError::FileWriteFailed(format!("{:?}: {}", path, e)))?
            .len();
        if len < self.key.file_size {
            file.set_len(self.key.file_size)
                .await
                .map_err(|e| DownloadError::FileWriteFailed(format!("{:?}: {}", path, e)))?;
        }
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| DownloadError::FileWriteFailed(format!("{:?}: {}", path, e)))?;

        // 3. 流式读取并写入文件
        let mut reader = StreamReader::new(resp.body);
        let streamed = self.stream(&mut reader, &mut file).await;

        // 4. 持久化分段行之前先把已写入的字节刷到文件
        let flushed = file.flush().await.map_err(stream_error);
        let interrupted = streamed?;
        flushed?;

        if let Some(target) = interrupted {
            return self.leave(target, clock);
        }

        if segment.remaining() > 0 {
            return Err(DownloadError::StreamIo(format!(
                "连接提前结束: 分段 #{} 还差 {} bytes",
                segment.id(),
                segment.remaining()
            )));
        }

        self.finish(DownloadState::Succeeded, clock)
    }

    /// 把响应体写入文件，直到分段写满、流结束或任务要求退出
    ///
    /// 任务要求退出时返回分段的目标状态
    async fn stream<R>(
        &self,
        reader: &mut R,
        file: &mut tokio::fs::File,
    ) -> Result<Option<DownloadState>, DownloadError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let segment = &self.segment;
        let mut buffer = vec![0u8; self.buffer_size.max(1)];

        loop {
            // 写满的分段直接完成，不因随后的暂停而记为 PAUSED
            let remaining = segment.remaining();
            if remaining == 0 {
                return Ok(None);
            }

            if let Some(target) = self.interrupt_target() {
                return Ok(Some(target));
            }

            let want = buffer.len().min(remaining as usize);
            let n = reader.read(&mut buffer[..want]).await.map_err(stream_error)?;
            if n == 0 {
                return Ok(None);
            }

            // 先写文件再累加计数
            file.write_all(&buffer[..n]).await.map_err(stream_error)?;
            segment.add_finished_bytes(n as u64);
            self.host.on_bytes(n as u64);
        }
    }

    /// 任务已离开 STARTED 时返回分段应进入的状态
    fn interrupt_target(&self) -> Option<DownloadState> {
        match self.host.task_state() {
            DownloadState::Started => None,
            DownloadState::Stopped => Some(DownloadState::Stopped),
            _ => Some(DownloadState::Paused),
        }
    }

    /// 按目标状态退出：暂停持久化进度，停止不持久化
    fn leave(&self, target: DownloadState, clock: &mut Instant) -> Result<DownloadState, DownloadError> {
        if target == DownloadState::Stopped {
            // 停止会删除全部分段记录
            self.record_elapsed(clock);
            self.segment.set_state(DownloadState::Stopped);
            return Ok(DownloadState::Stopped);
        }
        self.finish(target, clock)
    }

    fn finish(&self, state: DownloadState, clock: &mut Instant) -> Result<DownloadState, DownloadError> {
        self.record_elapsed(clock);
        self.segment.set_state(state);
        self.persist()?;
        Ok(state)
    }

    fn persist(&self) -> Result<(), DownloadError> {
        self.store.update(
            self.segment.id(),
            self.segment.state(),
            self.segment.finished_bytes(),
            self.segment.finished_time_millis(),
        )?;
        Ok(())
    }

    fn record_elapsed(&self, clock: &mut Instant) {
        let now = Instant::now();
        self.segment
            .add_finished_time(now.duration_since(*clock).as_millis() as u64);
        *clock = now;
    }
}

fn stream_error(e: std::io::Error) -> DownloadError {
    DownloadError::StreamIo(e.to_string())
}
