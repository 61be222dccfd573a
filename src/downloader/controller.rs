//! 任务控制器
//!
//! 持有任务状态机，负责 init → 规划/恢复分段 → 启动 worker → 处理汇合结果。
//!
//! ## 并发模型
//!
//! - `start()` / `init()` 通过异步互斥锁串行执行
//! - worker 只读任务状态，只写自己分段的计数和任务的原子总计数
//! - 每次 `start()` 生成一个新的"代"（屏障 + 暂停等待器），屏障释放动作
//!   在 `generation` 锁内完成状态切换、清理和状态事件发送，
//!   与 `stop()` / `reset()` / 下一次 `start()` 互斥
//! - 所有事件经由同一个通道交给分发任务，回调顺序与状态转换顺序一致

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::barrier::RendezvousBarrier;
use super::planner::plan_segments;
use super::sampler::{ProgressSampler, SampleSource};
use super::segment::{LiveSegment, SegmentInfo};
use super::state::{aggregate_outcome, infer_task_state, AtomicState, DownloadState};
use super::task::{FileInfo, FileKey};
use super::worker::{SegmentWorker, WorkerHost};
use crate::config::{prepare_save_dir, DownloadConfig};
use crate::error::DownloadError;
use crate::events::{spawn_dispatcher, DownloadListener, ProgressEvent, SnapshotSource, TaskMessage};
use crate::netclient::{resolve_file_name, resolve_file_size, RangeClient};
use crate::persistence::SegmentStore;

/// 一次 `start()` 对应的运行代
struct Generation {
    id: u64,
    barrier: Arc<RendezvousBarrier>,
    /// 暂停等待器，由屏障释放动作完成
    pause_rx: Option<oneshot::Receiver<DownloadState>>,
}

pub(crate) struct TaskInner {
    task_id: String,
    created_at: i64,
    config: DownloadConfig,
    identity: RwLock<FileKey>,
    state: AtomicState,
    finished_bytes: AtomicU64,
    finished_time_millis: AtomicU64,
    segments: RwLock<Vec<Arc<LiveSegment>>>,
    store: Arc<dyn SegmentStore>,
    client: Arc<dyn RangeClient>,
    runtime: Handle,
    events: mpsc::UnboundedSender<TaskMessage>,
    generation: Mutex<Option<Generation>>,
    next_generation: AtomicU64,
    sampler: Mutex<Option<ProgressSampler>>,
    /// 分段刚（重新）规划，start() 需要重新分配占位文件
    just_planned: AtomicBool,
    control: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// 下载任务控制器
///
/// 可廉价克隆，所有克隆共享同一个任务
#[derive(Clone)]
pub struct TaskController {
    inner: Arc<TaskInner>,
}

pub(crate) struct ControllerParts {
    pub key: FileKey,
    pub config: DownloadConfig,
    pub store: Arc<dyn SegmentStore>,
    pub client: Arc<dyn RangeClient>,
    pub listener: Arc<dyn DownloadListener>,
    pub runtime: Handle,
}

impl TaskController {
    pub(crate) fn new(parts: ControllerParts) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(TaskInner {
            task_id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp(),
            config: parts.config,
            identity: RwLock::new(parts.key),
            state: AtomicState::new(DownloadState::New),
            finished_bytes: AtomicU64::new(0),
            finished_time_millis: AtomicU64::new(0),
            segments: RwLock::new(Vec::new()),
            store: parts.store,
            client: parts.client,
            runtime: parts.runtime.clone(),
            events: tx,
            generation: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            sampler: Mutex::new(None),
            just_planned: AtomicBool::new(false),
            control: tokio::sync::Mutex::new(()),
            shutdown: shutdown.clone(),
        });

        let source: Weak<dyn SnapshotSource> = Arc::downgrade(&inner) as Weak<dyn SnapshotSource>;
        spawn_dispatcher(&parts.runtime, rx, source, parts.listener, shutdown);

        Self { inner }
    }

    /// 初始化任务（在运行时上异步执行）
    ///
    /// 仅 NEW / FAILED 状态有效；`start` 为 true 时初始化成功后立即开始下载
    pub fn init(&self, start: bool) -> JoinHandle<()> {
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            let _guard = inner.control.lock().await;

            if inner.has_generation() || !inner.state.load().can_init() {
                debug!("当前状态 {} 不允许初始化，忽略", inner.state.load());
                return;
            }

            if inner.init_locked().await && start {
                inner.start_locked().await;
            }
        })
    }

    /// 开始（或继续）下载
    pub async fn start(&self) {
        let _guard = self.inner.control.lock().await;
        self.inner.start_locked().await;
    }

    /// 暂停下载
    ///
    /// 立即把状态切换为 PAUSED，然后等待所有 worker 持久化进度、
    /// 屏障释放动作执行完毕后才返回
    pub async fn pause(&self) {
        let inner = &self.inner;
        if let Err(current) = inner.state.transition_if(|s| s.can_pause(), DownloadState::Paused) {
            debug!("当前状态 {} 不允许暂停，忽略", current);
            return;
        }
        info!("⏸ 暂停任务: {}", inner.file_label());

        let waiter = inner
            .generation
            .lock()
            .as_mut()
            .and_then(|g| g.pause_rx.take());

        match waiter {
            Some(rx) => {
                let outcome = rx.await.unwrap_or(DownloadState::Paused);
                debug!("暂停完成: 聚合状态={}", outcome);
            }
            None => {
                // 屏障已释放（聚合事件已发出），无需等待
                debug!("没有活跃的 worker，暂停立即返回");
            }
        }
    }

    /// 停止下载并删除分段记录和文件
    ///
    /// STARTED 时只设置状态，由 worker 退出后的屏障释放动作完成清理；
    /// PAUSED / SUCCEEDED / FAILED 时同步清理
    pub fn stop(&self) {
        let inner = &self.inner;
        let generation = inner.generation.lock();

        match inner.state.transition_if(|s| s.can_stop(), DownloadState::Stopped) {
            Ok(prev) => {
                info!("⏹ 停止任务: {} (原状态 {})", inner.file_label(), prev);
                // 有活跃 worker 时由屏障释放动作清理
                if generation.is_none() {
                    inner.discard_progress();
                    inner.send(TaskMessage::StateChanged(DownloadState::Stopped));
                }
            }
            Err(current) => debug!("当前状态 {} 不允许停止，忽略", current),
        }
    }

    /// 重置任务：删除分段记录和文件，计数清零，状态回到 NEW（不发事件）
    ///
    /// 下载进行中调用会被忽略
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// 任务ID
    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    /// 当前状态
    pub fn state(&self) -> DownloadState {
        self.inner.state.load()
    }

    /// 文件标识
    pub fn key(&self) -> FileKey {
        self.inner.identity.read().clone()
    }

    /// 文件信息快照
    pub fn file_info(&self) -> FileInfo {
        self.inner.file_info()
    }

    /// 分段快照
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.inner.segment_infos()
    }

    /// 已下载总字节数
    pub fn finished_bytes(&self) -> u64 {
        self.inner.finished_bytes.load(Ordering::SeqCst)
    }

    /// 是否有一代 worker 尚未全部退出
    pub fn is_active(&self) -> bool {
        self.inner.has_generation()
    }
}

impl std::fmt::Debug for TaskController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskController")
            .field("task_id", &self.inner.task_id)
            .field("state", &self.inner.state.load())
            .field("key", &*self.inner.identity.read())
            .finish()
    }
}

impl TaskInner {
    fn send(&self, message: TaskMessage) {
        if self.events.send(message).is_err() {
            debug!("事件分发任务已退出，丢弃消息");
        }
    }

    fn file_label(&self) -> String {
        let key = self.identity.read();
        if key.file_name.is_empty() {
            key.file_url.clone()
        } else {
            key.file_name.clone()
        }
    }

    fn has_generation(&self) -> bool {
        self.generation.lock().is_some()
    }

    fn file_info(&self) -> FileInfo {
        FileInfo {
            task_id: self.task_id.clone(),
            key: self.identity.read().clone(),
            state: self.state.load(),
            finished_bytes: self.finished_bytes.load(Ordering::SeqCst),
            finished_time_millis: self.finished_time_millis.load(Ordering::SeqCst),
            created_at: self.created_at,
        }
    }

    fn segment_infos(&self) -> Vec<SegmentInfo> {
        let key = self.identity.read().clone();
        self.segments.read().iter().map(|s| s.snapshot(&key)).collect()
    }

    /// 初始化失败 / 启动失败
    fn fail(&self, error: DownloadError) {
        error!("❌ 任务失败: {}: {}", self.file_label(), error);
        self.state.store(DownloadState::Failed);
        self.send(TaskMessage::Error(error));
        self.send(TaskMessage::StateChanged(DownloadState::Failed));
    }

    async fn init_locked(self: &Arc<Self>) -> bool {
        match self.init_inner().await {
            Ok(state) => {
                info!("✅ 任务初始化完成: {} → {}", self.file_label(), state);
                self.send(TaskMessage::StateChanged(state));
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    async fn init_inner(&self) -> Result<DownloadState, DownloadError> {
        let mut key = self.identity.read().clone();

        // 1. 校验地址
        if key.file_url.trim().is_empty() {
            return Err(DownloadError::InvalidUrl("下载地址为空".to_string()));
        }

        // 2. 准备保存目录
        let dir = if key.save_path.as_os_str().is_empty() {
            self.config.default_save_dir.clone()
        } else {
            key.save_path.clone()
        };
        key.save_path = prepare_save_dir(&dir)?;

        // 3. 文件名或大小未知时探测
        if !key.is_resolved() {
            let probe = self
                .client
                .probe(&key.file_url, self.config.connect_timeout())
                .await?;
            if probe.status != 200 {
                return Err(DownloadError::UnexpectedStatus {
                    expected: 200,
                    actual: probe.status,
                });
            }
            if key.file_name.is_empty() {
                key.file_name = resolve_file_name(&probe)?;
            }
            if key.file_size == 0 {
                key.file_size = resolve_file_size(&probe)?;
            }
            info!("探测完成: {} ({} bytes)", key.file_name, key.file_size);
        }

        *self.identity.write() = key.clone();

        // 4. 加载已有分段，没有则重新规划
        let rows = self.store.load_all(&key)?;
        if rows.is_empty() {
            self.plan(&key)?;
            return Ok(DownloadState::Initialized);
        }

        let live: Vec<Arc<LiveSegment>> = rows
            .iter()
            .map(|row| Arc::new(LiveSegment::from_info(row)))
            .collect();
        let finished: u64 = live.iter().map(|s| s.finished_bytes()).sum();
        let elapsed = live
            .iter()
            .map(|s| s.finished_time_millis())
            .max()
            .unwrap_or(0);
        let state = infer_task_state(live.iter().map(|s| s.state()));

        info!(
            "从存储恢复 {} 个分段: {} ({}/{} bytes, 推断状态 {})",
            live.len(),
            key.file_name,
            finished,
            key.file_size,
            state
        );

        *self.segments.write() = live;
        self.finished_bytes.store(finished, Ordering::SeqCst);
        self.finished_time_millis.store(elapsed, Ordering::SeqCst);
        self.just_planned.store(false, Ordering::SeqCst);
        self.state.store(state);
        Ok(state)
    }

    /// 规划分段并全部持久化；任一行保存失败时回滚已保存的行
    fn plan(&self, key: &FileKey) -> Result<(), DownloadError> {
        self.store.delete_all(key)?;

        let ranges = plan_segments(
            key.file_size,
            self.config.thread_count,
            self.config.min_segment_bytes,
            self.config.max_segments,
        );

        let mut live = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            let mut info = SegmentInfo::planned(key.clone(), start, end);
            match self.store.save(&info) {
                Ok(id) => info.id = id,
                Err(e) => {
                    if let Err(rollback) = self.store.delete_all(key) {
                        warn!("回滚分段记录失败: {}", rollback);
                    }
                    return Err(e);
                }
            }
            live.push(Arc::new(LiveSegment::fresh(&info)));
        }

        info!("规划了 {} 个分段: {} ({} bytes)", live.len(), key.file_name, key.file_size);

        *self.segments.write() = live;
        self.finished_bytes.store(0, Ordering::SeqCst);
        self.finished_time_millis.store(0, Ordering::SeqCst);
        self.just_planned.store(true, Ordering::SeqCst);
        self.state.store(DownloadState::Initialized);
        Ok(())
    }

    /// 重新规划并发布 INITIALIZED
    fn replan(&self) -> bool {
        let key = self.identity.read().clone();
        match self.plan(&key) {
            Ok(()) => {
                self.send(TaskMessage::StateChanged(DownloadState::Initialized));
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    async fn start_locked(self: &Arc<Self>) {
        if self.has_generation() {
            warn!("⚠️ 上一轮下载尚未结束，忽略 start(): {}", self.file_label());
            return;
        }

        let mut state = self.state.load();
        let needs_init = state == DownloadState::New
            || (state == DownloadState::Failed && self.segments.read().is_empty());
        if needs_init {
            if !self.init_locked().await {
                return;
            }
            state = self.state.load();
        }

        if !state.can_start() {
            debug!("任务已在下载中，忽略 start()");
            return;
        }
        match state {
            DownloadState::Stopped => {
                if !self.replan() {
                    return;
                }
            }
            DownloadState::Succeeded => {
                // 已完成的任务重新下载
                self.reset();
                if !self.replan() {
                    return;
                }
            }
            _ => {}
        }

        let mut key = self.identity.read().clone();

        // 恢复的进度只对原文件有效，文件丢失时重新规划
        if !self.just_planned.load(Ordering::SeqCst)
            && self.finished_bytes.load(Ordering::SeqCst) > 0
            && !key.save_file().exists()
        {
            warn!("⚠️ 文件已被删除，已下载进度作废: {:?}", key.save_file());
            if !self.replan() {
                return;
            }
            key = self.identity.read().clone();
        }

        // 分段刚规划或文件不存在时分配占位文件
        if self.just_planned.load(Ordering::SeqCst) || !key.save_file().exists() {
            if let Err(e) = allocate_file(&key).await {
                self.fail(e);
                return;
            }
            self.just_planned.store(false, Ordering::SeqCst);
        }

        // 准备期间 stop() 可能已清理进度，只从可续传的状态启动
        let expected = self.state.load();
        if !matches!(
            expected,
            DownloadState::Initialized | DownloadState::Paused | DownloadState::Failed
        ) {
            debug!("启动前状态变为 {}，放弃启动", expected);
            return;
        }

        let participants: Vec<Arc<LiveSegment>> = self
            .segments
            .read()
            .iter()
            .filter(|s| s.state() != DownloadState::Succeeded)
            .cloned()
            .collect();

        if participants.is_empty() {
            let _generation = self.generation.lock();
            if self.state.transition(expected, DownloadState::Succeeded) {
                info!("✅ 所有分段均已完成: {}", key.file_name);
                self.send(TaskMessage::StateChanged(DownloadState::Succeeded));
            }
            return;
        }

        // 新的一代：屏障 + 暂停等待器
        let generation_id = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (pause_tx, pause_rx) = oneshot::channel();
        let weak = Arc::downgrade(self);
        let members = participants.clone();
        let barrier = Arc::new(RendezvousBarrier::new(
            participants.len(),
            Box::new(move || {
                let aggregate = aggregate_outcome(members.iter().map(|s| s.state()));
                let outcome = match weak.upgrade() {
                    Some(task) => task.on_generation_released(generation_id, aggregate),
                    None => aggregate,
                };
                let _ = pause_tx.send(outcome);
            }),
        ));

        let generation = Generation {
            id: generation_id,
            barrier: barrier.clone(),
            pause_rx: Some(pause_rx),
        };
        if !self.install_generation(expected, generation) {
            warn!("⚠️ 启动期间任务状态已改变，放弃启动: {}", self.file_label());
            return;
        }
        self.restart_sampler();

        info!(
            "🚀 开始下载: {} (第 {} 轮, {} 个分段)",
            key.file_name,
            generation_id,
            participants.len()
        );

        let host: Arc<dyn WorkerHost> = Arc::new(GenerationHost {
            task: Arc::downgrade(self),
            failure_reported: AtomicBool::new(false),
        });

        for segment in participants {
            let worker = SegmentWorker {
                segment,
                key: key.clone(),
                client: self.client.clone(),
                store: self.store.clone(),
                host: host.clone(),
                barrier: barrier.clone(),
                buffer_size: self.config.buffer_size,
                connect_timeout: self.config.connect_timeout(),
            };
            self.runtime.spawn(worker.run());
        }
    }

    /// 在 `generation` 锁内把状态从 `expected` 切换为 STARTED 并登记新一代
    ///
    /// stop() 持有同一把锁，二者不会交错；状态已不是 `expected` 时返回 false
    fn install_generation(&self, expected: DownloadState, generation: Generation) -> bool {
        let mut slot = self.generation.lock();
        if slot.is_some() || !self.state.transition(expected, DownloadState::Started) {
            return false;
        }
        *slot = Some(generation);
        self.send(TaskMessage::StateChanged(DownloadState::Started));
        true
    }

    fn restart_sampler(self: &Arc<Self>) {
        let source: Arc<dyn SampleSource> = Arc::new(TaskSampleSource(Arc::downgrade(self)));
        let events = self.events.clone();
        let sampler = ProgressSampler::spawn(
            &self.runtime,
            self.config.progress_interval(),
            source,
            Box::new(move |delta_time, delta_bytes| {
                let _ = events.send(TaskMessage::Progress(ProgressEvent::new(
                    delta_time,
                    delta_bytes,
                )));
            }),
        );

        if let Some(old) = self.sampler.lock().replace(sampler) {
            old.stop();
        }
    }

    /// 屏障释放动作：由最后一个退出的 worker 调用
    fn on_generation_released(&self, generation_id: u64, aggregate: DownloadState) -> DownloadState {
        let mut generation = self.generation.lock();

        // stop() 优先于 worker 的汇合结果
        let outcome = if self.state.load() == DownloadState::Stopped {
            DownloadState::Stopped
        } else {
            aggregate
        };

        if generation.as_ref().map(|g| g.id) == Some(generation_id) {
            generation.take();
        }
        if let Some(sampler) = self.sampler.lock().take() {
            sampler.stop();
        }

        self.state.store(outcome);
        if outcome == DownloadState::Stopped {
            self.discard_progress();
        } else {
            let finished: u64 = self.segments.read().iter().map(|s| s.finished_bytes()).sum();
            self.finished_bytes.store(finished, Ordering::SeqCst);
        }

        info!("第 {} 轮下载结束: {} → {}", generation_id, self.file_label(), outcome);
        self.send(TaskMessage::StateChanged(outcome));
        outcome
    }

    /// 删除分段记录和文件，计数清零
    ///
    /// 调用方须持有 `generation` 锁或保证没有活跃的 worker
    fn discard_progress(&self) {
        if let Some(sampler) = self.sampler.lock().take() {
            sampler.stop();
        }

        let key = self.identity.read().clone();
        if let Err(e) = self.store.delete_all(&key) {
            warn!("删除分段记录失败: {}", e);
            self.send(TaskMessage::Error(e));
        }

        if !key.file_name.is_empty() {
            let path = key.save_file();
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("已删除文件: {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("删除文件失败 {:?}: {}", path, e);
                    self.send(TaskMessage::Error(DownloadError::FileDeleteFailed(format!(
                        "{:?}: {}",
                        path, e
                    ))));
                }
            }
        }

        self.segments.write().clear();
        self.finished_bytes.store(0, Ordering::SeqCst);
        self.finished_time_millis.store(0, Ordering::SeqCst);
        self.just_planned.store(false, Ordering::SeqCst);
    }

    fn reset(&self) -> bool {
        let generation = self.generation.lock();
        if generation.is_some() {
            warn!("⚠️ 下载进行中，忽略 reset()");
            return false;
        }

        self.discard_progress();
        self.state.store(DownloadState::New);
        debug!("任务已重置: {}", self.file_label());
        true
    }
}

impl SnapshotSource for TaskInner {
    fn current_state(&self) -> DownloadState {
        self.state.load()
    }

    fn snapshot(&self) -> (FileInfo, Vec<SegmentInfo>) {
        (self.file_info(), self.segment_infos())
    }
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(sampler) = self.sampler.get_mut().take() {
            sampler.stop();
        }
    }
}

/// 一代 worker 共享的回调
struct GenerationHost {
    task: Weak<TaskInner>,
    /// 每一代只上报第一次失败
    failure_reported: AtomicBool,
}

impl WorkerHost for GenerationHost {
    fn task_state(&self) -> DownloadState {
        // 任务已释放时按暂停处理，保留进度
        self.task
            .upgrade()
            .map(|t| t.state.load())
            .unwrap_or(DownloadState::Paused)
    }

    fn on_bytes(&self, n: u64) {
        if let Some(task) = self.task.upgrade() {
            task.finished_bytes.fetch_add(n, Ordering::SeqCst);
        }
    }

    fn on_failure(&self, segment: &LiveSegment, error: DownloadError) {
        let Some(task) = self.task.upgrade() else {
            return;
        };

        if self.failure_reported.swap(true, Ordering::SeqCst) {
            warn!("分段 #{} 失败（本轮已上报过错误）: {}", segment.id(), error);
            return;
        }

        let _ = task.state.transition_if(
            |s| matches!(s, DownloadState::Started | DownloadState::Paused),
            DownloadState::Failed,
        );
        task.send(TaskMessage::Error(error));
    }
}

struct TaskSampleSource(Weak<TaskInner>);

impl SampleSource for TaskSampleSource {
    fn finished_bytes(&self) -> u64 {
        self.0
            .upgrade()
            .map(|t| t.finished_bytes.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn is_running(&self) -> bool {
        self.0
            .upgrade()
            .map(|t| t.state.load() == DownloadState::Started)
            .unwrap_or(false)
    }

    fn add_finished_time(&self, millis: u64) {
        if let Some(task) = self.0.upgrade() {
            // 停止后计数已清零，不再累加
            if task.state.load() != DownloadState::Stopped {
                task.finished_time_millis.fetch_add(millis, Ordering::SeqCst);
            }
        }
    }
}

/// 分配占位文件：删除旧文件后按完整大小重新创建
async fn allocate_file(key: &FileKey) -> Result<(), DownloadError> {
    let path = key.save_file();

    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!("删除旧文件: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(DownloadError::FileDeleteFailed(format!("{:?}: {}", path, e)));
        }
    }

    let file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| DownloadError::from_file_open(&path, &e))?;
    file.set_len(key.file_size)
        .await
        .map_err(|e| DownloadError::FileWriteFailed(format!("{:?}: {}", path, e)))?;

    debug!("预分配文件: {:?}, 大小: {} bytes", path, key.file_size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelListener, DownloadEvent};
    use crate::netclient::{ProbeResponse, RangeResponse};
    use crate::persistence::MemorySegmentStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    /// 只会探测失败的客户端
    struct Unreachable;

    #[async_trait]
    impl RangeClient for Unreachable {
        async fn probe(&self, url: &str, _timeout: Duration) -> Result<ProbeResponse, DownloadError> {
            Err(DownloadError::UnknownHost(url.to_string()))
        }

        async fn open_range(
            &self,
            url: &str,
            _start: u64,
            _end: u64,
            _timeout: Duration,
        ) -> Result<RangeResponse, DownloadError> {
            Err(DownloadError::ConnectIo(url.to_string()))
        }
    }

    fn controller(
        key: FileKey,
        store: Arc<MemorySegmentStore>,
    ) -> (TaskController, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (listener, rx) = ChannelListener::new();
        let controller = TaskController::new(ControllerParts {
            key,
            config: DownloadConfig::default(),
            store,
            client: Arc::new(Unreachable),
            listener: Arc::new(listener),
            runtime: Handle::current(),
        });
        (controller, rx)
    }

    #[tokio::test]
    async fn test_illegal_calls_are_ignored() {
        let (task, mut rx) = controller(FileKey::default(), Arc::new(MemorySegmentStore::new()));

        task.pause().await;
        task.stop();
        task.reset();
        assert_eq!(task.state(), DownloadState::New);

        // 没有任何事件
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_init_probe_failure_moves_to_failed() {
        let dir = TempDir::new().unwrap();
        let key = FileKey {
            file_url: "http://unknown.invalid/file.bin".to_string(),
            save_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let (task, mut rx) = controller(key, Arc::new(MemorySegmentStore::new()));

        task.init(false).await.unwrap();
        assert_eq!(task.state(), DownloadState::Failed);

        match rx.recv().await.unwrap() {
            DownloadEvent::Error { kind, .. } => {
                assert_eq!(kind, crate::error::DownloadErrorKind::UnknownHost)
            }
            other => panic!("意外的事件: {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            DownloadEvent::StateChanged { state: DownloadState::Failed, .. }
        ));
    }

    #[tokio::test]
    async fn test_restore_without_network() {
        let dir = TempDir::new().unwrap();
        let key = FileKey {
            file_url: "http://example.com/file.bin".to_string(),
            file_name: "file.bin".to_string(),
            file_size: 100,
            save_path: dir.path().to_path_buf(),
        };

        let store = Arc::new(MemorySegmentStore::new());
        let mut first = SegmentInfo::planned(key.clone(), 0, 49);
        first.finished_bytes = 50;
        first.finished_time_millis = 300;
        first.state = DownloadState::Succeeded;
        store.save(&first).unwrap();
        let mut second = SegmentInfo::planned(key.clone(), 50, 99);
        second.finished_bytes = 10;
        second.finished_time_millis = 200;
        second.state = DownloadState::Started;
        store.save(&second).unwrap();

        let (task, mut rx) = controller(key, store);
        task.init(false).await.unwrap();

        // 名称和大小已知，不会探测网络
        assert_eq!(task.state(), DownloadState::Paused);
        let info = task.file_info();
        assert_eq!(info.finished_bytes, 60);
        assert_eq!(info.finished_time_millis, 300);
        assert!(matches!(
            rx.recv().await.unwrap(),
            DownloadEvent::StateChanged { state: DownloadState::Paused, .. }
        ));

        // init 对非 NEW/FAILED 状态幂等
        task.init(false).await.unwrap();
        assert_eq!(task.segments().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_install_requires_expected_state() {
        let (task, mut rx) = controller(FileKey::default(), Arc::new(MemorySegmentStore::new()));
        let generation = || Generation {
            id: 1,
            barrier: Arc::new(RendezvousBarrier::new(1, Box::new(|| {}))),
            pause_rx: None,
        };

        // 准备期间已被 stop()
        task.inner.state.store(DownloadState::Stopped);
        assert!(!task.inner.install_generation(DownloadState::Paused, generation()));
        assert_eq!(task.state(), DownloadState::Stopped);
        assert!(!task.is_active());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        task.inner.state.store(DownloadState::Paused);
        assert!(task.inner.install_generation(DownloadState::Paused, generation()));
        assert_eq!(task.state(), DownloadState::Started);
        assert!(task.is_active());
        assert!(matches!(
            rx.recv().await.unwrap(),
            DownloadEvent::StateChanged { state: DownloadState::Started, .. }
        ));

        // 同一时刻只允许一代
        task.inner.state.store(DownloadState::Paused);
        assert!(!task.inner.install_generation(DownloadState::Paused, generation()));
    }

    #[tokio::test]
    async fn test_start_with_deleted_file_discards_restored_progress() {
        let dir = TempDir::new().unwrap();
        let key = FileKey {
            file_url: "http://example.com/file.bin".to_string(),
            file_name: "file.bin".to_string(),
            file_size: 100,
            save_path: dir.path().to_path_buf(),
        };
        let store = Arc::new(MemorySegmentStore::new());
        let mut row = SegmentInfo::planned(key.clone(), 0, 99);
        row.finished_bytes = 40;
        row.state = DownloadState::Paused;
        store.save(&row).unwrap();

        let (task, mut rx) = controller(key.clone(), store.clone());
        task.init(false).await.unwrap();
        assert_eq!(task.finished_bytes(), 40);
        assert!(!key.save_file().exists());

        task.start().await;

        let mut states = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            if let DownloadEvent::StateChanged { state, .. } = event {
                states.push(state);
                if state == DownloadState::Failed {
                    break;
                }
            }
        }
        assert_eq!(
            states,
            vec![
                DownloadState::Paused,
                DownloadState::Initialized,
                DownloadState::Started,
                DownloadState::Failed
            ]
        );

        // 旧进度作废，占位文件按原大小重建
        assert_eq!(task.finished_bytes(), 0);
        assert!(store.load_all(&key).unwrap().iter().all(|r| r.finished_bytes == 0));
        assert_eq!(std::fs::metadata(key.save_file()).unwrap().len(), 100);
    }
}
