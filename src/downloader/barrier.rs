use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// 释放动作
pub type ReleaseAction = Box<dyn FnOnce() + Send + 'static>;

/// 单次使用的 N 方汇合屏障
///
/// 每个参与方调用一次 [`arrive`](Self::arrive)，最后到达者在自己的线程上
/// 执行释放动作，且只执行一次。每次 `start()` 都新建一个实例
pub struct RendezvousBarrier {
    parties: usize,
    remaining: AtomicUsize,
    action: Mutex<Option<ReleaseAction>>,
    released: AtomicBool,
    notify: Notify,
}

impl RendezvousBarrier {
    /// 创建屏障；参与方为 0 时立即执行释放动作
    pub fn new(parties: usize, action: ReleaseAction) -> Self {
        let barrier = Self {
            parties,
            remaining: AtomicUsize::new(parties),
            action: Mutex::new(Some(action)),
            released: AtomicBool::new(false),
            notify: Notify::new(),
        };
        if parties == 0 {
            barrier.release();
        }
        barrier
    }

    /// 尚未到达的参与方数量
    pub fn waiting(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// 到达屏障，最后一个到达者返回 true
    pub fn arrive(&self) -> bool {
        let result = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match result {
            Ok(1) => {
                self.release();
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!("⚠️ 屏障已释放，忽略多余的到达");
                false
            }
        }
    }

    /// 到达并等待释放
    pub async fn arrive_and_wait(&self) -> bool {
        let last = self.arrive();
        self.wait_released().await;
        last
    }

    /// 等待释放动作执行完毕
    pub async fn wait_released(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if let Some(action) = self.action.lock().take() {
            action();
        }
        self.released.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl std::fmt::Debug for RendezvousBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousBarrier")
            .field("parties", &self.parties)
            .field("remaining", &self.waiting())
            .field("released", &self.is_released())
            .finish()
    }
}
