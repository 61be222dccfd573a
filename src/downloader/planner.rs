//! 分段规划
//!
//! 根据文件大小、请求线程数、最小分段大小和最大分段数计算分段边界

use tracing::debug;

/// 默认最小分段大小: 5MB
pub const DEFAULT_MIN_SEGMENT_BYTES: u64 = 5 * 1024 * 1024;

/// 默认最大分段数
pub const DEFAULT_MAX_SEGMENTS: usize = 100;

/// 计算分段，返回 `(start, end)` 闭区间列表
///
/// 分段数取 `file_size / optimal` 向下取整（而不是向上取整），余数并入最后一段。
/// 向上取整会把不足 `optimal` 的余数单独成段，得到小于最小分段大小的尾段；
/// 向下取整保证每段长度不小于 `min(min_segment_bytes, file_size)`。
/// 例如 11MB / 5 线程 / 最小 5MB 得到两段，而不是 5MB + 5MB + 1MB 三段。
///
/// 空文件返回空列表
pub fn plan_segments(
    file_size: u64,
    thread_count: usize,
    min_segment_bytes: u64,
    max_segments: usize,
) -> Vec<(u64, u64)> {
    if file_size == 0 {
        return Vec::new();
    }

    let threads = thread_count.max(1) as u64;
    let max_segments = max_segments.max(1) as u64;

    let naive = file_size / threads;
    let mut optimal = naive.max(min_segment_bytes).min(file_size).max(1);
    let mut count = (file_size / optimal).max(1);

    if count > max_segments {
        count = max_segments;
        optimal = file_size / count;
    }

    let mut ranges = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * optimal;
        let end = if i == count - 1 {
            file_size - 1
        } else {
            start + optimal - 1
        };
        ranges.push((start, end));
    }

    debug!(
        "分段规划: 文件大小={} bytes, 线程数={}, 分段数={}, 分段大小={}",
        file_size, threads, count, optimal
    );

    ranges
}
