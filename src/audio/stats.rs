//! 播放统计模块
//!
//! 在输出回调中收集，全部是 Relaxed 原子计数，不影响实时路径

use std::sync::atomic::{AtomicU64, Ordering};

/// 播放统计收集器
#[derive(Debug, Default)]
pub struct PlaybackStats {
    callback_count: AtomicU64,
    frames_rendered: AtomicU64,
    underrun_count: AtomicU64,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn on_callback(&self) {
        self.callback_count.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录 underrun（播放中但源没有及时供给数据）
    #[inline]
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_frames_rendered(&self, frames: u64) {
        self.frames_rendered.fetch_add(frames, Ordering::Relaxed);
    }

    #[inline]
    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// 生成快照
    pub fn report(&self) -> StatsReport {
        StatsReport {
            callbacks: self.callback_count(),
            frames_rendered: self.frames_rendered(),
            underruns: self.underrun_count(),
        }
    }
}

/// 统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsReport {
    pub callbacks: u64,
    pub frames_rendered: u64,
    pub underruns: u64,
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "callbacks: {} | frames: {} | underruns: {}",
            self.callbacks, self.frames_rendered, self.underruns
        )
    }
}
