//! 播放器配置

use crate::audio::OutputConfig;

/// 播放器配置
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// 输出设备配置
    pub output: OutputConfig,
    /// 媒体后端 ring buffer 长度（毫秒）
    pub buffer_ms: u32,
    /// 媒体后端预缓冲比例，达到后才报告就绪
    pub prebuffer_ratio: f32,
    /// clip 后端允许载入内存的最大帧数
    pub max_clip_frames: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            buffer_ms: 2000,
            prebuffer_ratio: 0.5,
            // 48kHz 下 10 分钟
            max_clip_frames: 48_000 * 60 * 10,
        }
    }
}

impl PlayerConfig {
    /// ring buffer 容量（样本数）
    pub(crate) fn ring_samples(&self, sample_rate: u32, channels: u16) -> usize {
        let frames = sample_rate as u64 * self.buffer_ms.max(50) as u64 / 1000;
        (frames * channels.max(1) as u64) as usize
    }

    /// 预缓冲目标（样本数）
    pub(crate) fn prebuffer_samples(&self, capacity: usize) -> usize {
        (capacity as f32 * self.prebuffer_ratio.clamp(0.0, 1.0)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sizing() {
        let config = PlayerConfig::default();
        assert_eq!(config.ring_samples(44100, 2), 176_400);
        assert_eq!(config.prebuffer_samples(1000), 500);

        let tiny = PlayerConfig {
            buffer_ms: 0,
            prebuffer_ratio: 3.0,
            ..Default::default()
        };
        assert_eq!(tiny.ring_samples(8000, 1), 400);
        assert_eq!(tiny.prebuffer_samples(1000), 1000);
    }
}
