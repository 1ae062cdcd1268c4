//! 音频格式
//!
//! 内部样本统一为交错（interleaved）f32，范围 [-1.0, 1.0]。
//! 位置和长度以帧为单位计数，对外换算为 `Duration`。

use std::time::Duration;

/// 音频格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// 每帧的样本数（= 声道数）
    #[inline]
    pub fn samples_per_frame(&self) -> usize {
        self.channels as usize
    }

    /// 帧数 → 时长
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let rate = self.sample_rate as u64;
        let secs = frames / rate;
        let rem = frames % rate;
        // 余数部分按纳秒换算，避免大帧数时的 f64 精度损失
        Duration::new(secs, ((rem * 1_000_000_000) / rate) as u32)
    }

    /// 时长 → 帧数（向下取整）
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        let rate = self.sample_rate as u128;
        (duration.as_nanos() * rate / 1_000_000_000) as u64
    }

    /// 是否为单声道
    #[inline]
    pub fn is_mono(&self) -> bool {
        self.channels == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_to_duration() {
        let format = AudioFormat::new(48000, 2);
        assert_eq!(format.frames_to_duration(48000), Duration::from_secs(1));
        assert_eq!(format.frames_to_duration(24000), Duration::from_millis(500));
        assert_eq!(format.frames_to_duration(0), Duration::ZERO);
    }

    #[test]
    fn test_duration_to_frames() {
        let format = AudioFormat::new(44100, 1);
        assert_eq!(format.duration_to_frames(Duration::from_secs(2)), 88200);
        assert_eq!(format.duration_to_frames(Duration::from_micros(10)), 0);
        assert_eq!(format.duration_to_frames(Duration::from_millis(10)), 441);
    }

    #[test]
    fn test_conversion_is_stable_for_exact_frames() {
        let format = AudioFormat::new(44100, 2);
        for frames in [1u64, 441, 44099, 44100, 1_000_000] {
            let duration = format.frames_to_duration(frames);
            // 纳秒截断最多损失一帧
            let back = format.duration_to_frames(duration);
            assert!(frames - back <= 1, "frames={} back={}", frames, back);
        }
    }

    #[test]
    fn test_zero_rate_is_harmless() {
        let format = AudioFormat::new(0, 2);
        assert_eq!(format.frames_to_duration(1000), Duration::ZERO);
        assert_eq!(format.duration_to_frames(Duration::from_secs(1)), 0);
    }
}
