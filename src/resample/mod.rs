//! 重采样模块
//!
//! 默认策略：请求设备直接运行在源采样率，走直通路径。
//! 设备不支持源采样率时，输出回调在设备默认采样率下运行，用 rubato 的 sinc 重采样器补偿。

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::audio::FrameSource;

/// 每次送入 rubato 的输入帧数
const CHUNK_FRAMES: usize = 512;

/// 重采样错误
#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("Failed to create resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
}

/// 重采样器
///
/// 从帧源拉取数据，按输出采样率写入交错样本（声道数与源相同）
pub trait Resampler: Send {
    /// 填充 `output`，返回写入的帧数；少于请求表示源暂时或永久没有数据
    fn process(&mut self, source: &mut dyn FrameSource, output: &mut [f32]) -> usize;

    /// 丢弃内部缓存（seek 之后调用）
    fn reset(&mut self);
}

/// 直通重采样器（不做任何处理）
pub struct PassthroughResampler;

impl Resampler for PassthroughResampler {
    fn process(&mut self, source: &mut dyn FrameSource, output: &mut [f32]) -> usize {
        source.read(output)
    }

    fn reset(&mut self) {}
}

/// 源结束后的收尾阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Streaming,
    /// 最后一个不完整的输入块已处理，还要冲出滤波器延迟
    Draining,
    Done,
}

/// 流式 sinc 重采样器
///
/// 输入攒满一个块后交给 rubato 处理，输出缓存在平面缓冲里逐帧交付。
/// 开头丢弃滤波器延迟对应的输出帧，源结束时按输入帧数截断尾部补零，
/// 总输出帧数与 `输入帧数 × 采样率比` 一致。
pub struct SincResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    ratio: f64,
    /// 从源读取的交错样本
    chunk: Vec<f32>,
    /// 平面输入块
    input: Vec<Vec<f32>>,
    gathered: usize,
    /// 平面输出块，`out_pos..out_len` 尚未交付
    output: Vec<Vec<f32>>,
    out_pos: usize,
    out_len: usize,
    /// 还要丢弃的延迟帧
    skip: usize,
    frames_in: u64,
    frames_out: u64,
    tail: Tail,
}

impl SincResampler {
    pub fn new(source_rate: u32, output_rate: u32, channels: usize) -> Result<Self, ResampleError> {
        let channels = channels.max(1);
        let ratio = output_rate as f64 / source_rate.max(1) as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, channels)?;

        let input_frames = inner.input_frames_max();
        let output_frames = inner.output_frames_max();
        let skip = inner.output_delay();

        Ok(Self {
            inner,
            channels,
            ratio,
            chunk: vec![0.0; input_frames * channels],
            input: vec![vec![0.0; input_frames]; channels],
            gathered: 0,
            output: vec![vec![0.0; output_frames]; channels],
            out_pos: 0,
            out_len: 0,
            skip,
            frames_in: 0,
            frames_out: 0,
            tail: Tail::Streaming,
        })
    }

    fn expected_frames(&self) -> u64 {
        (self.frames_in as f64 * self.ratio).ceil() as u64
    }

    /// 攒一个输入块并处理；返回 false 表示暂时（或永久）没有新输出
    fn refill(&mut self, source: &mut dyn FrameSource) -> bool {
        if self.tail != Tail::Streaming {
            return self.finish();
        }

        let ch = self.channels;
        let needed = self.inner.input_frames_next();
        while self.gathered < needed {
            let want = (needed - self.gathered) * ch;
            let frames = source.read(&mut self.chunk[..want]);
            if frames == 0 {
                if source.is_finished() {
                    return self.finish();
                }
                return false;
            }
            for (i, frame) in self.chunk[..frames * ch].chunks_exact(ch).enumerate() {
                for (c, &sample) in frame.iter().enumerate() {
                    self.input[c][self.gathered + i] = sample;
                }
            }
            self.gathered += frames;
            self.frames_in += frames as u64;
        }

        let result = self
            .inner
            .process_into_buffer(&self.input, &mut self.output, None);
        self.gathered = 0;
        self.take_output(result)
    }

    fn finish(&mut self) -> bool {
        match self.tail {
            Tail::Streaming => {
                let gathered = self.gathered;
                let result = if gathered > 0 {
                    let partial: Vec<&[f32]> =
                        self.input.iter().map(|channel| &channel[..gathered]).collect();
                    self.inner
                        .process_partial_into_buffer(Some(partial.as_slice()), &mut self.output, None)
                } else {
                    self.inner.process_partial_into_buffer(
                        None::<&[Vec<f32>]>,
                        &mut self.output,
                        None,
                    )
                };
                self.gathered = 0;
                self.tail = Tail::Draining;
                self.take_output(result)
            }
            Tail::Draining => {
                self.tail = Tail::Done;
                if self.frames_out >= self.expected_frames() {
                    return false;
                }
                let result = self.inner.process_partial_into_buffer(
                    None::<&[Vec<f32>]>,
                    &mut self.output,
                    None,
                );
                self.take_output(result)
            }
            Tail::Done => false,
        }
    }

    fn take_output(&mut self, result: Result<(usize, usize), rubato::ResampleError>) -> bool {
        match result {
            Ok((_, frames)) => {
                let skipped = self.skip.min(frames);
                self.skip -= skipped;
                self.out_pos = skipped;
                self.out_len = frames;
                if self.tail != Tail::Streaming {
                    // 尾部补零产生的多余帧
                    let room = self.expected_frames().saturating_sub(self.frames_out) as usize;
                    self.out_len = (self.out_pos + room).min(frames);
                }
                true
            }
            Err(e) => {
                log::warn!("Resampling failed: {}", e);
                self.tail = Tail::Done;
                false
            }
        }
    }
}

impl Resampler for SincResampler {
    fn process(&mut self, source: &mut dyn FrameSource, output: &mut [f32]) -> usize {
        let ch = self.channels;
        let frames_out = output.len() / ch;
        let mut written = 0;

        while written < frames_out {
            if self.out_pos < self.out_len {
                let n = (self.out_len - self.out_pos).min(frames_out - written);
                let dst = &mut output[written * ch..(written + n) * ch];
                for (i, frame) in dst.chunks_exact_mut(ch).enumerate() {
                    for (c, sample) in frame.iter_mut().enumerate() {
                        *sample = self.output[c][self.out_pos + i];
                    }
                }
                self.out_pos += n;
                self.frames_out += n as u64;
                written += n;
            } else if !self.refill(source) {
                break;
            }
        }

        written
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.gathered = 0;
        self.out_pos = 0;
        self.out_len = 0;
        self.skip = self.inner.output_delay();
        self.frames_in = 0;
        self.frames_out = 0;
        self.tail = Tail::Streaming;
    }
}

/// 根据源/输出采样率选择重采样器
pub fn for_rates(
    source_rate: u32,
    output_rate: u32,
    channels: usize,
) -> Result<Box<dyn Resampler>, ResampleError> {
    if source_rate == output_rate {
        return Ok(Box::new(PassthroughResampler));
    }
    log::info!("Resampling {}Hz → {}Hz (sinc)", source_rate, output_rate);
    Ok(Box::new(SincResampler::new(source_rate, output_rate, channels)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::testing::VecSource;
    use crate::audio::AudioFormat;

    /// 一直读到重采样器返回不足一个缓冲
    fn drain(resampler: &mut dyn Resampler, source: &mut VecSource, channels: usize) -> Vec<f32> {
        let mut all = Vec::new();
        let mut out = vec![0.0f32; 256 * channels];
        loop {
            let frames = resampler.process(source, &mut out);
            all.extend_from_slice(&out[..frames * channels]);
            if frames < 256 {
                return all;
            }
        }
    }

    #[test]
    fn test_passthrough_copies_source() {
        let mut source = VecSource::new(AudioFormat::new(48000, 1), vec![0.1, 0.2, 0.3]);
        let mut resampler = PassthroughResampler;
        let mut out = [0.0f32; 4];
        assert_eq!(resampler.process(&mut source, &mut out), 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_upsample_doubles_frame_count() {
        let mut source = VecSource::new(AudioFormat::new(22050, 1), vec![0.5; 2000]);
        let mut resampler = SincResampler::new(22050, 44100, 1).unwrap();

        let output = drain(&mut resampler, &mut source, 1);
        assert!(
            (3990..=4000).contains(&output.len()),
            "frames = {}",
            output.len()
        );
        // 稳态部分保持直流电平
        for &sample in &output[500..3500] {
            assert!((sample - 0.5).abs() < 0.02, "sample = {}", sample);
        }
    }

    #[test]
    fn test_downsample_stereo_keeps_channels_apart() {
        let samples: Vec<f32> = (0..4800).flat_map(|_| [0.5f32, -0.25]).collect();
        let mut source = VecSource::new(AudioFormat::new(48000, 2), samples);
        let mut resampler = SincResampler::new(48000, 44100, 2).unwrap();

        let output = drain(&mut resampler, &mut source, 2);
        let frames = output.len() / 2;
        assert!((4390..=4410).contains(&frames), "frames = {}", frames);
        for frame in output[1000..7000].chunks_exact(2) {
            assert!((frame[0] - 0.5).abs() < 0.02, "left = {}", frame[0]);
            assert!((frame[1] + 0.25).abs() < 0.02, "right = {}", frame[1]);
        }
    }

    #[test]
    fn test_underrun_returns_short_without_finishing() {
        let mut source = VecSource::new(AudioFormat::new(22050, 1), vec![0.0; 10]);
        source.finite = false;
        let mut resampler = SincResampler::new(22050, 44100, 1).unwrap();

        let mut out = vec![0.0f32; 100];
        // 不够一个输入块，也没有结束
        assert_eq!(resampler.process(&mut source, &mut out), 0);
        assert_eq!(resampler.process(&mut source, &mut out), 0);
        assert_eq!(resampler.tail, Tail::Streaming);
        assert_eq!(resampler.gathered, 10);
    }

    #[test]
    fn test_reset_drops_pending_frames() {
        let mut source = VecSource::new(AudioFormat::new(22050, 1), vec![1.0; 600]);
        let mut resampler = SincResampler::new(22050, 44100, 1).unwrap();
        let mut out = vec![0.0f32; 10];
        assert_eq!(resampler.process(&mut source, &mut out), 10);
        assert!(resampler.out_pos < resampler.out_len);

        resampler.reset();
        assert_eq!(resampler.out_pos, resampler.out_len);
        assert_eq!(resampler.gathered, 0);
        assert_eq!(resampler.frames_in, 0);
        assert_eq!(resampler.tail, Tail::Streaming);
    }

    #[test]
    fn test_for_rates_picks_passthrough_on_match() {
        // 直通路径不需要攒块，三个样本立即可读
        let mut source = VecSource::new(AudioFormat::new(44100, 1), vec![0.1, 0.2, 0.3]);
        source.finite = false;
        let mut out = [0.0f32; 4];

        let mut resampler = for_rates(44100, 44100, 1).unwrap();
        assert_eq!(resampler.process(&mut source, &mut out), 3);

        source.position = 0;
        let mut resampler = for_rates(22050, 44100, 1).unwrap();
        assert_eq!(resampler.process(&mut source, &mut out), 0);
    }
}
