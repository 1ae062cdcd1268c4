//! 音频输出
//!
//! - `DeviceOutput`: cpal 设备流，优先请求源采样率，设备不支持时退回设备默认配置并重采样
//! - `NullOutput`: 无设备的实时时钟输出，按真实时间消费数据后丢弃（无头环境和测试使用）
//! - `Renderer`: 两种输出共用的渲染路径（拉取 → 重采样 → 声道映射 → 增益 / 声像 → 限幅）

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig, SupportedStreamConfigRange};

use super::format::AudioFormat;
use super::line::LineControl;
use super::source::FrameSource;
use crate::resample::{self, ResampleError, Resampler};

/// 空输出的时钟周期
const NULL_PERIOD: Duration = Duration::from_millis(10);

/// 输出目标
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputTarget {
    /// 系统默认输出设备
    #[default]
    DefaultDevice,
    /// 按名称选择设备，找不到时退回默认设备
    Named(String),
    /// 不打开设备，按实时时钟消费数据
    Null,
}

/// 输出配置
#[derive(Clone, Debug, Default)]
pub struct OutputConfig {
    pub target: OutputTarget,
    /// 设备缓冲大小（帧），None 使用设备默认值
    pub buffer_frames: Option<u32>,
}

/// 输出错误
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("No default output device found")]
    NoDevice,
    #[error("Failed to query device: {0}")]
    Device(String),
    #[error("Failed to build output stream: {0}")]
    BuildStream(String),
    #[error("Failed to start output stream: {0}")]
    Play(String),
    #[error("Unsupported device sample format: {0}")]
    UnsupportedSampleFormat(String),
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
    #[error("Audio line is closed")]
    Closed,
    #[error("Failed to spawn audio thread: {0}")]
    Thread(std::io::Error),
    #[error(transparent)]
    Resample(#[from] ResampleError),
}

/// 已打开的输出（只存在于线路线程）
pub(crate) enum Output {
    Device(DeviceOutput),
    Null(NullOutput),
}

impl Output {
    pub(crate) fn open(
        config: &OutputConfig,
        source: Box<dyn FrameSource>,
        control: Arc<LineControl>,
    ) -> Result<Self, OutputError> {
        match config.target {
            OutputTarget::Null => Ok(Self::Null(NullOutput::start(source, control)?)),
            _ => Ok(Self::Device(DeviceOutput::open(config, source, control)?)),
        }
    }

    pub(crate) fn format(&self) -> AudioFormat {
        match self {
            Self::Device(output) => output.format,
            Self::Null(output) => output.format,
        }
    }
}

/// 渲染器：在输出回调中把帧源转换为设备格式
pub(crate) struct Renderer {
    source: Box<dyn FrameSource>,
    resampler: Box<dyn Resampler>,
    control: Arc<LineControl>,
    source_channels: usize,
    output_channels: usize,
    scratch: Vec<f32>,
}

impl Renderer {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        control: Arc<LineControl>,
        output: AudioFormat,
    ) -> Result<Self, OutputError> {
        let source_format = source.format();
        let source_channels = source_format.samples_per_frame().max(1);
        Ok(Self {
            resampler: resample::for_rates(
                source_format.sample_rate,
                output.sample_rate,
                source_channels,
            )?,
            source,
            control,
            source_channels,
            output_channels: output.samples_per_frame().max(1),
            scratch: vec![0.0; 4096 * source_channels],
        })
    }

    /// 填充一个设备缓冲（交错 f32）
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        let control = &*self.control;
        control.stats.on_callback();
        self.source.service();

        if control.flush.swap(false, Ordering::AcqRel) {
            self.resampler.reset();
        }

        if !control.running.load(Ordering::Acquire) || control.drained.load(Ordering::Acquire) {
            out.fill(0.0);
            return;
        }

        let frames = out.len() / self.output_channels;
        let needed = frames * self.source_channels;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0.0);
        }

        let got = self
            .resampler
            .process(&mut *self.source, &mut self.scratch[..needed]);

        if got < frames {
            if self.source.is_finished() {
                control.drained.store(true, Ordering::Release);
            } else {
                control.stats.record_underrun();
            }
        }

        let gain = control.gain.load();
        let (left_gain, right_gain) = pan_gains(control.pan.load());
        let src_ch = self.source_channels;
        let out_ch = self.output_channels;

        for frame in 0..got {
            let src = &self.scratch[frame * src_ch..(frame + 1) * src_ch];
            let dst = &mut out[frame * out_ch..(frame + 1) * out_ch];
            map_channels(src, dst);
            if out_ch >= 2 {
                dst[0] *= left_gain;
                dst[1] *= right_gain;
            }
            for sample in dst.iter_mut() {
                *sample = (*sample * gain).clamp(-1.0, 1.0);
            }
        }
        out[got * out_ch..].fill(0.0);

        control.stats.add_frames_rendered(got as u64);
    }
}

/// 声道映射：单声道复制到所有输出声道，多余声道补零，单声道设备取左右平均
fn map_channels(src: &[f32], dst: &mut [f32]) {
    match (src.len(), dst.len()) {
        (_, 1) => {
            let n = src.len().min(2);
            dst[0] = src[..n].iter().sum::<f32>() / n as f32;
        }
        (1, _) => dst.fill(src[0]),
        (s, _) => {
            for (i, sample) in dst.iter_mut().enumerate() {
                *sample = if i < s { src[i] } else { 0.0 };
            }
        }
    }
}

/// 声像 → 左右增益，正值偏右
fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let left = if pan > 0.0 { 1.0 - pan } else { 1.0 };
    let right = if pan < 0.0 { 1.0 + pan } else { 1.0 };
    (left, right)
}

/// cpal 设备输出
pub(crate) struct DeviceOutput {
    stream: cpal::Stream,
    format: AudioFormat,
}

impl DeviceOutput {
    fn open(
        config: &OutputConfig,
        source: Box<dyn FrameSource>,
        control: Arc<LineControl>,
    ) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = Self::select_device(&host, &config.target)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let requested = source.format();
        let (mut stream_config, sample_format) = Self::select_config(&device, requested)?;
        if let Some(frames) = config.buffer_frames {
            stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let format = AudioFormat::new(stream_config.sample_rate.0, stream_config.channels);
        log::info!(
            "Output device: {} | {}Hz {}ch {:?}",
            device_name,
            format.sample_rate,
            format.channels,
            sample_format
        );

        let renderer = Renderer::new(source, Arc::clone(&control), format)?;
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, renderer, control),
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, renderer, control),
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, renderer, control),
            other => Err(OutputError::UnsupportedSampleFormat(format!("{:?}", other))),
        }?;

        // 流一直运行，暂停时回调输出静音
        stream
            .play()
            .map_err(|e| OutputError::Play(e.to_string()))?;

        Ok(Self { stream, format })
    }

    fn select_device(host: &cpal::Host, target: &OutputTarget) -> Result<cpal::Device, OutputError> {
        if let OutputTarget::Named(name) = target {
            let mut devices = host
                .output_devices()
                .map_err(|e| OutputError::Device(e.to_string()))?;
            if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name.as_str())) {
                return Ok(device);
            }
            log::warn!("Output device '{}' not found, using system default", name);
        }

        host.default_output_device().ok_or(OutputError::NoDevice)
    }

    /// 选择流配置
    ///
    /// 优先：支持源采样率 + 期望声道数 + f32；都不满足时使用设备默认配置
    fn select_config(
        device: &cpal::Device,
        requested: AudioFormat,
    ) -> Result<(StreamConfig, SampleFormat), OutputError> {
        let wanted_channels = requested.channels.max(2);
        let rate = requested.sample_rate;

        let ranges: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| OutputError::Device(e.to_string()))?
            .collect();

        let best = ranges
            .into_iter()
            .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
            .filter(|r| {
                matches!(
                    r.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
                )
            })
            .max_by_key(|r| {
                let mut score = 0u8;
                if r.channels() == wanted_channels {
                    score += 2;
                }
                if r.sample_format() == SampleFormat::F32 {
                    score += 1;
                }
                score
            });

        if let Some(range) = best {
            let sample_format = range.sample_format();
            let config = range.with_sample_rate(cpal::SampleRate(rate)).config();
            return Ok((config, sample_format));
        }

        log::info!(
            "Device does not support {}Hz, using its default configuration",
            rate
        );
        let default = device
            .default_output_config()
            .map_err(|e| OutputError::Device(e.to_string()))?;
        Ok((default.config(), default.sample_format()))
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        let _ = self.stream.pause();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut renderer: Renderer,
    control: Arc<LineControl>,
) -> Result<cpal::Stream, OutputError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut mix: Vec<f32> = Vec::with_capacity(8192);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if mix.len() < data.len() {
                    mix.resize(data.len(), 0.0);
                }
                let buf = &mut mix[..data.len()];
                renderer.render(buf);
                for (dst, &src) in data.iter_mut().zip(buf.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            move |err| {
                log::error!("Output stream error: {}", err);
                control.failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| OutputError::BuildStream(e.to_string()))
}

/// 空输出：实时时钟驱动的渲染线程
pub(crate) struct NullOutput {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    format: AudioFormat,
}

impl NullOutput {
    fn start(source: Box<dyn FrameSource>, control: Arc<LineControl>) -> Result<Self, OutputError> {
        let source_format = source.format();
        let format = AudioFormat::new(source_format.sample_rate, source_format.channels.max(2));
        let mut renderer = Renderer::new(source, control, format)?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("null-output".to_string())
            .spawn(move || {
                let channels = format.samples_per_frame();
                let started = Instant::now();
                let mut frames_done: u64 = 0;
                let mut buffer: Vec<f32> = Vec::new();

                while !thread_stop.load(Ordering::Acquire) {
                    thread::sleep(NULL_PERIOD);
                    let due = format.duration_to_frames(started.elapsed());
                    let frames = due.saturating_sub(frames_done) as usize;
                    if frames == 0 {
                        continue;
                    }
                    buffer.resize(frames * channels, 0.0);
                    renderer.render(&mut buffer);
                    frames_done = due;
                }
            })
            .map_err(OutputError::Thread)?;

        log::info!(
            "Null output: {}Hz {}ch",
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            stop,
            thread: Some(thread),
            format,
        })
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::testing::VecSource;

    fn running_control() -> Arc<LineControl> {
        let control = Arc::new(LineControl::new());
        control.running.store(true, Ordering::Release);
        control
    }

    #[test]
    fn test_pan_gains() {
        assert_eq!(pan_gains(0.0), (1.0, 1.0));
        assert_eq!(pan_gains(1.0), (0.0, 1.0));
        assert_eq!(pan_gains(-1.0), (1.0, 0.0));
        assert_eq!(pan_gains(0.5), (0.5, 1.0));
        assert_eq!(pan_gains(-3.0), (1.0, 0.0));
    }

    #[test]
    fn test_map_channels() {
        let mut stereo = [0.0f32; 2];
        map_channels(&[0.5], &mut stereo);
        assert_eq!(stereo, [0.5, 0.5]);

        let mut mono = [0.0f32; 1];
        map_channels(&[0.2, 0.4], &mut mono);
        assert!((mono[0] - 0.3).abs() < 1e-6);

        let mut quad = [9.0f32; 4];
        map_channels(&[0.1, 0.2], &mut quad);
        assert_eq!(quad, [0.1, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn test_render_applies_gain_and_pan() {
        let control = running_control();
        control.gain.store(0.5);
        control.pan.store(1.0);

        let source = VecSource::new(AudioFormat::new(8000, 1), vec![0.8; 4]);
        let mut renderer =
            Renderer::new(Box::new(source), Arc::clone(&control), AudioFormat::new(8000, 2))
                .unwrap();

        let mut out = [1.0f32; 8];
        renderer.render(&mut out);
        for frame in out.chunks(2) {
            assert_eq!(frame[0], 0.0);
            assert!((frame[1] - 0.4).abs() < 1e-6);
        }
        assert_eq!(control.stats.frames_rendered(), 4);
    }

    #[test]
    fn test_render_clamps_and_marks_drained() {
        let control = running_control();
        control.gain.store(4.0);

        let source = VecSource::new(AudioFormat::new(8000, 2), vec![0.5, -0.5]);
        let mut renderer =
            Renderer::new(Box::new(source), Arc::clone(&control), AudioFormat::new(8000, 2))
                .unwrap();

        let mut out = [0.3f32; 6];
        renderer.render(&mut out);
        assert_eq!(out, [1.0, -1.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(control.drained.load(Ordering::Acquire));
        assert_eq!(control.stats.underrun_count(), 0);
    }

    #[test]
    fn test_render_silence_when_stopped_and_underrun_when_starved() {
        let control = Arc::new(LineControl::new());
        let mut source = VecSource::new(AudioFormat::new(8000, 2), vec![0.5; 2]);
        source.finite = false;
        let mut renderer =
            Renderer::new(Box::new(source), Arc::clone(&control), AudioFormat::new(8000, 2))
                .unwrap();

        let mut out = [0.7f32; 4];
        renderer.render(&mut out);
        assert_eq!(out, [0.0; 4]);

        control.running.store(true, Ordering::Release);
        renderer.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(control.stats.underrun_count(), 1);
        assert!(!control.drained.load(Ordering::Acquire));
    }

    #[test]
    fn test_render_resamples_to_device_rate_then_drains() {
        let control = running_control();
        let source = VecSource::new(AudioFormat::new(8000, 1), vec![0.25; 800]);
        let mut renderer =
            Renderer::new(Box::new(source), Arc::clone(&control), AudioFormat::new(16000, 2))
                .unwrap();

        let mut out = [0.0f32; 2 * 160];
        for _ in 0..20 {
            renderer.render(&mut out);
            if control.drained.load(Ordering::Acquire) {
                break;
            }
        }
        assert!(control.drained.load(Ordering::Acquire));
        let rendered = control.stats.frames_rendered();
        assert!((1590..=1600).contains(&rendered), "rendered = {}", rendered);
    }
}
