//! clip 后端
//!
//! 只接受未压缩 PCM（含 A-law / µ-law）。整个源解码到内存，输出回调直接从内存读取，
//! 位置是一个原子帧游标，长度和位置都是精确值。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioFormat, FrameSource, PanSupport};
use super::session::{forward_to_session, GainLaw, Session, Transport};
use super::source::LoadedSource;
use super::{AudioSource, Backend, PlayerConfig, PlayerError};

/// 内存中的 clip 数据
struct ClipData {
    format: AudioFormat,
    samples: Vec<f32>,
    frames: u64,
    cursor: AtomicU64,
}

impl ClipData {
    fn new(format: AudioFormat, samples: Vec<f32>) -> Self {
        let frames = (samples.len() / format.samples_per_frame().max(1)) as u64;
        Self {
            format,
            samples,
            frames,
            cursor: AtomicU64::new(0),
        }
    }
}

/// 输出回调侧
struct ClipSource {
    data: Arc<ClipData>,
}

impl FrameSource for ClipSource {
    fn format(&self) -> AudioFormat {
        self.data.format
    }

    fn read(&mut self, output: &mut [f32]) -> usize {
        let data = &*self.data;
        let channels = data.format.samples_per_frame().max(1);
        let wanted = (output.len() / channels) as u64;

        let start = data.cursor.load(Ordering::Acquire);
        let frames = wanted.min(data.frames.saturating_sub(start));
        let end = start + frames;
        output[..frames as usize * channels]
            .copy_from_slice(&data.samples[start as usize * channels..end as usize * channels]);

        // seek 与回调并发时以 seek 为准，这次读到的数据作废
        match data
            .cursor
            .compare_exchange(start, end, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => frames as usize,
            Err(_) => 0,
        }
    }

    fn is_finished(&self) -> bool {
        self.data.cursor.load(Ordering::Acquire) >= self.data.frames
    }
}

/// 控制侧
struct ClipTransport {
    data: Arc<ClipData>,
}

impl Transport for ClipTransport {
    fn length(&self) -> Option<Duration> {
        Some(self.data.format.frames_to_duration(self.data.frames))
    }

    fn position(&self) -> Duration {
        self.data
            .format
            .frames_to_duration(self.data.cursor.load(Ordering::Acquire))
    }

    fn seek(&self, position: Duration) {
        let frame = self.data.format.duration_to_frames(position).min(self.data.frames);
        self.data.cursor.store(frame, Ordering::Release);
    }
}

/// clip 播放器
pub struct ClipPlayer {
    session: Session,
}

impl ClipPlayer {
    /// 打开源并载入内存
    ///
    /// 非 PCM 源返回 `NotUncompressed`，`create_player` 据此退回媒体后端
    pub fn open(source: &AudioSource, config: &PlayerConfig) -> Result<Self, PlayerError> {
        Self::open_loaded(source, &source.load()?, config)
    }

    pub(crate) fn open_loaded(
        source: &AudioSource,
        loaded: &LoadedSource,
        config: &PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let mut decoder = loaded.decoder()?;
        let info = decoder.info().clone();
        if !info.is_uncompressed() {
            return Err(PlayerError::NotUncompressed(info.codec));
        }

        let samples = decoder.read_all(config.max_clip_frames)?;
        let data = Arc::new(ClipData::new(info.audio_format(), samples));

        log::info!(
            "Clip loaded: {} | {} {}Hz {}ch, {} frames",
            source,
            info.codec,
            info.sample_rate,
            info.channels,
            data.frames
        );

        let session = Session::open(
            Backend::Clip,
            Box::new(ClipSource {
                data: Arc::clone(&data),
            }),
            Arc::new(ClipTransport { data }),
            config,
            PanSupport::MultiChannelOnly,
            GainLaw::MasterGainDb,
        )?;

        Ok(Self { session })
    }
}

forward_to_session!(ClipPlayer);

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(frames: usize) -> Arc<ClipData> {
        let samples = (0..frames * 2).map(|i| i as f32).collect();
        Arc::new(ClipData::new(AudioFormat::new(1000, 2), samples))
    }

    #[test]
    fn test_source_reads_and_finishes() {
        let data = clip(5);
        let mut source = ClipSource {
            data: Arc::clone(&data),
        };

        let mut out = [0.0f32; 6];
        assert_eq!(source.read(&mut out), 3);
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(!source.is_finished());

        assert_eq!(source.read(&mut out), 2);
        assert_eq!(&out[..4], &[6.0, 7.0, 8.0, 9.0]);
        assert!(source.is_finished());
        assert_eq!(source.read(&mut out), 0);
    }

    #[test]
    fn test_transport_seek_and_position() {
        let data = clip(1000);
        let transport = ClipTransport {
            data: Arc::clone(&data),
        };
        assert_eq!(transport.length(), Some(Duration::from_secs(1)));

        transport.seek(Duration::from_millis(250));
        assert_eq!(transport.position(), Duration::from_millis(250));

        let mut source = ClipSource { data };
        let mut out = [0.0f32; 2];
        source.read(&mut out);
        assert_eq!(out, [500.0, 501.0]);

        transport.seek(Duration::from_secs(9));
        assert_eq!(transport.position(), Duration::from_secs(1));
        assert!(source.is_finished());
    }
}
