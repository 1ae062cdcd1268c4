//! 音频文件解码器
//!
//! 使用 symphonia 库解码，输出交错 f32 样本；本地文件直接读取，远程媒体从内存读取
//! 支持：WAV, AIFF, FLAC, MP3, Ogg Vorbis, AAC/MP4, ADPCM
//!
//! - clip 后端用 `read_all` 一次性解码到内存
//! - 媒体后端在解码线程中用 `decode_next` 流式解码

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::audio::AudioFormat;

use super::RemoteMedia;

/// 解码错误
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),
    #[error("Failed to fetch remote media: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("Unsupported audio format")]
    UnsupportedFormat,
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("Failed to create decoder: {0}")]
    DecoderCreation(String),
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("Seek failed: {0}")]
    SeekFailed(String),
    #[error("Audio too long: {frames} frames exceeds the limit of {limit}")]
    TooLong { frames: u64, limit: u64 },
}

/// 音频文件信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    /// 采样率
    pub sample_rate: u32,
    /// 声道数
    pub channels: u16,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果已知）
    pub total_frames: Option<u64>,
    /// 总时长
    pub duration: Option<Duration>,
    /// 格式名称
    pub format: String,
    /// 编解码器名称
    pub codec: String,
}

impl AudioInfo {
    /// 未压缩 PCM（含 A-law / µ-law），clip 后端只接受这类源
    pub fn is_uncompressed(&self) -> bool {
        self.codec.starts_with("pcm_")
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }
}

/// 音频文件解码器
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    info: AudioInfo,
    sample_buf: Option<SampleBuffer<f32>>,
    /// 下一个输出样本对应的帧位置
    position: u64,
    /// seek 落点早于目标时需要丢弃的帧数
    skip_frames: u64,
}

impl AudioDecoder {
    /// 打开音频文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let extension = path.extension().and_then(|e| e.to_str());
        Self::from_media_source(Box::new(file), extension, &path.display().to_string())
    }

    /// 打开已下载到内存的远程媒体
    pub fn open_remote(media: &RemoteMedia) -> Result<Self, DecodeError> {
        Self::from_media_source(
            Box::new(media.cursor()),
            media.extension(),
            media.url().as_str(),
        )
    }

    fn from_media_source(
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
        label: &str,
    ) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(source, Default::default());

        // 提示扩展名
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|_| DecodeError::UnsupportedFormat)?;

        let reader = probed.format;
        // 直接使用扩展名作为格式名称
        let format_name = extension
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "Unknown".to_string());

        // 查找第一个音频轨道
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let total_frames = codec_params.n_frames;
        let format = AudioFormat::new(sample_rate, channels);

        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = AudioInfo {
            sample_rate,
            channels,
            bit_depth: codec_params.bits_per_sample,
            total_frames,
            duration: total_frames.map(|f| format.frames_to_duration(f)),
            format: format_name,
            codec: codec_name,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        let time_base = codec_params.time_base;

        log::debug!(
            "Opened {}: {} {}Hz {}ch, {:?} frames",
            label,
            info.codec,
            info.sample_rate,
            info.channels,
            info.total_frames
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            time_base,
            info,
            sample_buf: None,
            position: 0,
            skip_frames: 0,
        })
    }

    /// 获取音频信息
    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// 下一个输出样本对应的帧位置
    pub fn position_frames(&self) -> u64 {
        self.position
    }

    /// 解码下一块数据
    ///
    /// 返回交错 f32 样本；`None` 表示文件结束
    pub fn decode_next(&mut self) -> Result<Option<&[f32]>, DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            // 跳过非目标轨道
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    // 跳过损坏的帧
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            let frames = decoded.frames() as u64;
            if frames == 0 {
                continue;
            }

            let channels = self.info.channels.max(1) as usize;
            let skip = self.skip_frames.min(frames);
            self.skip_frames -= skip;
            if skip == frames {
                continue;
            }

            let too_small = self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| (buf.capacity() as u64) < frames);
            if too_small {
                self.sample_buf = None;
            }
            let capacity = decoded.capacity() as u64;
            let spec = *decoded.spec();
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(capacity, spec));
            buf.copy_interleaved_ref(decoded);

            self.position += frames - skip;
            let samples = buf.samples();
            let start = (skip as usize * channels).min(samples.len());
            return Ok(Some(&samples[start..]));
        }
    }

    /// Seek 到指定帧
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        let rate = self.info.sample_rate.max(1) as u64;
        let secs = frame / rate;
        let frac = (frame % rate) as f64 / rate as f64;

        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(secs, frac),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::SeekFailed(e.to_string()))?;

        // 重置解码器状态
        self.decoder.reset();

        // 落点可能早于目标，多出的帧在下次解码时丢弃
        let early = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.skip_frames = match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(early);
                time.seconds * rate + (time.frac * rate as f64).round() as u64
            }
            None => early,
        };
        self.position = frame;

        Ok(())
    }

    /// 从当前位置解码到文件结束
    ///
    /// 超过 `limit_frames` 时立即返回 `TooLong`，不会把整个文件读入内存
    pub fn read_all(&mut self, limit_frames: u64) -> Result<Vec<f32>, DecodeError> {
        let channels = self.info.channels.max(1) as usize;
        if let Some(total) = self.info.total_frames {
            if total > limit_frames {
                return Err(DecodeError::TooLong {
                    frames: total,
                    limit: limit_frames,
                });
            }
        }

        let capacity = self.info.total_frames.unwrap_or(0) as usize * channels;
        let mut samples = Vec::with_capacity(capacity);
        while let Some(chunk) = self.decode_next()? {
            samples.extend_from_slice(chunk);
            let frames = (samples.len() / channels) as u64;
            if frames > limit_frames {
                return Err(DecodeError::TooLong {
                    frames,
                    limit: limit_frames,
                });
            }
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, frames: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample((i % 100) as i16 * 100).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_open_reports_pcm_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 2, 8000);

        let decoder = AudioDecoder::open(&path).unwrap();
        let info = decoder.info();
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.total_frames, Some(8000));
        assert_eq!(info.duration, Some(Duration::from_secs(1)));
        assert_eq!(info.format, "WAV");
        assert!(info.is_uncompressed());
    }

    #[test]
    fn test_read_all_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 4000);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        let samples = decoder.read_all(4000).unwrap();
        assert_eq!(samples.len(), 4000);
        assert_eq!(decoder.position_frames(), 4000);
        assert!(decoder.decode_next().unwrap().is_none());

        let mut decoder = AudioDecoder::open(&path).unwrap();
        assert!(matches!(
            decoder.read_all(1000),
            Err(DecodeError::TooLong { limit: 1000, .. })
        ));
    }

    #[test]
    fn test_seek_positions_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.wav");
        write_wav(&path, 1, 8000);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        decoder.seek(4000).unwrap();
        assert_eq!(decoder.position_frames(), 4000);
        let rest = decoder.read_all(8000).unwrap();
        assert_eq!(rest.len(), 4000);
    }

    #[test]
    fn test_open_missing_and_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AudioDecoder::open(dir.path().join("missing.wav")),
            Err(DecodeError::FileOpen(_))
        ));

        let junk = dir.path().join("junk.wav");
        std::fs::write(&junk, b"definitely not audio").unwrap();
        assert!(matches!(
            AudioDecoder::open(&junk),
            Err(DecodeError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_open_remote_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.wav");
        write_wav(&path, 1, 2000);
        let bytes = std::fs::read(&path).unwrap();

        let url = url::Url::parse("http://host/music/remote.wav").unwrap();
        let media = RemoteMedia::from_bytes(url, bytes);
        let mut decoder = AudioDecoder::open_remote(&media).unwrap();
        assert_eq!(decoder.info().format, "WAV");
        assert_eq!(decoder.info().total_frames, Some(2000));
        assert_eq!(decoder.read_all(2000).unwrap().len(), 2000);

        // 同一份字节可以再次打开
        assert!(AudioDecoder::open_remote(&media).is_ok());
    }
}
