//! 媒体后端
//!
//! 解码线程把 symphonia 解码出的样本写入 ring buffer，输出回调从中读取。
//!
//! seek 是一次握手：
//! 1. 控制侧写入 `pending_seek`，回调在 seek 期间输出静音
//! 2. 解码线程执行 seek，置位 `discard` 请求消费侧丢弃旧数据
//! 3. 回调清空 ring buffer、采用新位置、清除 `discard`
//! 4. 解码线程继续写入
//!
//! ring buffer 只在消费侧清空，生产侧在此期间不写入，保持 SPSC 约束。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use crate::audio::{AudioFormat, FrameSource, PanSupport, RingBuffer};
use crate::decode::{AudioDecoder, AudioInfo};

use super::session::{forward_to_session, GainLaw, Session, Transport};
use super::source::LoadedSource;
use super::{AudioSource, Backend, PlayerConfig, PlayerError};

/// 没有待处理的 seek
const NO_SEEK: u64 = u64::MAX;

/// 预缓冲最长等待时间
const PREBUFFER_TIMEOUT: Duration = Duration::from_secs(5);

/// 解码线程空闲（EOF / 等待丢弃）时的轮询间隔
const IDLE_PARK: Duration = Duration::from_millis(5);

/// 解码线程与输出回调、控制侧共享的状态
struct StreamShared {
    format: AudioFormat,
    ring: RingBuffer<f32>,
    total_frames: Option<u64>,
    /// 解码线程继续运行
    running: AtomicBool,
    /// 解码到文件末尾（剩余样本已全部写入 ring）
    eof: AtomicBool,
    pending_seek: AtomicU64,
    /// 解码线程请求消费侧丢弃 ring 中的旧数据
    discard: AtomicBool,
    discard_position: AtomicU64,
    /// 输出回调已消费的帧位置
    position: AtomicU64,
}

impl StreamShared {
    fn new(info: &AudioInfo, ring_samples: usize) -> Self {
        Self {
            format: info.audio_format(),
            ring: RingBuffer::with_min_capacity(ring_samples),
            total_frames: info.total_frames,
            running: AtomicBool::new(true),
            eof: AtomicBool::new(false),
            pending_seek: AtomicU64::new(NO_SEEK),
            discard: AtomicBool::new(false),
            discard_position: AtomicU64::new(0),
            position: AtomicU64::new(0),
        }
    }

    fn seeking(&self) -> bool {
        self.pending_seek.load(Ordering::Acquire) != NO_SEEK || self.discard.load(Ordering::Acquire)
    }
}

/// 输出回调侧
struct StreamSource {
    shared: Arc<StreamShared>,
}

impl FrameSource for StreamSource {
    fn format(&self) -> AudioFormat {
        self.shared.format
    }

    fn service(&mut self) {
        let shared = &*self.shared;
        if shared.discard.load(Ordering::Acquire) {
            shared.ring.clear();
            shared.position.store(
                shared.discard_position.load(Ordering::Acquire),
                Ordering::Release,
            );
            shared.discard.store(false, Ordering::Release);
        }
    }

    fn read(&mut self, output: &mut [f32]) -> usize {
        let shared = &*self.shared;
        if shared.seeking() {
            return 0;
        }

        // 只读整帧，生产侧可能只写入了半帧
        let channels = shared.format.samples_per_frame().max(1);
        let whole = shared.ring.available().min(output.len()) / channels * channels;
        if whole == 0 {
            return 0;
        }
        let read = shared.ring.read(&mut output[..whole]);
        let frames = read / channels;
        shared.position.fetch_add(frames as u64, Ordering::AcqRel);
        frames
    }

    fn is_finished(&self) -> bool {
        let shared = &*self.shared;
        !shared.seeking() && shared.eof.load(Ordering::Acquire) && shared.ring.available() == 0
    }
}

/// 控制侧
struct StreamTransport {
    shared: Arc<StreamShared>,
    decoder_thread: Thread,
}

impl Transport for StreamTransport {
    fn length(&self) -> Option<Duration> {
        self.shared
            .total_frames
            .map(|frames| self.shared.format.frames_to_duration(frames))
    }

    fn position(&self) -> Duration {
        let shared = &*self.shared;
        let pending = shared.pending_seek.load(Ordering::Acquire);
        let frame = if pending != NO_SEEK {
            pending
        } else if shared.discard.load(Ordering::Acquire) {
            shared.discard_position.load(Ordering::Acquire)
        } else {
            shared.position.load(Ordering::Acquire)
        };
        shared.format.frames_to_duration(frame)
    }

    fn seek(&self, position: Duration) {
        let mut frame = self.shared.format.duration_to_frames(position);
        if let Some(total) = self.shared.total_frames {
            frame = frame.min(total);
        }
        self.shared.pending_seek.store(frame, Ordering::Release);
        self.decoder_thread.unpark();
    }
}

/// 媒体播放器
pub struct MediaPlayer {
    session: Session,
    shared: Arc<StreamShared>,
    decoder_thread: Option<JoinHandle<()>>,
}

impl MediaPlayer {
    pub fn open(source: &AudioSource, config: &PlayerConfig) -> Result<Self, PlayerError> {
        Self::open_loaded(source, &source.load()?, config)
    }

    pub(crate) fn open_loaded(
        source: &AudioSource,
        loaded: &LoadedSource,
        config: &PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let decoder = loaded.decoder()?;
        let info = decoder.info().clone();
        let ring_samples = config.ring_samples(info.sample_rate, info.channels);
        let shared = Arc::new(StreamShared::new(&info, ring_samples));
        let prebuffer = config.prebuffer_samples(shared.ring.capacity());

        let decoder_thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("decoder".to_string())
                .spawn(move || decoder_thread_main(decoder, shared))
                .map_err(PlayerError::Thread)?
        };

        let session = Session::open(
            Backend::Media,
            Box::new(StreamSource {
                shared: Arc::clone(&shared),
            }),
            Arc::new(StreamTransport {
                shared: Arc::clone(&shared),
                decoder_thread: decoder_thread.thread().clone(),
            }),
            config,
            PanSupport::Always,
            GainLaw::Linear,
        );
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                stop_decoder(&shared, &decoder_thread);
                let _ = decoder_thread.join();
                return Err(e);
            }
        };

        let player = Self {
            session,
            shared,
            decoder_thread: Some(decoder_thread),
        };
        player.wait_prebuffer(prebuffer);

        log::info!(
            "Media opened: {} | {} {} {}Hz {}ch, length {:?}",
            source,
            info.format,
            info.codec,
            info.sample_rate,
            info.channels,
            info.duration
        );

        Ok(player)
    }

    /// 等待预缓冲完成（或解码结束）
    fn wait_prebuffer(&self, target: usize) {
        let started = Instant::now();
        while self.shared.ring.available() < target && !self.shared.eof.load(Ordering::Acquire) {
            if started.elapsed() >= PREBUFFER_TIMEOUT {
                log::warn!(
                    "Prebuffer incomplete after {:?} ({} / {} samples)",
                    PREBUFFER_TIMEOUT,
                    self.shared.ring.available(),
                    target
                );
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        log::debug!(
            "Prebuffer complete in {:?} ({:.0}% full)",
            started.elapsed(),
            self.shared.ring.fill_ratio() * 100.0
        );
    }
}

forward_to_session!(MediaPlayer);

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.session.close();
        if let Some(handle) = self.decoder_thread.take() {
            stop_decoder(&self.shared, &handle);
            let _ = handle.join();
        }
    }
}

fn stop_decoder(shared: &StreamShared, handle: &JoinHandle<()>) {
    shared.running.store(false, Ordering::Release);
    handle.thread().unpark();
}

/// 解码线程主函数
fn decoder_thread_main(mut decoder: AudioDecoder, shared: Arc<StreamShared>) {
    let channels = shared.format.samples_per_frame().max(1);
    let sample_rate = shared.format.sample_rate.max(1);

    // 自适应等待参数（纯整数运算）
    let ns_per_sample: u64 = 1_000_000_000 / (sample_rate as u64 * channels as u64);
    let min_free_threshold = (1024 * channels).min(shared.ring.capacity() / 2).max(channels);

    // ring 满时没写完的样本
    let mut leftover: Vec<f32> = Vec::new();
    let mut leftover_pos = 0usize;

    log::debug!(
        "Decoder thread started, ring {} samples, ~{}ns/sample",
        shared.ring.capacity(),
        ns_per_sample
    );

    while shared.running.load(Ordering::Acquire) {
        let target = shared.pending_seek.load(Ordering::Acquire);
        if target != NO_SEEK {
            handle_seek(&mut decoder, &shared, target);
            leftover.clear();
            leftover_pos = 0;
            continue;
        }

        if shared.eof.load(Ordering::Acquire) {
            // 播放结束后等待 seek（rewind / set_audio_position）
            thread::park_timeout(IDLE_PARK);
            continue;
        }

        let free = shared.ring.free_space();
        if free < min_free_threshold {
            // 缓冲区快满了，按预计腾出空间的时间等待
            let samples_needed = min_free_threshold - free;
            let wait_us = (samples_needed as u64 * ns_per_sample) / 1_000;
            if wait_us < 500 {
                thread::yield_now();
            } else {
                let sleep_us = (wait_us * 7 / 10).clamp(100, 10_000);
                thread::park_timeout(Duration::from_micros(sleep_us));
            }
            continue;
        }

        if leftover_pos < leftover.len() {
            leftover_pos += shared.ring.write(&leftover[leftover_pos..]);
            continue;
        }

        match decoder.decode_next() {
            Ok(Some(samples)) => {
                let written = shared.ring.write(samples);
                if written < samples.len() {
                    leftover.clear();
                    leftover.extend_from_slice(&samples[written..]);
                    leftover_pos = 0;
                }
            }
            Ok(None) => {
                log::debug!("Decoder reached end of file");
                shared.eof.store(true, Ordering::Release);
            }
            Err(e) => {
                log::error!("Decode error: {}", e);
                shared.eof.store(true, Ordering::Release);
            }
        }
    }

    log::debug!("Decoder thread finished");
}

/// 执行 seek 并与消费侧完成丢弃握手
fn handle_seek(decoder: &mut AudioDecoder, shared: &StreamShared, target: u64) {
    match decoder.seek(target) {
        Ok(()) => {
            log::debug!("Seeked to frame {}", decoder.position_frames());
            shared.eof.store(false, Ordering::Release);
        }
        Err(e) => {
            log::warn!("Seek to frame {} failed: {}", target, e);
            shared.eof.store(true, Ordering::Release);
        }
    }

    shared.discard_position.store(target, Ordering::Release);
    shared.discard.store(true, Ordering::Release);
    // 期间又有新的 seek 时保留它，下一轮处理
    let _ = shared
        .pending_seek
        .compare_exchange(target, NO_SEEK, Ordering::AcqRel, Ordering::Acquire);

    // 等输出回调清空 ring；线路关闭后没有回调，直接退出
    while shared.discard.load(Ordering::Acquire) && shared.running.load(Ordering::Acquire) {
        thread::park_timeout(IDLE_PARK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(total_frames: Option<u64>) -> AudioInfo {
        AudioInfo {
            sample_rate: 1000,
            channels: 2,
            bit_depth: Some(16),
            total_frames,
            duration: None,
            format: "WAV".to_string(),
            codec: "adpcm_ms".to_string(),
        }
    }

    #[test]
    fn test_source_reads_whole_frames_only() {
        let shared = Arc::new(StreamShared::new(&info(Some(100)), 64));
        shared.ring.write(&[0.1, 0.2, 0.3]);
        let mut source = StreamSource {
            shared: Arc::clone(&shared),
        };

        let mut out = [0.0f32; 8];
        assert_eq!(source.read(&mut out), 1);
        assert_eq!(&out[..2], &[0.1, 0.2]);
        assert_eq!(shared.ring.available(), 1);
        assert_eq!(shared.position.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_seek_handshake() {
        let shared = Arc::new(StreamShared::new(&info(Some(100)), 64));
        shared.ring.write(&[0.5; 8]);
        let transport = StreamTransport {
            shared: Arc::clone(&shared),
            decoder_thread: thread::current(),
        };
        let mut source = StreamSource {
            shared: Arc::clone(&shared),
        };

        transport.seek(Duration::from_millis(40));
        assert_eq!(transport.position(), Duration::from_millis(40));
        let mut out = [0.0f32; 4];
        assert_eq!(source.read(&mut out), 0);
        assert!(!source.is_finished());

        // 解码线程完成 seek，请求丢弃
        shared.discard_position.store(40, Ordering::Release);
        shared.discard.store(true, Ordering::Release);
        shared.pending_seek.store(NO_SEEK, Ordering::Release);
        assert_eq!(source.read(&mut out), 0);

        source.service();
        assert!(!shared.discard.load(Ordering::Acquire));
        assert_eq!(shared.ring.available(), 0);
        assert_eq!(transport.position(), Duration::from_millis(40));
    }

    #[test]
    fn test_seek_clamps_to_known_length() {
        let shared = Arc::new(StreamShared::new(&info(Some(100)), 64));
        let transport = StreamTransport {
            shared: Arc::clone(&shared),
            decoder_thread: thread::current(),
        };
        transport.seek(Duration::from_secs(10));
        assert_eq!(shared.pending_seek.load(Ordering::Acquire), 100);
        assert_eq!(transport.length(), Some(Duration::from_millis(100)));

        let unknown = Arc::new(StreamShared::new(&info(None), 64));
        let transport = StreamTransport {
            shared: unknown,
            decoder_thread: thread::current(),
        };
        assert_eq!(transport.length(), None);
    }

    #[test]
    fn test_finished_only_after_eof_and_empty_ring() {
        let shared = Arc::new(StreamShared::new(&info(None), 64));
        let mut source = StreamSource {
            shared: Arc::clone(&shared),
        };
        shared.ring.write(&[0.0; 2]);
        shared.eof.store(true, Ordering::Release);
        assert!(!source.is_finished());

        let mut out = [0.0f32; 2];
        source.read(&mut out);
        assert!(source.is_finished());

        shared.pending_seek.store(0, Ordering::Release);
        assert!(!source.is_finished());
    }
}
