//! 音频线路（audio line）
//!
//! 一条线路独占一个输出（cpal 设备流或空输出），运行在专用线程上：
//! - 输出流对象只在线路线程内创建和销毁（cpal::Stream 不是 Send）
//! - 播放控制通过命令通道传入，增益 / 声像 / 运行状态通过原子量共享给输出回调
//! - 回调只写原子标志；播放结束、设备故障由线路线程轮询发现并转换为生命周期事件

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_utils::atomic::AtomicCell;

use super::format::AudioFormat;
use super::output::{Output, OutputConfig, OutputError};
use super::source::FrameSource;
use super::stats::{PlaybackStats, StatsReport};

/// 线路线程轮询结束/故障标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// 调用方请求（暂停 / 停止）
    Requested,
    /// 源数据播放完毕
    EndOfMedia,
    /// 输出设备报错
    Failed,
}

/// 线路生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Open,
    Start,
    Stop(StopCause),
    Close,
}

/// 声像控制的可用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanSupport {
    /// 只有多声道源才有声像控制
    MultiChannelOnly,
    /// 单声道源先复制到左右声道再做声像
    Always,
}

/// 线路与输出回调共享的控制块
pub(crate) struct LineControl {
    pub(crate) running: AtomicBool,
    /// 回调发现源已结束
    pub(crate) drained: AtomicBool,
    /// 设备流报错
    pub(crate) failed: AtomicBool,
    /// seek 之后要求回调丢弃重采样缓存
    pub(crate) flush: AtomicBool,
    pub(crate) gain: AtomicCell<f32>,
    pub(crate) pan: AtomicCell<f32>,
    pub(crate) stats: PlaybackStats,
}

impl LineControl {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            flush: AtomicBool::new(false),
            gain: AtomicCell::new(1.0),
            pan: AtomicCell::new(0.0),
            stats: PlaybackStats::new(),
        }
    }
}

enum LineCommand {
    Start,
    Stop,
    Close,
}

/// 音频线路
pub struct AudioLine {
    commands: Mutex<Sender<LineCommand>>,
    control: Arc<LineControl>,
    closed: Arc<AtomicBool>,
    source_format: AudioFormat,
    pan_support: PanSupport,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioLine {
    /// 打开线路
    ///
    /// 输出成功打开后才返回；`Open` 事件在返回前已投递到 `events`。
    pub fn open(
        config: &OutputConfig,
        source: Box<dyn FrameSource>,
        events: Sender<LineEvent>,
        pan_support: PanSupport,
    ) -> Result<Self, OutputError> {
        let control = Arc::new(LineControl::new());
        let closed = Arc::new(AtomicBool::new(false));
        let source_format = source.format();

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = {
            let config = config.clone();
            let control = Arc::clone(&control);
            let closed = Arc::clone(&closed);
            thread::Builder::new()
                .name("audio-line".to_string())
                .spawn(move || {
                    line_thread_main(config, source, control, closed, command_rx, events, ready_tx)
                })
                .map_err(OutputError::Thread)?
        };

        let output_format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(OutputError::Closed);
            }
        };

        log::debug!(
            "Audio line open: source {}Hz {}ch → output {}Hz {}ch",
            source_format.sample_rate,
            source_format.channels,
            output_format.sample_rate,
            output_format.channels
        );

        Ok(Self {
            commands: Mutex::new(command_tx),
            control,
            closed,
            source_format,
            pan_support,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// 开始输出（已在运行时无操作）
    pub fn start(&self) -> Result<(), OutputError> {
        self.send(LineCommand::Start)
    }

    /// 停止输出，位置保持不变
    pub fn stop(&self) -> Result<(), OutputError> {
        self.send(LineCommand::Stop)
    }

    /// 停止输出并等待线路线程确认（最多 `timeout`）
    pub fn stop_and_wait(&self, timeout: Duration) -> Result<(), OutputError> {
        self.stop()?;
        let deadline = std::time::Instant::now() + timeout;
        while self.control.running.load(Ordering::Acquire) {
            if std::time::Instant::now() >= deadline {
                log::warn!("Audio line did not stop within {:?}", timeout);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// 关闭线路，释放输出；`Close` 事件稍后由线路线程投递
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.control.running.store(false, Ordering::Release);
        if let Ok(commands) = self.commands.lock() {
            let _ = commands.send(LineCommand::Close);
        }
    }

    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::Acquire)
    }

    /// 设置线性增益（1.0 = 原始电平）
    pub fn set_gain(&self, gain: f32) {
        self.control.gain.store(gain.max(0.0));
    }

    /// 设置声像，-1.0 = 仅左声道，1.0 = 仅右声道
    pub fn set_pan(&self, pan: f32) -> Result<(), OutputError> {
        if self.pan_support == PanSupport::MultiChannelOnly && self.source_format.is_mono() {
            return Err(OutputError::Unsupported("pan control on a mono line"));
        }
        self.control.pan.store(pan.clamp(-1.0, 1.0));
        Ok(())
    }

    /// 通知回调源位置已跳变，丢弃重采样缓存
    pub fn flush(&self) {
        self.control.drained.store(false, Ordering::Release);
        self.control.flush.store(true, Ordering::Release);
    }

    /// 回调统计，线路关闭后也可以读取
    pub fn stats(&self) -> StatsReport {
        self.control.stats.report()
    }

    fn send(&self, command: LineCommand) -> Result<(), OutputError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OutputError::Closed);
        }
        let commands = self.commands.lock().map_err(|_| OutputError::Closed)?;
        commands.send(command).map_err(|_| OutputError::Closed)
    }
}

impl Drop for AudioLine {
    fn drop(&mut self) {
        self.close();
        let handle = self.thread.get_mut().ok().and_then(Option::take);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// 线路线程主函数
fn line_thread_main(
    config: OutputConfig,
    source: Box<dyn FrameSource>,
    control: Arc<LineControl>,
    closed: Arc<AtomicBool>,
    commands: Receiver<LineCommand>,
    events: Sender<LineEvent>,
    ready: Sender<Result<AudioFormat, OutputError>>,
) {
    let output = match Output::open(&config, source, Arc::clone(&control)) {
        Ok(output) => output,
        Err(e) => {
            closed.store(true, Ordering::Release);
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _ = ready.send(Ok(output.format()));
    let _ = events.send(LineEvent::Open);

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(LineCommand::Start) => {
                if !control.running.load(Ordering::Acquire) {
                    control.failed.store(false, Ordering::Release);
                    control.drained.store(false, Ordering::Release);
                    control.running.store(true, Ordering::Release);
                    let _ = events.send(LineEvent::Start);
                }
            }
            Ok(LineCommand::Stop) => {
                if control.running.swap(false, Ordering::AcqRel) {
                    let _ = events.send(LineEvent::Stop(StopCause::Requested));
                }
            }
            Ok(LineCommand::Close) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if control.running.load(Ordering::Acquire) {
            if control.failed.swap(false, Ordering::AcqRel) {
                control.running.store(false, Ordering::Release);
                let _ = events.send(LineEvent::Stop(StopCause::Failed));
            } else if control.drained.load(Ordering::Acquire) {
                control.running.store(false, Ordering::Release);
                let _ = events.send(LineEvent::Stop(StopCause::EndOfMedia));
            }
        }
    }

    control.running.store(false, Ordering::Release);
    closed.store(true, Ordering::Release);
    drop(output);
    let _ = events.send(LineEvent::Close);
    log::debug!("Audio line closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::OutputTarget;
    use crate::audio::source::testing::VecSource;

    fn null_config() -> OutputConfig {
        OutputConfig {
            target: OutputTarget::Null,
            ..Default::default()
        }
    }

    fn recv(events: &Receiver<LineEvent>) -> LineEvent {
        events
            .recv_timeout(Duration::from_secs(2))
            .expect("line event")
    }

    #[test]
    fn test_lifecycle_events_in_order() {
        // 0.1 秒单声道静音
        let source = VecSource::new(AudioFormat::new(8000, 1), vec![0.0; 800]);
        let (tx, rx) = mpsc::channel();
        let line = AudioLine::open(&null_config(), Box::new(source), tx, PanSupport::Always).unwrap();

        assert_eq!(recv(&rx), LineEvent::Open);
        line.start().unwrap();
        assert_eq!(recv(&rx), LineEvent::Start);
        assert_eq!(recv(&rx), LineEvent::Stop(StopCause::EndOfMedia));
        assert!(!line.is_running());

        line.close();
        assert_eq!(recv(&rx), LineEvent::Close);
        assert!(matches!(line.start(), Err(OutputError::Closed)));
        // 统计在关闭后仍可读取
        assert_eq!(line.stats().frames_rendered, 800);
    }

    #[test]
    fn test_requested_stop_is_reported_once() {
        let mut source = VecSource::new(AudioFormat::new(8000, 2), vec![0.0; 16000]);
        source.finite = false;
        let (tx, rx) = mpsc::channel();
        let line = AudioLine::open(&null_config(), Box::new(source), tx, PanSupport::Always).unwrap();
        assert_eq!(recv(&rx), LineEvent::Open);

        line.start().unwrap();
        line.start().unwrap();
        assert_eq!(recv(&rx), LineEvent::Start);

        line.stop_and_wait(Duration::from_secs(1)).unwrap();
        line.stop().unwrap();
        assert_eq!(recv(&rx), LineEvent::Stop(StopCause::Requested));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_pan_unsupported_on_mono_clip_line() {
        let source = VecSource::new(AudioFormat::new(8000, 1), vec![0.0; 8]);
        let (tx, _rx) = mpsc::channel();
        let line = AudioLine::open(
            &null_config(),
            Box::new(source),
            tx,
            PanSupport::MultiChannelOnly,
        )
        .unwrap();

        assert!(matches!(line.set_pan(0.5), Err(OutputError::Unsupported(_))));
        assert_eq!(line.control.pan.load(), 0.0);

        line.set_gain(-1.0);
        assert_eq!(line.control.gain.load(), 0.0);
    }
}
