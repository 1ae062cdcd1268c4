//! 播放会话：线路 + 状态机 + 事件线程
//!
//! 两个后端只在帧源、走带（position / seek）和音量换算上不同，
//! 其余控制逻辑都在这里。

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioLine, FrameSource, LineEvent, PanSupport};

use super::state::{FollowUp, PlaybackCore};
use super::{volume_to_db, Backend, PlayerConfig, PlayerError, Status, StatusListener};

/// 等待线路确认停止的最长时间
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// clip 后端主增益范围（dB）
const MIN_GAIN_DB: f32 = -80.0;
const MAX_GAIN_DB: f32 = 6.0206;

/// 走带控制：位置和跳转
pub(crate) trait Transport: Send + Sync {
    fn length(&self) -> Option<Duration>;
    fn position(&self) -> Duration;
    fn seek(&self, position: Duration);
}

/// 音量 → 线性增益的换算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GainLaw {
    /// 经 `volume_to_db` 换算为主增益分贝
    MasterGainDb,
    /// volume / 100
    Linear,
}

impl GainLaw {
    pub(crate) fn gain(self, volume: u8) -> f32 {
        if volume == 0 {
            return 0.0;
        }
        match self {
            Self::MasterGainDb => {
                let db = volume_to_db(volume).clamp(MIN_GAIN_DB, MAX_GAIN_DB);
                10f32.powf(db / 20.0)
            }
            Self::Linear => volume as f32 / 100.0,
        }
    }
}

struct Shared {
    core: Mutex<PlaybackCore>,
    line: AudioLine,
    transport: Arc<dyn Transport>,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, PlaybackCore> {
        // 监听器 panic 不应让播放器永久不可用
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rewind(&self) {
        self.transport.seek(Duration::ZERO);
        self.line.flush();
    }

    fn close(&self) {
        if self.core().begin_close() {
            self.line.close();
            log::debug!("Player closed ({})", self.line.stats());
        }
    }

    fn handle(&self, event: LineEvent) {
        let transition = self.core().on_line_event(event);
        log::debug!(
            "Status {:?} -> {} ({:?})",
            transition.previous,
            transition.current,
            transition.follow_up
        );

        match transition.follow_up {
            FollowUp::Nothing => {}
            FollowUp::Rewind => self.rewind(),
            FollowUp::Replay => {
                self.rewind();
                // 决定重播之后可能已被暂停或关闭，重新检查后在锁内启动线路
                let core = self.core();
                if core.is_playing() && !core.is_closed() {
                    if let Err(e) = self.line.start() {
                        log::warn!("Failed to restart audio line: {}", e);
                    }
                }
            }
            FollowUp::RewindAndClose => {
                self.rewind();
                self.close();
            }
        }

        transition.notify();
    }
}

/// 播放会话
pub(crate) struct Session {
    backend: Backend,
    shared: Arc<Shared>,
    gain_law: GainLaw,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn open(
        backend: Backend,
        source: Box<dyn FrameSource>,
        transport: Arc<dyn Transport>,
        config: &PlayerConfig,
        pan_support: PanSupport,
        gain_law: GainLaw,
    ) -> Result<Self, PlayerError> {
        let (events_tx, events_rx) = mpsc::channel();
        let line = AudioLine::open(&config.output, source, events_tx, pan_support)?;

        let shared = Arc::new(Shared {
            core: Mutex::new(PlaybackCore::new()),
            line,
            transport,
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{}-events", backend))
                .spawn(move || dispatch_events(shared, events_rx))
                .map_err(PlayerError::Thread)?
        };

        let session = Self {
            backend,
            shared,
            gain_law,
            dispatcher: Mutex::new(Some(dispatcher)),
        };

        let (volume, balance) = {
            let core = session.shared.core();
            (core.volume(), core.balance())
        };
        session.set_volume(volume)?;
        session.set_balance(balance)?;

        Ok(session)
    }

    pub(crate) fn backend(&self) -> Backend {
        self.backend
    }

    fn ensure_open(&self) -> Result<(), PlayerError> {
        if self.shared.core().is_closed() {
            return Err(PlayerError::Closed);
        }
        Ok(())
    }

    // 线路命令在状态锁内发送，命令顺序与播放标志的修改顺序一致

    pub(crate) fn play(&self) -> Result<(), PlayerError> {
        let mut core = self.shared.core();
        if core.is_closed() {
            return Err(PlayerError::Closed);
        }
        if core.begin_play() {
            if let Err(e) = self.shared.line.start() {
                core.begin_pause();
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.shared.core().is_playing()
    }

    pub(crate) fn pause(&self) -> Result<(), PlayerError> {
        let mut core = self.shared.core();
        if core.is_closed() {
            return Err(PlayerError::Closed);
        }
        if core.begin_pause() {
            self.shared.line.stop()?;
        }
        Ok(())
    }

    pub(crate) fn stop(&self) -> Result<(), PlayerError> {
        let mut core = self.shared.core();
        if core.is_closed() {
            return Err(PlayerError::Closed);
        }
        if core.begin_pause() {
            // 先确认输出已停，再回到开头，避免回调越过新位置
            self.shared.line.stop_and_wait(STOP_TIMEOUT)?;
        }
        self.shared.rewind();
        Ok(())
    }

    pub(crate) fn set_play_count(&self, count: u32) {
        self.shared.core().set_play_count(count);
    }

    pub(crate) fn play_count(&self) -> u32 {
        self.shared.core().play_count()
    }

    pub(crate) fn set_volume(&self, volume: u8) -> Result<(), PlayerError> {
        if volume > super::FULL_POWER {
            return Err(PlayerError::InvalidVolume(volume));
        }
        self.shared.core().set_volume(volume);
        self.shared.line.set_gain(self.gain_law.gain(volume));
        Ok(())
    }

    pub(crate) fn volume(&self) -> u8 {
        self.shared.core().volume()
    }

    pub(crate) fn status(&self) -> Option<Status> {
        self.shared.core().status()
    }

    pub(crate) fn set_balance(&self, balance: i8) -> Result<(), PlayerError> {
        if !(super::ONLY_LEFT..=super::ONLY_RIGHT).contains(&balance) {
            return Err(PlayerError::InvalidBalance(balance));
        }
        self.shared.core().set_balance(balance);
        if let Err(e) = self.shared.line.set_pan(balance as f32 / 100.0) {
            log::debug!("Balance {} recorded but not applied: {}", balance, e);
        }
        Ok(())
    }

    pub(crate) fn balance(&self) -> i8 {
        self.shared.core().balance()
    }

    pub(crate) fn audio_length(&self) -> Option<Duration> {
        self.shared.transport.length()
    }

    pub(crate) fn audio_position(&self) -> Duration {
        self.shared.transport.position()
    }

    pub(crate) fn set_audio_position(&self, position: Duration) -> Result<(), PlayerError> {
        self.ensure_open()?;
        let position = match self.shared.transport.length() {
            Some(length) => position.min(length),
            None => position,
        };
        self.shared.transport.seek(position);
        self.shared.line.flush();
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.shared.close();
    }

    pub(crate) fn set_auto_close(&self, auto_close: bool) {
        self.shared.core().set_auto_close(auto_close);
    }

    pub(crate) fn is_auto_close(&self) -> bool {
        self.shared.core().auto_close()
    }

    pub(crate) fn set_status_listener(&self, listener: Option<StatusListener>) {
        self.shared.core().set_listener(listener);
    }

    pub(crate) fn status_listener(&self) -> Option<StatusListener> {
        self.shared.core().listener()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
        let handle = self.dispatcher.get_mut().ok().and_then(Option::take);
        if let Some(handle) = handle {
            // 在事件线程自身上析构时不能 join 自己
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// 事件线程：线路关闭后发送端被丢弃，循环随之结束
fn dispatch_events(shared: Arc<Shared>, events: Receiver<LineEvent>) {
    for event in events {
        shared.handle(event);
    }
    log::debug!("Event dispatcher finished");
}

/// 把 `AudioPlayer` 的必需方法转发给 `self.session`
macro_rules! forward_to_session {
    ($player:ty) => {
        impl $crate::player::AudioPlayer for $player {
            fn backend(&self) -> $crate::player::Backend {
                self.session.backend()
            }

            fn play(&self) -> Result<(), $crate::player::PlayerError> {
                self.session.play()
            }

            fn is_playing(&self) -> bool {
                self.session.is_playing()
            }

            fn pause(&self) -> Result<(), $crate::player::PlayerError> {
                self.session.pause()
            }

            fn stop(&self) -> Result<(), $crate::player::PlayerError> {
                self.session.stop()
            }

            fn set_play_count(&self, count: u32) {
                self.session.set_play_count(count)
            }

            fn play_count(&self) -> u32 {
                self.session.play_count()
            }

            fn set_volume(&self, volume: u8) -> Result<(), $crate::player::PlayerError> {
                self.session.set_volume(volume)
            }

            fn volume(&self) -> u8 {
                self.session.volume()
            }

            fn status(&self) -> Option<$crate::player::Status> {
                self.session.status()
            }

            fn set_balance(&self, balance: i8) -> Result<(), $crate::player::PlayerError> {
                self.session.set_balance(balance)
            }

            fn balance(&self) -> i8 {
                self.session.balance()
            }

            fn audio_length(&self) -> Option<std::time::Duration> {
                self.session.audio_length()
            }

            fn audio_position(&self) -> std::time::Duration {
                self.session.audio_position()
            }

            fn set_audio_position(
                &self,
                position: std::time::Duration,
            ) -> Result<(), $crate::player::PlayerError> {
                self.session.set_audio_position(position)
            }

            fn close(&self) {
                self.session.close()
            }

            fn set_auto_close(&self, auto_close: bool) {
                self.session.set_auto_close(auto_close)
            }

            fn is_auto_close(&self) -> bool {
                self.session.is_auto_close()
            }

            fn set_status_listener(&self, listener: Option<$crate::player::StatusListener>) {
                self.session.set_status_listener(listener)
            }

            fn status_listener(&self) -> Option<$crate::player::StatusListener> {
                self.session.status_listener()
            }
        }
    };
}

pub(crate) use forward_to_session;
