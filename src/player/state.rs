//! 播放状态机
//!
//! 把线路生命周期事件翻译成状态变化和后续动作，两个后端共用。
//! 纯数据结构，不持有线路，方便单独测试。

use crate::audio::{LineEvent, StopCause};

use super::{Status, StatusListener};

/// 事件处理后需要执行的动作（在状态锁之外执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUp {
    Nothing,
    /// 回到开头，不再播放
    Rewind,
    /// 回到开头并重新启动线路
    Replay,
    /// 回到开头并关闭线路（auto-close）
    RewindAndClose,
}

/// 一次状态变化
pub(crate) struct Transition {
    pub previous: Option<Status>,
    pub current: Status,
    pub follow_up: FollowUp,
    pub listener: Option<StatusListener>,
}

impl Transition {
    /// 通知监听器（调用方保证不持有状态锁）
    pub fn notify(&self) {
        if let Some(listener) = &self.listener {
            listener(self.previous, self.current);
        }
    }
}

/// 播放器状态
pub(crate) struct PlaybackCore {
    status: Option<Status>,
    playing: bool,
    /// 0 = 无限循环
    play_count: u32,
    /// 当前是第几遍（从 1 开始）
    plays_done: u32,
    volume: u8,
    balance: i8,
    auto_close: bool,
    closed: bool,
    listener: Option<StatusListener>,
}

impl Default for PlaybackCore {
    fn default() -> Self {
        Self {
            status: None,
            playing: false,
            play_count: 1,
            plays_done: 1,
            volume: 50,
            balance: 0,
            auto_close: false,
            closed: false,
            listener: None,
        }
    }
}

impl PlaybackCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_line_event(&mut self, event: LineEvent) -> Transition {
        let mut follow_up = FollowUp::Nothing;

        let current = match event {
            LineEvent::Open => Status::Open,
            LineEvent::Start => Status::Start,
            LineEvent::Close => {
                self.playing = false;
                self.closed = true;
                Status::Close
            }
            LineEvent::Stop(StopCause::EndOfMedia) => {
                // 播放期间暂停时结束事件可能晚到，此时不再重播
                let replay = self.playing
                    && (self.play_count == 0 || self.plays_done < self.play_count);
                if replay {
                    self.plays_done = self.plays_done.saturating_add(1);
                    follow_up = FollowUp::Replay;
                } else {
                    self.playing = false;
                    self.plays_done = 1;
                    follow_up = if self.auto_close {
                        FollowUp::RewindAndClose
                    } else {
                        FollowUp::Rewind
                    };
                }
                Status::Stop
            }
            LineEvent::Stop(StopCause::Requested) => {
                self.plays_done = 1;
                Status::Stop
            }
            LineEvent::Stop(StopCause::Failed) => {
                log::warn!("Audio line stopped on a device error");
                self.playing = false;
                self.plays_done = 1;
                Status::Stop
            }
        };

        let previous = self.status.replace(current);
        Transition {
            previous,
            current,
            follow_up,
            listener: self.listener.clone(),
        }
    }

    /// play() 的状态部分；返回 true 表示需要启动线路
    pub fn begin_play(&mut self) -> bool {
        if self.playing {
            return false;
        }
        self.playing = true;
        true
    }

    /// pause() / stop() 的状态部分；返回 true 表示需要停止线路
    pub fn begin_pause(&mut self) -> bool {
        std::mem::replace(&mut self.playing, false)
    }

    /// close() 的状态部分；返回 false 表示已经关闭过
    pub fn begin_close(&mut self) -> bool {
        self.playing = false;
        !std::mem::replace(&mut self.closed, true)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn play_count(&self) -> u32 {
        self.play_count
    }

    pub fn set_play_count(&mut self, count: u32) {
        self.play_count = count;
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume;
    }

    pub fn balance(&self) -> i8 {
        self.balance
    }

    pub fn set_balance(&mut self, balance: i8) {
        self.balance = balance;
    }

    pub fn auto_close(&self) -> bool {
        self.auto_close
    }

    pub fn set_auto_close(&mut self, auto_close: bool) {
        self.auto_close = auto_close;
    }

    pub fn listener(&self) -> Option<StatusListener> {
        self.listener.clone()
    }

    pub fn set_listener(&mut self, listener: Option<StatusListener>) {
        self.listener = listener;
    }
}
