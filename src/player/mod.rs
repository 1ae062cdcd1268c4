//! 播放器门面
//!
//! 两个后端实现同一个 [`AudioPlayer`] 接口：
//! - [`ClipPlayer`]: 未压缩 PCM，整个解码到内存后播放
//! - [`MediaPlayer`]: symphonia 能解码的任意格式，解码线程流式供给
//!
//! [`create_player`] 先尝试 clip 后端，失败时退回媒体后端。

mod clip;
mod config;
mod media;
mod session;
mod source;
mod state;

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::OutputError;
use crate::decode::DecodeError;

pub use clip::ClipPlayer;
pub use config::PlayerConfig;
pub use media::MediaPlayer;
pub use source::AudioSource;

/// 满音量
pub const FULL_POWER: u8 = 100;
/// 半音量（默认）
pub const HALF_POWER: u8 = 50;
/// 静音
pub const MUTE: u8 = 0;

/// 只有右声道
pub const ONLY_RIGHT: i8 = 100;
/// 只有左声道
pub const ONLY_LEFT: i8 = -100;
/// 居中（默认）
pub const CENTER: i8 = 0;

/// `wait_for_playing` 的默认轮询间隔
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(200);
const MIN_WAIT_INTERVAL: Duration = Duration::from_millis(20);
const MAX_WAIT_INTERVAL: Duration = Duration::from_millis(10_000);

/// 播放器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 线路 / 媒体已就绪
    Open,
    /// 开始播放
    Start,
    /// 暂停、停止或播放到结尾
    Stop,
    /// 资源已释放
    Close,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Close => "CLOSE",
        };
        f.write_str(name)
    }
}

/// 状态监听器，参数为（之前的状态，当前状态）
///
/// 在播放器的事件线程上调用，不持有任何内部锁
pub type StatusListener = Arc<dyn Fn(Option<Status>, Status) + Send + Sync>;

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Clip,
    Media,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clip => f.write_str("clip"),
            Self::Media => f.write_str("media"),
        }
    }
}

/// 播放器错误
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Volume must be between 0 and 100, got {0}")]
    InvalidVolume(u8),
    #[error("Balance must be between -100 and 100, got {0}")]
    InvalidBalance(i8),
    #[error("Wait interval must be between 20ms and 10000ms, got {0:?}")]
    InvalidWaitInterval(Duration),
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid audio source: {0}")]
    InvalidSource(String),
    #[error("Not an uncompressed PCM source (codec: {0})")]
    NotUncompressed(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("Player is closed")]
    Closed,
    #[error("Failed to spawn player thread: {0}")]
    Thread(std::io::Error),
}

/// 音频播放器
///
/// 所有方法都取 `&self`，可以在多个线程间共享（例如一个线程等待播放结束，另一个线程暂停）。
pub trait AudioPlayer: Send + Sync {
    /// 实现这个播放器的后端
    fn backend(&self) -> Backend;

    /// 开始播放，暂停后从暂停位置继续；正在播放时无操作
    fn play(&self) -> Result<(), PlayerError>;

    fn is_playing(&self) -> bool;

    /// 暂停，位置保持不变
    fn pause(&self) -> Result<(), PlayerError>;

    /// 停止并回到开头
    fn stop(&self) -> Result<(), PlayerError>;

    /// 每次 `play()` 播放的遍数，0 = 无限循环
    fn set_play_count(&self, count: u32);

    fn play_count(&self) -> u32;

    /// 音量 0..=100
    fn set_volume(&self, volume: u8) -> Result<(), PlayerError>;

    fn volume(&self) -> u8;

    /// 尚未收到第一个线路事件时为 `None`
    fn status(&self) -> Option<Status>;

    /// 声道平衡 -100..=100，正值偏右
    fn set_balance(&self, balance: i8) -> Result<(), PlayerError>;

    fn balance(&self) -> i8;

    /// 容器没有给出长度时为 `None`
    fn audio_length(&self) -> Option<Duration>;

    fn audio_position(&self) -> Duration;

    /// 跳转，已知长度时截断到长度
    fn set_audio_position(&self, position: Duration) -> Result<(), PlayerError>;

    /// 释放线路，之后会收到 `Close` 状态；重复调用无操作
    fn close(&self);

    /// 播放结束后自动关闭
    fn set_auto_close(&self, auto_close: bool);

    fn is_auto_close(&self) -> bool;

    fn set_status_listener(&self, listener: Option<StatusListener>);

    fn status_listener(&self) -> Option<StatusListener>;

    /// 从头播放
    fn play_over(&self) -> Result<(), PlayerError> {
        self.set_audio_position(Duration::ZERO)?;
        self.play()
    }

    /// 播放期间阻塞，每隔 `interval` 检查一次
    fn wait_for_playing_every(&self, interval: Duration) -> Result<(), PlayerError> {
        if !(MIN_WAIT_INTERVAL..=MAX_WAIT_INTERVAL).contains(&interval) {
            return Err(PlayerError::InvalidWaitInterval(interval));
        }
        while self.is_playing() {
            thread::sleep(interval);
        }
        Ok(())
    }

    fn wait_for_playing(&self) -> Result<(), PlayerError> {
        self.wait_for_playing_every(DEFAULT_WAIT_INTERVAL)
    }

    fn full_power(&self) -> Result<(), PlayerError> {
        self.set_volume(FULL_POWER)
    }

    fn half_power(&self) -> Result<(), PlayerError> {
        self.set_volume(HALF_POWER)
    }

    fn mute(&self) -> Result<(), PlayerError> {
        self.set_volume(MUTE)
    }

    fn is_mute(&self) -> bool {
        self.volume() == MUTE
    }

    fn only_right(&self) -> Result<(), PlayerError> {
        self.set_balance(ONLY_RIGHT)
    }

    fn is_only_right(&self) -> bool {
        self.balance() == ONLY_RIGHT
    }

    fn only_left(&self) -> Result<(), PlayerError> {
        self.set_balance(ONLY_LEFT)
    }

    fn is_only_left(&self) -> bool {
        self.balance() == ONLY_LEFT
    }

    fn center_balance(&self) -> Result<(), PlayerError> {
        self.set_balance(CENTER)
    }

    fn is_balanced(&self) -> bool {
        self.balance() == CENTER
    }
}

/// 音量 → 分贝，`10 * log10(volume * 0.039)`；0 得到负无穷
pub fn volume_to_db(volume: u8) -> f32 {
    10.0 * (volume as f32 * 0.039).log10()
}

/// 创建播放器：先尝试 clip 后端，失败时退回媒体后端
///
/// 远程来源只下载一次，两个后端共用。两个后端都失败时返回媒体后端的错误
pub fn create_player(
    source: &AudioSource,
    config: &PlayerConfig,
) -> Result<Box<dyn AudioPlayer>, PlayerError> {
    let loaded = source.load()?;
    match ClipPlayer::open_loaded(source, &loaded, config) {
        Ok(player) => Ok(Box::new(player)),
        Err(e) => {
            log::info!("Clip backend unavailable for {} ({}), falling back to media", source, e);
            Ok(Box::new(MediaPlayer::open_loaded(source, &loaded, config)?))
        }
    }
}

/// 用指定后端创建播放器
pub fn create_player_with(
    backend: Backend,
    source: &AudioSource,
    config: &PlayerConfig,
) -> Result<Box<dyn AudioPlayer>, PlayerError> {
    match backend {
        Backend::Clip => Ok(Box::new(ClipPlayer::open(source, config)?)),
        Backend::Media => Ok(Box::new(MediaPlayer::open(source, config)?)),
    }
}
