//! dualplay
//!
//! 一个播放器接口，两个后端：未压缩 PCM 走内存 clip，其余格式走流式媒体解码。
//! 自动选择后端，clip 不能处理时退回媒体后端。

pub mod audio;
pub mod decode;
pub mod player;
pub mod resample;

pub use player::{
    create_player, create_player_with, volume_to_db, AudioPlayer, AudioSource, Backend,
    ClipPlayer, MediaPlayer, PlayerConfig, PlayerError, Status, StatusListener,
};
