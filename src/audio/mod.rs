//! 音频核心模块
//!
//! 包含：
//! - Line: 音频线路，带 OPEN / START / STOP / CLOSE 生命周期事件
//! - Output: cpal 设备输出和空输出
//! - Source: 输出回调拉取数据的帧源
//! - Ring Buffer: Lock-free 数据传递
//! - Format: 音频格式
//! - Stats: 播放统计

pub mod format;
pub mod line;
pub mod output;
pub mod ring_buffer;
pub mod source;
pub mod stats;

pub use format::AudioFormat;
pub use line::{AudioLine, LineEvent, PanSupport, StopCause};
pub use output::{OutputConfig, OutputError, OutputTarget};
pub use ring_buffer::RingBuffer;
pub use source::FrameSource;
pub use stats::{PlaybackStats, StatsReport};
