//! 解码模块

mod decoder;
mod remote;

pub use decoder::{AudioDecoder, AudioInfo, DecodeError};
pub use remote::RemoteMedia;
