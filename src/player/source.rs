//! 音频来源

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use url::Url;

use crate::decode::{AudioDecoder, DecodeError, RemoteMedia};

use super::PlayerError;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    /// http / https
    Remote(Url),
}

/// 音频来源：本地文件路径、`file://` URL 或 http(s) URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioSource {
    location: Location,
}

impl AudioSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
        }
    }

    /// `file`、`http`、`https` 之外的 scheme 返回 `UnsupportedScheme`
    pub fn from_url(url: Url) -> Result<Self, PlayerError> {
        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(Self::from_path)
                .map_err(|_| PlayerError::InvalidSource(url.to_string())),
            "http" | "https" => Ok(Self {
                location: Location::Remote(url.clone()),
            }),
            scheme => Err(PlayerError::UnsupportedScheme(scheme.to_string())),
        }
    }

    /// 本地来源的路径
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path.as_path()),
            Location::Remote(_) => None,
        }
    }

    /// 远程来源的 URL
    pub fn url(&self) -> Option<&Url> {
        match &self.location {
            Location::File(_) => None,
            Location::Remote(url) => Some(url),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, Location::Remote(_))
    }

    /// 打开前的准备：远程来源在这里整体下载
    pub(crate) fn load(&self) -> Result<LoadedSource, PlayerError> {
        match &self.location {
            Location::File(path) => Ok(LoadedSource::File(path.clone())),
            Location::Remote(url) => Ok(LoadedSource::Remote(RemoteMedia::fetch(url)?)),
        }
    }
}

/// 可以直接交给解码器的来源；远程内容已在内存中
pub(crate) enum LoadedSource {
    File(PathBuf),
    Remote(RemoteMedia),
}

impl LoadedSource {
    pub(crate) fn decoder(&self) -> Result<AudioDecoder, DecodeError> {
        match self {
            Self::File(path) => AudioDecoder::open(path),
            Self::Remote(media) => AudioDecoder::open_remote(media),
        }
    }
}

impl FromStr for AudioSource {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Url::parse(s) {
            // Windows 盘符（C:\music\a.wav）被解析成单字母 scheme
            Ok(url) if url.scheme().len() == 1 => Ok(Self::from_path(s)),
            Ok(url) => Self::from_url(url),
            // 相对路径等不是 URL 的字符串按路径处理
            Err(_) => Ok(Self::from_path(s)),
        }
    }
}

impl From<PathBuf> for AudioSource {
    fn from(path: PathBuf) -> Self {
        Self::from_path(path)
    }
}

impl From<&Path> for AudioSource {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Remote(url) => write!(f, "{}", url),
        }
    }
}
