//! 远程媒体
//!
//! symphonia 需要可 seek 的 `MediaSource`，http(s) 内容整体下载到内存后再解码。
//! 字节用 `Arc` 共享，clip 后端失败后媒体后端复用同一份下载。

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::DecodeError;

/// 下载超时
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// 已下载到内存的远程媒体
#[derive(Clone, Debug)]
pub struct RemoteMedia {
    url: Url,
    bytes: Arc<[u8]>,
}

impl RemoteMedia {
    /// 下载整个资源；非 2xx 状态码按错误处理
    pub fn fetch(url: &Url) -> Result<Self, DecodeError> {
        log::debug!("Downloading {}", url);
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()?;
        let response = client.get(url.clone()).send()?.error_for_status()?;
        let bytes = response.bytes()?;
        log::info!("Downloaded {} ({} bytes)", url, bytes.len());

        Ok(Self::from_bytes(url.clone(), Arc::<[u8]>::from(&bytes[..])))
    }

    pub fn from_bytes(url: Url, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            url,
            bytes: bytes.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// URL 路径最后一段的扩展名，用作格式探测提示
    pub fn extension(&self) -> Option<&str> {
        let segment = self.url.path_segments()?.last()?;
        let (_, ext) = segment.rsplit_once('.')?;
        (!ext.is_empty()).then_some(ext)
    }

    /// 从头读取的游标（symphonia 为 `Cursor` 实现了 `MediaSource`）
    pub(crate) fn cursor(&self) -> Cursor<Arc<[u8]>> {
        Cursor::new(Arc::clone(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_extension_from_url_path() {
        let media = RemoteMedia::from_bytes(url("https://host/music/a.b/track.flac?x=1"), vec![0u8; 4]);
        assert_eq!(media.extension(), Some("flac"));
        assert_eq!(media.len(), 4);

        let media = RemoteMedia::from_bytes(url("http://host/stream"), Vec::new());
        assert_eq!(media.extension(), None);
        assert!(media.is_empty());

        let media = RemoteMedia::from_bytes(url("http://host/dir/"), Vec::new());
        assert_eq!(media.extension(), None);
    }

    #[test]
    fn test_cursors_share_bytes() {
        use std::io::Read;

        let media = RemoteMedia::from_bytes(url("http://host/a.wav"), vec![1u8, 2, 3]);
        let mut first = Vec::new();
        media.cursor().read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        media.clone().cursor().read_to_end(&mut second).unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(first, second);
    }
}
