//! 帧源：输出回调从这里拉取数据
//!
//! clip 后端的内存缓冲和媒体后端的 ring buffer 都实现这个 trait

use super::format::AudioFormat;

/// 可被输出回调拉取的音频帧源
pub trait FrameSource: Send {
    /// 源的采样率和声道数
    fn format(&self) -> AudioFormat;

    /// 读取交错样本到 `output`（长度是声道数的整数倍），返回读到的帧数
    ///
    /// 在实时回调中调用，不能阻塞
    fn read(&mut self, output: &mut [f32]) -> usize;

    /// 源已结束，之后不会再有数据（直到被 seek）
    fn is_finished(&self) -> bool;

    /// 每次输出回调开始时调用（无论是否在播放），用于处理 seek 之类的维护工作
    fn service(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn read(&mut self, output: &mut [f32]) -> usize {
        (**self).read(output)
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn service(&mut self) {
        (**self).service()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// 测试用帧源：按顺序输出预置样本
    pub struct VecSource {
        pub format: AudioFormat,
        pub samples: Vec<f32>,
        pub position: usize,
        /// 读完后是否报告结束；false 模拟 underrun
        pub finite: bool,
    }

    impl VecSource {
        pub fn new(format: AudioFormat, samples: Vec<f32>) -> Self {
            Self {
                format,
                samples,
                position: 0,
                finite: true,
            }
        }
    }

    impl FrameSource for VecSource {
        fn format(&self) -> AudioFormat {
            self.format
        }

        fn read(&mut self, output: &mut [f32]) -> usize {
            let channels = self.format.samples_per_frame();
            let remaining = self.samples.len() - self.position;
            let to_copy = (output.len() / channels).min(remaining / channels) * channels;
            output[..to_copy].copy_from_slice(&self.samples[self.position..self.position + to_copy]);
            self.position += to_copy;
            to_copy / channels
        }

        fn is_finished(&self) -> bool {
            self.finite && self.position >= self.samples.len()
        }
    }
}
