//! Lock-free Single-Producer Single-Consumer Ring Buffer
//!
//! 媒体后端的解码线程（生产者）和输出回调（消费者）之间的数据通道：
//! - 零锁：读写两端只使用原子操作
//! - 零分配：所有内存在创建时预分配
//! - 读写位置各自独占一个 cache line，避免 false sharing

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// SPSC 无锁环形缓冲区
///
/// 容量必须是 2 的幂，索引通过掩码取模。
/// `write` 只能由一个生产者调用，`read` / `clear` 只能由一个消费者调用。
pub struct RingBuffer<T: Copy + Default> {
    buffer: Box<[UnsafeCell<T>]>,
    capacity: usize,
    mask: usize,

    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Copy + Default + Send> Send for RingBuffer<T> {}
unsafe impl<T: Copy + Default + Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// 创建指定容量的 Ring Buffer
    ///
    /// capacity 必须是 2 的幂
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of two");

        let buffer: Vec<UnsafeCell<T>> = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// 创建指定最小容量的 Ring Buffer（自动向上取整到 2 的幂）
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self::new(min_capacity.max(1).next_power_of_two())
    }

    /// 写入样本（生产者调用）
    ///
    /// 返回实际写入的样本数，wait-free
    #[inline]
    pub fn write(&self, data: &[T]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        let used = write.wrapping_sub(read);
        debug_assert!(used <= self.capacity, "ring buffer invariant violated: used > capacity");

        let free = self.capacity - used;
        let to_write = data.len().min(free);

        for (i, &sample) in data[..to_write].iter().enumerate() {
            let idx = (write + i) & self.mask;
            unsafe {
                *self.buffer[idx].get() = sample;
            }
        }

        self.write_pos.store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// 读取样本（消费者调用）
    ///
    /// 返回实际读取的样本数，wait-free
    #[inline]
    pub fn read(&self, output: &mut [T]) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        let available = write.wrapping_sub(read);
        let to_read = output.len().min(available);

        for (i, slot) in output[..to_read].iter_mut().enumerate() {
            let idx = (read + i) & self.mask;
            *slot = unsafe { *self.buffer[idx].get() };
        }

        self.read_pos.store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// 当前可读样本数
    #[inline]
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// 当前可写空间
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 缓冲区填充比例（用于监控和预缓冲判断）
    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        self.available() as f64 / self.capacity as f64
    }

    /// 丢弃所有未读样本（消费者调用）
    ///
    /// 只移动读位置，生产者此时必须处于停写状态，否则新写入的数据可能被一起丢弃
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let rb = RingBuffer::<f32>::new(16);

        let data = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(rb.write(&data), 4);
        assert_eq!(rb.available(), 4);

        let mut output = [0.0f32; 4];
        assert_eq!(rb.read(&mut output), 4);
        assert_eq!(output, data);
    }

    #[test]
    fn test_ring_buffer_wrap() {
        let rb = RingBuffer::<i32>::new(4);

        assert_eq!(rb.write(&[1, 2, 3, 4]), 4);

        let mut output = [0i32; 2];
        assert_eq!(rb.read(&mut output), 2);
        assert_eq!(output, [1, 2]);

        // 环绕写入
        assert_eq!(rb.write(&[5, 6]), 2);

        let mut all = [0i32; 4];
        assert_eq!(rb.read(&mut all), 4);
        assert_eq!(all, [3, 4, 5, 6]);
    }

    #[test]
    fn test_ring_buffer_full_and_empty() {
        let rb = RingBuffer::<i32>::new(4);

        let mut output = [0i32; 4];
        assert_eq!(rb.read(&mut output), 0);

        assert_eq!(rb.write(&[1, 2, 3, 4]), 4);
        assert_eq!(rb.free_space(), 0);
        assert_eq!(rb.write(&[5, 6]), 0);
        assert_eq!(rb.fill_ratio(), 1.0);
    }

    #[test]
    fn test_ring_buffer_clear() {
        let rb = RingBuffer::<i32>::new(8);
        rb.write(&[1, 2, 3]);
        rb.clear();
        assert_eq!(rb.available(), 0);

        rb.write(&[7]);
        let mut output = [0i32; 1];
        assert_eq!(rb.read(&mut output), 1);
        assert_eq!(output[0], 7);
    }

    #[test]
    fn test_with_min_capacity_rounds_up() {
        let rb = RingBuffer::<i32>::with_min_capacity(1000);
        assert_eq!(rb.capacity(), 1024);
    }
}
