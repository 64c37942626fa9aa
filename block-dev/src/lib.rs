//! # 块设备接口层
//!
//! 块设备以**块**为单位存取数据；[`BlockDevice`] 就是对这类设备的抽象，
//! 文件系统引擎只通过它读写底层存储。
//!
//! 同一设备同一时刻只允许服务一个已初始化的文件系统实例，
//! 由设备侧的绑定计数保证；每次写入都会触发可选的变更通知钩子。

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

/// 变更通知钩子：(设备ID, 块ID)
pub type ChangeHook = Box<dyn Fn(u32, usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// 块尚未就绪（惰性加载模型）
    NotReady,
}

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync {
    /// 块大小，必为2的幂
    fn block_size(&self) -> usize;

    /// 设备总块数
    fn block_count(&self) -> usize;

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError>;

    fn write_block(&self, block_id: usize, buf: &[u8]);

    fn zero_block(&self, block_id: usize);

    /// 把设备绑定到一个文件系统实例；已被绑定时返回 false
    fn bind(&self) -> bool {
        true
    }

    fn unbind(&self) {}
}

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(0);

/// 完全驻留内存的定长块设备
pub struct MemDisk {
    id: u32,
    block_size: usize,
    block_count: usize,
    data: Mutex<Vec<u8>>,
    /// 模拟尚未载入的块
    not_ready: Mutex<BTreeSet<usize>>,
    on_change: Option<ChangeHook>,
    bound: AtomicBool,
}

impl MemDisk {
    pub fn new(block_size: usize, block_count: usize) -> Self {
        assert!(block_size.is_power_of_two());
        Self::from_image(block_size, vec![0; block_size * block_count])
    }

    /// 从既有映像装载，供另一个进程重新打开已格式化的磁盘
    pub fn from_image(block_size: usize, image: Vec<u8>) -> Self {
        assert!(block_size.is_power_of_two());
        assert_eq!(0, image.len() % block_size, "image is not block-aligned");

        Self {
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            block_size,
            block_count: image.len() / block_size,
            data: Mutex::new(image),
            not_ready: Mutex::new(BTreeSet::new()),
            on_change: None,
            bound: AtomicBool::new(false),
        }
    }

    pub fn with_change_hook(mut self, hook: ChangeHook) -> Self {
        self.on_change = Some(hook);
        self
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 标记块为未就绪，之后对它的读取将失败
    pub fn set_not_ready(&self, block_id: usize) {
        self.not_ready.lock().insert(block_id);
    }

    pub fn set_ready(&self, block_id: usize) {
        self.not_ready.lock().remove(&block_id);
    }

    /// 导出整个映像
    pub fn dump(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn range(&self, block_id: usize) -> Range<usize> {
        assert!(block_id < self.block_count, "block id out of range");
        block_id * self.block_size..(block_id + 1) * self.block_size
    }

    fn notify(&self, block_id: usize) {
        if let Some(hook) = &self.on_change {
            hook(self.id, block_id);
        }
    }
}

impl BlockDevice for MemDisk {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        if self.not_ready.lock().contains(&block_id) {
            return Err(DeviceError::NotReady);
        }
        let range = self.range(block_id);
        buf[..self.block_size].copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let range = self.range(block_id);
        self.data.lock()[range].copy_from_slice(&buf[..self.block_size]);
        self.notify(block_id);
    }

    fn zero_block(&self, block_id: usize) {
        let range = self.range(block_id);
        self.data.lock()[range].fill(0);
        self.notify(block_id);
    }

    fn bind(&self) -> bool {
        self.bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn unbind(&self) {
        self.bound.store(false, Ordering::Release);
    }
}
