use std::sync::Arc;

use block_dev::{BlockDevice, MemDisk};
use tiny_fs::{format, Clock, Config, FileSystem};

/// 测试用的定值时钟
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn now(&self) -> u32 {
        self.0
    }
}

pub const CLOCK: FixedClock = FixedClock(1_700_000_000);

/// 新造一块内存盘，格式化并装载
pub fn fresh(
    block_size: usize,
    blocks: usize,
    inode_blocks: usize,
) -> (Arc<MemDisk>, [u8; Config::SIZE], FileSystem) {
    let disk = Arc::new(MemDisk::new(block_size, blocks));
    let device: Arc<dyn BlockDevice> = disk.clone();

    let config = format(&device, &CLOCK, inode_blocks).unwrap();
    let fs = FileSystem::init(device, Arc::new(CLOCK), &config).unwrap();
    (disk, config, fs)
}
