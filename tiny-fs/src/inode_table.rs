//! # inode 表
//!
//! 跟在配置块之后的稠密记录数组，每条16字节。
//! 空闲槽位栈按逆序装填，分配时总是取出最小的索引；
//! 每次改动都立即持久化所在的块。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::block_pool;
use crate::layout::{BlockPtr, InodeKind, InodePtr, InodeRecord};
use crate::{Error, Result};

/// 记录总数上限，受制于16位的 inode 指针
const MAX_INODES: usize = 65536;

#[derive(Debug)]
pub struct InodeTable {
    /// 表起始块
    start_blk: usize,
    /// 表占用块数
    blocks: usize,
    /// 记录总数
    capacity: usize,
    /// 空闲槽位栈，栈顶是最小索引
    stack: Vec<u16>,
}

impl InodeTable {
    /// 格式化：清零整个区域，所有槽位空闲
    pub fn create(device: &Arc<dyn BlockDevice>, start_blk: usize, blocks: usize) -> Self {
        for index in 0..blocks {
            device.zero_block(start_blk + index);
        }

        let capacity = Self::capacity_of(device, blocks);
        let mut stack = Vec::with_capacity(capacity);
        for index in (0..capacity).rev() {
            stack.push(index as u16);
        }

        Self {
            start_blk,
            blocks,
            capacity,
            stack,
        }
    }

    /// 装载：逆序扫描记录，重建空闲槽位栈
    pub fn init(device: &Arc<dyn BlockDevice>, start_blk: usize, blocks: usize) -> Self {
        let capacity = Self::capacity_of(device, blocks);
        let per_block = device.block_size() / InodeRecord::SIZE;

        let mut stack = Vec::new();
        let mut buf = block_pool::take(device.block_size());
        for index in (0..blocks).rev() {
            device
                .read_block(start_blk + index, &mut buf)
                .expect("inode block not ready");
            for slot in (0..per_block).rev() {
                let record = index * per_block + slot;
                if record >= capacity {
                    continue;
                }
                let offset = slot * InodeRecord::SIZE;
                if InodeRecord::decode(&buf[offset..offset + InodeRecord::SIZE]).is_none() {
                    stack.push(record as u16);
                }
            }
        }

        Self {
            start_blk,
            blocks,
            capacity,
            stack,
        }
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.stack.len()
    }

    /// 在最小的空闲槽位写入一条新记录
    pub fn alloc(
        &mut self,
        device: &Arc<dyn BlockDevice>,
        kind: InodeKind,
        data_blk: BlockPtr,
        mtime: u32,
    ) -> Result<InodePtr> {
        let index = self.stack.pop().ok_or(Error::NoFreeInodes)?;
        let record = InodeRecord::new(kind, data_blk, mtime);
        self.store(device, index as usize, Some(&record));
        Ok(InodePtr::new(index))
    }

    pub fn read(&self, device: &Arc<dyn BlockDevice>, ptr: InodePtr) -> Option<InodeRecord> {
        if ptr.index() >= self.capacity {
            return None;
        }

        let (blk, offset) = self.pos(device, ptr.index());
        let mut buf = block_pool::take(device.block_size());
        device
            .read_block(blk, &mut buf)
            .expect("inode block not ready");
        InodeRecord::decode(&buf[offset..offset + InodeRecord::SIZE])
    }

    /// 部分更新：省略的字段保持原值
    pub fn update(
        &self,
        device: &Arc<dyn BlockDevice>,
        ptr: InodePtr,
        size: Option<u32>,
        mtime: Option<u32>,
    ) -> Result<()> {
        let mut record = self.read(device, ptr).ok_or(Error::Internal)?;
        if let Some(size) = size {
            record.size = size;
        }
        if let Some(mtime) = mtime {
            record.mtime = mtime;
        }
        self.store(device, ptr.index(), Some(&record));
        Ok(())
    }

    pub fn set_executable(
        &self,
        device: &Arc<dyn BlockDevice>,
        ptr: InodePtr,
        executable: bool,
    ) -> Result<()> {
        let mut record = self.read(device, ptr).ok_or(Error::Internal)?;
        record.executable = executable;
        self.store(device, ptr.index(), Some(&record));
        Ok(())
    }

    /// 清零槽位并返回记录里的块指针，供调用者回收其存储
    pub fn must_free(
        &mut self,
        device: &Arc<dyn BlockDevice>,
        ptr: InodePtr,
    ) -> (BlockPtr, BlockPtr) {
        let record = self
            .read(device, ptr)
            .expect("freeing an absent inode slot");
        self.store(device, ptr.index(), None);
        self.stack.push(ptr.index() as u16);
        (record.data_blk, record.meta_blk)
    }

    /// 记录所在的块ID与块内偏移
    fn pos(&self, device: &Arc<dyn BlockDevice>, index: usize) -> (usize, usize) {
        let per_block = device.block_size() / InodeRecord::SIZE;
        (
            self.start_blk + index / per_block,
            index % per_block * InodeRecord::SIZE,
        )
    }

    fn store(&self, device: &Arc<dyn BlockDevice>, index: usize, record: Option<&InodeRecord>) {
        let (blk, offset) = self.pos(device, index);
        let mut buf = block_pool::take(device.block_size());
        device
            .read_block(blk, &mut buf)
            .expect("inode block not ready");

        match record {
            Some(record) => record.encode(&mut buf[offset..offset + InodeRecord::SIZE]),
            None => buf[offset..offset + InodeRecord::SIZE].fill(0),
        }

        device.write_block(blk, &buf);
    }

    fn capacity_of(device: &Arc<dyn BlockDevice>, blocks: usize) -> usize {
        (blocks * device.block_size() / InodeRecord::SIZE).min(MAX_INODES)
    }
}
