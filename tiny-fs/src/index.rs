//! # 文件索引引擎
//!
//! 每个文件恰有一个索引块：前半区顺次存放直接数据块指针，
//! 后半区存放间接指针，每个间接指针指向一整块的数据块指针。
//! 0号指针表示"尚未分配"。
//!
//! 游标以 (根, 中, 数据) 三级位置沿文件推进；seek 不会立刻
//! 重走索引，只把三级位置标记为过期，下一次I/O再按绝对偏移
//! 纯算术重建。

use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::block_pool;
use crate::freelist::Freelist;
use crate::layout::{BlockPtr, Geometry};
use crate::{Error, Result};

/// 单级位置：块 + 块内字节偏移
#[derive(Debug, Clone, Copy, Default)]
pub struct Level {
    pub blk: BlockPtr,
    pub off: usize,
}

/// 打开实例持有的游标
#[derive(Debug, Clone)]
pub struct Cursor {
    /// 绝对字节偏移
    pub abs: u32,
    /// 索引块内的位置
    pub root: Level,
    /// 当前间接块内的位置，仅 deep 时有意义
    pub mid: Level,
    /// 当前数据块内的位置
    pub data: Level,
    /// 已越过直接区域
    pub deep: bool,
    /// 三级位置已过期，下次I/O前需按 abs 重算
    pub refs_invalid: bool,
    /// 最近一次读取是否短于请求且触及文件末尾
    pub hit_eof: bool,
}

/// 索引遍历所需的上下文
pub struct IndexIo<'a> {
    pub device: &'a Arc<dyn BlockDevice>,
    pub freelist: &'a mut Freelist,
    pub geo: Geometry,
}

impl Cursor {
    /// 打开时机的游标：数据级取索引块的0号指针
    pub fn open(io: &IndexIo, root_blk: BlockPtr) -> Self {
        let data_blk = io.load_ptr(root_blk, 0);
        assert!(!data_blk.is_null(), "file lost its first data block");

        Self {
            abs: 0,
            root: Level {
                blk: root_blk,
                off: 0,
            },
            mid: Level::default(),
            data: Level {
                blk: data_blk,
                off: 0,
            },
            deep: false,
            refs_invalid: false,
            hit_eof: false,
        }
    }
}

impl IndexIo<'_> {
    /// 读取至多 `buf.len()` 字节，返回读取数与是否触及文件末尾
    pub fn read(&mut self, cur: &mut Cursor, size: u32, buf: &mut [u8]) -> Result<(usize, bool)> {
        let want = buf.len();
        let avail = size.saturating_sub(cur.abs) as usize;
        let total = want.min(avail);
        if total == 0 {
            cur.hit_eof = want > 0;
            return Ok((0, cur.hit_eof));
        }

        if cur.refs_invalid {
            self.update_refs(cur, size);
        }

        let block_size = self.geo.block_size();
        let mut scratch = block_pool::take(block_size);
        let mut done = 0;
        while done < total {
            if cur.data.off == block_size {
                self.advance(cur)?;
            }

            let step = (total - done).min(block_size - cur.data.off);
            self.load_block(cur.data.blk, &mut scratch);
            buf[done..done + step].copy_from_slice(&scratch[cur.data.off..cur.data.off + step]);

            cur.data.off += step;
            cur.abs += step as u32;
            done += step;
        }

        cur.hit_eof = want > total && cur.abs == size;
        Ok((total, cur.hit_eof))
    }

    /// 写入整个 `buf`，必要时分配新块。
    /// 空间耗尽时返回 `NoSpace`，已写入的部分保持落盘，
    /// `size` 仍会按游标越过的范围增长。
    pub fn write(&mut self, cur: &mut Cursor, size: &mut u32, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if cur.refs_invalid {
            self.update_refs(cur, *size);
        }

        let block_size = self.geo.block_size();
        let mut scratch = block_pool::take(block_size);
        let mut done = 0;
        while done < buf.len() {
            if cur.data.off == block_size {
                if let Err(e) = self.advance(cur) {
                    *size = (*size).max(cur.abs);
                    return Err(e);
                }
            }

            let step = (buf.len() - done).min(block_size - cur.data.off);
            // 读-改-写整块
            self.load_block(cur.data.blk, &mut scratch);
            scratch[cur.data.off..cur.data.off + step].copy_from_slice(&buf[done..done + step]);
            self.store_block(cur.data.blk, &scratch);

            cur.data.off += step;
            cur.abs += step as u32;
            done += step;
        }

        *size = (*size).max(cur.abs);
        Ok(done)
    }

    /// 当前数据块耗尽时向后推进一格，缺块则分配并清零
    pub fn advance(&mut self, cur: &mut Cursor) -> Result<()> {
        let half = self.geo.half();
        let block_size = self.geo.block_size();

        if !cur.deep && cur.root.off + 2 < half {
            // 直接区域内的下一个指针
            cur.root.off += 2;
            let ptr = self.load_or_alloc_ptr(cur.root.blk, cur.root.off)?;
            cur.data = Level { blk: ptr, off: 0 };
        } else if !cur.deep {
            // 跨入间接区域：占用0号间接槽
            cur.root.off = half;
            let mid_blk = self.load_or_alloc_ptr(cur.root.blk, cur.root.off)?;
            let data_blk = self.load_or_alloc_ptr(mid_blk, 0)?;
            cur.mid = Level {
                blk: mid_blk,
                off: 0,
            };
            cur.data = Level {
                blk: data_blk,
                off: 0,
            };
            cur.deep = true;
        } else if cur.mid.off + 2 < block_size {
            // 当前间接块内的下一个数据指针
            cur.mid.off += 2;
            let ptr = self.load_or_alloc_ptr(cur.mid.blk, cur.mid.off)?;
            cur.data = Level { blk: ptr, off: 0 };
        } else if cur.root.off + 2 < block_size {
            // 下一个间接槽
            cur.root.off += 2;
            let mid_blk = self.load_or_alloc_ptr(cur.root.blk, cur.root.off)?;
            let data_blk = self.load_or_alloc_ptr(mid_blk, 0)?;
            cur.mid = Level {
                blk: mid_blk,
                off: 0,
            };
            cur.data = Level {
                blk: data_blk,
                off: 0,
            };
        } else {
            return Err(Error::NoSpace);
        }

        Ok(())
    }

    /// 按 abs 纯算术重建三级位置（惰性 seek 之后）
    pub fn update_refs(&self, cur: &mut Cursor, size: u32) {
        let block_size = self.geo.block_size();
        let half = self.geo.half();
        let threshold = self.geo.threshold();
        let span = self.geo.indirect_span();

        // 游标恰在块界对齐的文件末尾时，不存在 abs 所在的块：
        // 回退一块定位，再把块内偏移置为块大小，让下次写入先推进
        let mut abs = cur.abs as usize;
        let primed = abs == size as usize && abs > 0 && abs % block_size == 0;
        if primed {
            abs -= block_size;
        }

        if abs < threshold {
            cur.deep = false;
            cur.root.off = abs / block_size * 2;
            cur.data.blk = self.load_ptr(cur.root.blk, cur.root.off);
        } else {
            cur.deep = true;
            let rest = abs - threshold;
            cur.root.off = half + rest / span * 2;
            let mid_blk = self.load_ptr(cur.root.blk, cur.root.off);
            cur.mid = Level {
                blk: mid_blk,
                off: rest % span / block_size * 2,
            };
            cur.data.blk = self.load_ptr(mid_blk, cur.mid.off);
        }

        cur.data.off = if primed { block_size } else { abs % block_size };
        cur.refs_invalid = false;
    }

    /// 清空文件内容，但保留索引块与0号数据块（双双清零）
    pub fn truncate(&mut self, root_blk: BlockPtr) {
        let block_size = self.geo.block_size();
        let half = self.geo.half();

        let mut index = block_pool::take(block_size);
        self.load_block(root_blk, &mut index);

        /******************** 直接区域 ********************/
        for off in (2..half).step_by(2) {
            let ptr = BlockPtr::decode(&index[off..off + 2]);
            if !ptr.is_null() {
                self.freelist.free(self.device, ptr);
            }
        }
        /******************** END ********************/

        /******************** 间接区域 ********************/
        {
            let mut mid = block_pool::take(block_size);
            for off in (half..block_size).step_by(2) {
                let ptr = BlockPtr::decode(&index[off..off + 2]);
                if ptr.is_null() {
                    continue;
                }
                self.load_block(ptr, &mut mid);
                for off in (0..block_size).step_by(2) {
                    let data = BlockPtr::decode(&mid[off..off + 2]);
                    if !data.is_null() {
                        self.freelist.free(self.device, data);
                    }
                }
                self.freelist.free(self.device, ptr);
            }
        }
        /******************** END ********************/

        let first = BlockPtr::decode(&index[0..2]);
        assert!(!first.is_null(), "file lost its first data block");
        index[2..].fill(0);
        self.store_block(root_blk, &index);
        self.device.zero_block(first.index());
    }

    /// 释放文件引用的全部数据块与间接块，连同索引块本身
    pub fn purge(&mut self, root_blk: BlockPtr) {
        let block_size = self.geo.block_size();
        let half = self.geo.half();

        let mut index = block_pool::take(block_size);
        self.load_block(root_blk, &mut index);

        /******************** 直接区域 ********************/
        for off in (0..half).step_by(2) {
            let ptr = BlockPtr::decode(&index[off..off + 2]);
            if !ptr.is_null() {
                self.freelist.free(self.device, ptr);
            }
        }
        /******************** END ********************/

        /******************** 间接区域 ********************/
        {
            let mut mid = block_pool::take(block_size);
            for off in (half..block_size).step_by(2) {
                let ptr = BlockPtr::decode(&index[off..off + 2]);
                if ptr.is_null() {
                    continue;
                }
                self.load_block(ptr, &mut mid);
                for off in (0..block_size).step_by(2) {
                    let data = BlockPtr::decode(&mid[off..off + 2]);
                    if !data.is_null() {
                        self.freelist.free(self.device, data);
                    }
                }
                self.freelist.free(self.device, ptr);
            }
        }
        /******************** END ********************/

        self.freelist.free(self.device, root_blk);
    }

    fn load_block(&self, blk: BlockPtr, buf: &mut [u8]) {
        assert!(!blk.is_null());
        self.device
            .read_block(blk.index(), buf)
            .expect("block device not ready");
    }

    #[inline]
    fn store_block(&self, blk: BlockPtr, buf: &[u8]) {
        self.device.write_block(blk.index(), buf);
    }

    /// 读取 `blk` 中 `offset` 处的块指针
    fn load_ptr(&self, blk: BlockPtr, offset: usize) -> BlockPtr {
        let mut buf = block_pool::take(self.geo.block_size());
        self.load_block(blk, &mut buf);
        BlockPtr::decode(&buf[offset..offset + 2])
    }

    /// 指针槽为空时分配一个清零的新块并写回槽位
    fn load_or_alloc_ptr(&mut self, blk: BlockPtr, offset: usize) -> Result<BlockPtr> {
        let mut buf = block_pool::take(self.geo.block_size());
        self.load_block(blk, &mut buf);

        let ptr = BlockPtr::decode(&buf[offset..offset + 2]);
        if !ptr.is_null() {
            return Ok(ptr);
        }

        let fresh = self.freelist.alloc(self.device)?;
        self.device.zero_block(fresh.index());
        fresh.encode(&mut buf[offset..offset + 2]);
        self.store_block(blk, &buf);
        Ok(fresh)
    }
}
