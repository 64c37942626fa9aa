//! # 打开句柄层
//!
//! 同一 inode 的所有句柄共享一份"活动文件"记录：缓存的文件大小、
//! 删除标记与引用计数；句柄本身只带游标。文件句柄与目录句柄放在
//! 不同的表里，编号却出自同一个序列，回绕之后要跳过仍在用的号码。

use derive_more::{From, Into};
use enumflags2::{bitflags, BitFlags};

use crate::index::Cursor;
use crate::layout::{BlockPtr, InodePtr};

/// 打开实例的编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct Handle(u32);

#[rustfmt::skip]
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 供宿主组合"建并打开"时使用，核心不解释
    CREATE   = 0b00001,
    /// 打开后把游标移到文件末尾
    SEEK_END = 0b00010,
    /// 打开时清空文件
    TRUNCATE = 0b00100,
    READ     = 0b01000,
    WRITE    = 0b10000,
}

/// 每个打开的 inode 共享的活动状态
#[derive(Debug)]
pub(crate) struct LiveFile {
    /// 缓存自 inode 的根索引块
    pub root_blk: BlockPtr,
    /// 打开期间以此为准的文件大小
    pub size: u32,
    /// 已从目录摘除，最后一个句柄关闭时回收
    pub deleted: bool,
    /// 句柄数
    pub refs: u32,
}

/// 句柄持有的描述符状态
#[derive(Debug)]
pub(crate) struct FileHandle {
    pub inode: InodePtr,
    pub flags: BitFlags<OpenFlag>,
    pub cursor: Cursor,
}

/// 句柄号发生器，在 `i32::MAX` 处回绕
#[derive(Debug, Default)]
pub(crate) struct HandleSeq(u32);

impl HandleSeq {
    pub fn next(&mut self) -> Handle {
        let id = self.0;
        self.0 = if self.0 == i32::MAX as u32 {
            0
        } else {
            self.0 + 1
        };
        Handle(id)
    }
}
