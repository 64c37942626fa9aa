//! # 磁盘数据结构层
//!
//! 磁盘布局：
//! 配置块(0号) | inode 区域 | 空闲位图 | 数据与索引区
//!
//! 所有落盘整数均为大端。

mod config;
pub use config::Config;

mod geometry;
pub use geometry::Geometry;

mod inode;
pub use inode::{InodeKind, InodeRecord};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;

use derive_more::{From, Into};

/// 块指针；0 表示"无块"，0号块保留给配置区
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct BlockPtr(u16);

impl BlockPtr {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// 块ID，交给块设备使用
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn decode(buf: &[u8]) -> Self {
        Self(u16::from_be_bytes([buf[0], buf[1]]))
    }

    #[inline]
    pub fn encode(self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.0.to_be_bytes());
    }
}

/// inode 指针：inode 表内的记录索引
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct InodePtr(u16);

impl InodePtr {
    /// 根目录，格式化时创建
    pub const ROOT: Self = Self(0);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn decode(buf: &[u8]) -> Self {
        Self(u16::from_be_bytes([buf[0], buf[1]]))
    }

    #[inline]
    pub fn encode(self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.0.to_be_bytes());
    }
}
