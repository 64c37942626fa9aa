#![no_std]

extern crate alloc;

/* tiny-fs 的整体架构，自上而下 */

// 文件系统门面：format/init 与全部公开操作
mod fs;

// 目录层：以文件字节承载定长目录项
mod dir;

// 打开句柄层：活动文件状态与句柄表
mod handle;

// 文件索引引擎：两级索引寻址与游标推进
mod index;

// inode 表
mod inode_table;

// 空闲块管理
mod freelist;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 暂存块缓冲池
mod block_pool;

// 时钟接口
mod clock;

// 错误分类
mod error;

pub use self::{
    clock::Clock,
    error::Error,
    fs::{format, FileSystem, Stat, StatKind, Whence},
    handle::{Handle, OpenFlag},
    layout::{BlockPtr, Config, DirEntry, Geometry, InodeKind, InodePtr, InodeRecord},
};

pub type Result<T> = core::result::Result<T, Error>;
