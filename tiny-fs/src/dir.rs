//! # 目录层
//!
//! 目录就是一个普通文件，字节内容是紧排的16字节目录项；
//! 所有目录操作都以内部游标对父目录做文件读写，
//! 首字节为0的槽位是墓碑，遍历时跳过、插入时优先复用。

use log::trace;

use crate::fs::{FileSystem, Stat};
use crate::handle::{FileHandle, Handle, OpenFlag};
use crate::index::{Cursor, IndexIo};
use crate::layout::{DirEntry, InodeKind, InodePtr};
use crate::{block_pool, Error, Result};

impl FileSystem {
    /// 在目录下按名字查找
    pub fn lookup(&mut self, dir: InodePtr, name: &str) -> Result<InodePtr> {
        self.find_entry(dir, name).map(|(_, inode)| inode)
    }

    pub fn exists(&mut self, dir: InodePtr, name: &str) -> Result<bool> {
        match self.lookup(dir, name) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 在目录下创建普通文件
    pub fn create(&mut self, dir: InodePtr, name: &str) -> Result<InodePtr> {
        self.create_node(dir, name, InodeKind::File)
    }

    pub fn mkdir(&mut self, dir: InodePtr, name: &str) -> Result<InodePtr> {
        self.create_node(dir, name, InodeKind::Directory)
    }

    /// 删除目录；目录必须为空
    pub fn rmdir(&mut self, dir: InodePtr, name: &str) -> Result<()> {
        let (offset, target) = self.find_entry(dir, name)?;
        let record = self.read_inode(target)?;
        if !record.is_dir() {
            return Err(Error::NotADirectory);
        }

        let occupied = self.scan_dir(target, |_, entry| (!entry.is_tombstone()).then_some(()))?;
        if occupied.is_some() {
            return Err(Error::DirectoryNotEmpty);
        }

        self.remove_node(dir, offset, target)
    }

    /// 删除普通文件；正被打开的文件推迟到最后一次关闭再回收
    pub fn unlink(&mut self, dir: InodePtr, name: &str) -> Result<()> {
        let (offset, target) = self.find_entry(dir, name)?;
        let record = self.read_inode(target)?;
        if record.is_dir() {
            return Err(Error::IsADirectory);
        }

        self.remove_node(dir, offset, target)
    }

    pub fn opendir(&mut self, inode: InodePtr) -> Result<Handle> {
        let record = self.read_inode(inode)?;
        if !record.is_dir() {
            return Err(Error::NotADirectory);
        }

        let live = Self::live_entry(&mut self.files, inode, &record);
        live.refs += 1;
        let root_blk = live.root_blk;

        let io = IndexIo {
            device: &self.device,
            freelist: &mut self.freelist,
            geo: self.geo,
        };
        let cursor = Cursor::open(&io, root_blk);

        let id = self.next_handle();
        trace!("opendir inode {}: handle {:?}", inode.index(), id);
        self.dir_handles.insert(
            id,
            FileHandle {
                inode,
                flags: OpenFlag::READ.into(),
                cursor,
            },
        );
        Ok(id)
    }

    pub fn closedir(&mut self, handle: Handle) -> Result<()> {
        let closed = self.dir_handles.remove(&handle).ok_or(Error::BadHandle)?;
        self.release_live(closed.inode);
        Ok(())
    }

    /// 产出下一个非空目录项的元信息；遍历结束返回 `None`
    pub fn readdir(&mut self, handle: Handle) -> Result<Option<Stat>> {
        let handle = self.dir_handles.get_mut(&handle).ok_or(Error::BadHandle)?;
        let size = self
            .files
            .get(&handle.inode)
            .ok_or(Error::Internal)?
            .size;

        let mut io = IndexIo {
            device: &self.device,
            freelist: &mut self.freelist,
            geo: self.geo,
        };

        let mut bytes = [0u8; DirEntry::SIZE];
        let entry = loop {
            let (n, _) = io.read(&mut handle.cursor, size, &mut bytes)?;
            if n == 0 {
                break None;
            }
            if n != DirEntry::SIZE {
                return Err(Error::Internal);
            }

            let entry = DirEntry::decode(&bytes);
            if !entry.is_tombstone() {
                break Some(entry);
            }
        };
        let Some(entry) = entry else {
            return Ok(None);
        };

        let record = self
            .inodes
            .read(&self.device, entry.inode())
            .ok_or(Error::Internal)?;
        Ok(Some(Stat {
            name: Some(entry.name().into()),
            inode: entry.inode(),
            kind: record.kind.into(),
            executable: record.executable,
            mtime: record.mtime,
            size: record.size,
        }))
    }
}

impl FileSystem {
    /// 逐项遍历目录（含墓碑），`visit` 返回 `Some` 时提前结束
    fn scan_dir<T>(
        &mut self,
        dir: InodePtr,
        mut visit: impl FnMut(u32, &DirEntry) -> Option<T>,
    ) -> Result<Option<T>> {
        let record = self.read_inode(dir)?;
        if !record.is_dir() {
            return Err(Error::NotADirectory);
        }

        let live = Self::live_entry(&mut self.files, dir, &record);
        live.refs += 1;
        let size = live.size;
        let root_blk = live.root_blk;

        let mut io = IndexIo {
            device: &self.device,
            freelist: &mut self.freelist,
            geo: self.geo,
        };
        let mut cursor = Cursor::open(&io, root_blk);

        let mut outcome = Ok(None);
        let mut bytes = [0u8; DirEntry::SIZE];
        loop {
            let offset = cursor.abs;
            match io.read(&mut cursor, size, &mut bytes) {
                Ok((0, _)) => break,
                Ok((n, _)) if n == DirEntry::SIZE => {
                    let entry = DirEntry::decode(&bytes);
                    if let Some(found) = visit(offset, &entry) {
                        outcome = Ok(Some(found));
                        break;
                    }
                }
                // 目录大小必是16的倍数，短读即结构损坏
                Ok(_) => {
                    outcome = Err(Error::Internal);
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        self.release_live(dir);
        outcome
    }

    /// 按名字找到目录项，返回其字节偏移与 inode
    fn find_entry(&mut self, dir: InodePtr, name: &str) -> Result<(u32, InodePtr)> {
        self.scan_dir(dir, |offset, entry| {
            (!entry.is_tombstone() && entry.name() == name).then(|| (offset, entry.inode()))
        })?
        .ok_or(Error::NotFound)
    }

    fn create_node(&mut self, dir: InodePtr, name: &str, kind: InodeKind) -> Result<InodePtr> {
        if name.is_empty() || name.len() > DirEntry::NAME_CAP {
            return Err(Error::NameTooLong);
        }

        // 一趟扫描：既查重名，也记下第一个可复用的墓碑
        let mut slot = None;
        let clash = self.scan_dir(dir, |offset, entry| {
            if entry.is_tombstone() {
                if slot.is_none() {
                    slot = Some(offset);
                }
                return None;
            }
            (entry.name() == name).then_some(())
        })?;
        if clash.is_some() {
            return Err(Error::AlreadyExists);
        }
        let offset = match slot {
            Some(offset) => offset,
            None => self.logical_size(dir)?,
        };

        // 新文件至少占有一个索引块和一个数据块
        let index_blk = self.freelist.alloc(&self.device)?;
        let data_blk = match self.freelist.alloc(&self.device) {
            Ok(blk) => blk,
            Err(e) => {
                self.freelist.free(&self.device, index_blk);
                return Err(e);
            }
        };
        self.device.zero_block(index_blk.index());
        self.device.zero_block(data_blk.index());
        {
            let mut buf = block_pool::take(self.geo.block_size());
            data_blk.encode(&mut buf[0..2]);
            self.device.write_block(index_blk.index(), &buf);
        }

        let now = self.clock.now();
        let inode = match self.inodes.alloc(&self.device, kind, index_blk, now) {
            Ok(inode) => inode,
            Err(e) => {
                self.freelist.free(&self.device, data_blk);
                self.freelist.free(&self.device, index_blk);
                return Err(e);
            }
        };

        let mut bytes = [0u8; DirEntry::SIZE];
        DirEntry::new(name, inode).encode(&mut bytes);
        if let Err(e) = self.write_dir_slot(dir, offset, &bytes) {
            // 回滚刚分配的 inode 与块
            self.inodes.must_free(&self.device, inode);
            self.freelist.free(&self.device, data_blk);
            self.freelist.free(&self.device, index_blk);
            return Err(e);
        }

        trace!(
            "new {:?} {:?}: inode {} in dir {}",
            kind,
            name,
            inode.index(),
            dir.index()
        );
        Ok(inode)
    }

    /// 摘除目录项并回收目标：正被打开的推迟到最后一次关闭
    fn remove_node(&mut self, dir: InodePtr, offset: u32, target: InodePtr) -> Result<()> {
        self.write_dir_slot(dir, offset, &[0u8; DirEntry::SIZE])?;

        let deferred = match self.files.get_mut(&target) {
            Some(live) if live.refs > 0 => {
                live.deleted = true;
                true
            }
            _ => false,
        };

        if deferred {
            trace!("inode {} still open: deferring purge", target.index());
        } else {
            let (root_blk, _meta) = self.inodes.must_free(&self.device, target);
            self.io().purge(root_blk);
        }
        Ok(())
    }

    /// 以内部游标在目录文件的 `offset` 处写一整条目录项
    fn write_dir_slot(
        &mut self,
        dir: InodePtr,
        offset: u32,
        bytes: &[u8; DirEntry::SIZE],
    ) -> Result<()> {
        let record = self.read_inode(dir)?;
        let live = Self::live_entry(&mut self.files, dir, &record);
        live.refs += 1;
        let root_blk = live.root_blk;

        let mut io = IndexIo {
            device: &self.device,
            freelist: &mut self.freelist,
            geo: self.geo,
        };
        let mut cursor = Cursor::open(&io, root_blk);
        cursor.abs = offset;
        cursor.refs_invalid = true;

        let outcome = io.write(&mut cursor, &mut live.size, bytes);
        let size = live.size;

        self.release_live(dir);
        let now = self.clock.now();
        self.inodes
            .update(&self.device, dir, Some(size), Some(now))?;
        outcome.map(|_| ())
    }

    /// 打开期间以活动状态的大小为准
    fn logical_size(&self, inode: InodePtr) -> Result<u32> {
        if let Some(live) = self.files.get(&inode) {
            return Ok(live.size);
        }
        Ok(self.read_inode(inode)?.size)
    }
}
