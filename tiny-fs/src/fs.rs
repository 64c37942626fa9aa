//! # 文件系统门面
//!
//! 组合底下各层，对外提供完整的操作集：
//! 调用者用 `(父目录inode, 名字)` 或句柄发起操作，
//! 每个操作在目标文件或目录上展开内部游标、完成索引遍历后归还。

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use block_dev::BlockDevice;
use enumflags2::BitFlags;
use log::{debug, trace};

use crate::clock::Clock;
use crate::freelist::Freelist;
use crate::handle::{FileHandle, Handle, HandleSeq, LiveFile, OpenFlag};
use crate::index::{Cursor, IndexIo};
use crate::inode_table::InodeTable;
use crate::layout::{Config, Geometry, InodeKind, InodePtr, InodeRecord};
use crate::{block_pool, Error, Result};

/// 调用者观察到的文件系统项元信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// 只有 `readdir` 会填充名字
    pub name: Option<String>,
    pub inode: InodePtr,
    pub kind: StatKind,
    pub executable: bool,
    pub mtime: u32,
    pub size: u32,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    File = 1,
    Directory = 2,
}

impl From<InodeKind> for StatKind {
    #[inline]
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::File => Self::File,
            InodeKind::Directory => Self::Directory,
        }
    }
}

/// seek 的基准点
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Abs = 0,
    RelCurr = 1,
    RelEnd = 2,
}

/// 格式化设备并返回16字节配置头，由调用者负责持久化。
///
/// inode 区域以8块为单位编码进配置头，块数必须是8的倍数。
pub fn format(
    device: &Arc<dyn BlockDevice>,
    clock: &dyn Clock,
    inode_blocks: usize,
) -> Result<[u8; Config::SIZE]> {
    let block_size = device.block_size();
    if !block_size.is_power_of_two() || block_size < 32 {
        return Err(Error::InvalidFsParams);
    }
    if inode_blocks == 0 || inode_blocks % 8 != 0 || inode_blocks / 8 > 256 {
        return Err(Error::InvalidFsParams);
    }
    // 块指针只有16位
    if device.block_count() > u16::MAX as usize + 1 {
        return Err(Error::InvalidFsParams);
    }
    // 布局至少要容纳配置块、inode 区、位图与根目录的索引块和数据块
    let bitmap_blocks = device.block_count().div_ceil(block_size * 8);
    if 1 + inode_blocks + bitmap_blocks + 2 > device.block_count() {
        return Err(Error::InvalidFsParams);
    }

    debug!(
        "formatting: {} blocks of {} bytes, {} inode blocks",
        device.block_count(),
        block_size,
        inode_blocks
    );

    let mut inodes = InodeTable::create(device, 1, inode_blocks);
    let mut freelist = Freelist::create(device, 1 + inode_blocks);
    debug!("data pool starts at block {}", freelist.data_start());

    // 根目录：索引块、首个数据块、0号 inode
    let index_blk = freelist.alloc(device)?;
    let data_blk = freelist.alloc(device)?;
    device.zero_block(index_blk.index());
    device.zero_block(data_blk.index());

    let mut buf = block_pool::take(block_size);
    data_blk.encode(&mut buf[0..2]);
    device.write_block(index_blk.index(), &buf);

    let root = inodes.alloc(device, InodeKind::Directory, index_blk, clock.now())?;
    assert_eq!(InodePtr::ROOT, root);

    Ok(Config::new(inode_blocks).encode())
}

pub struct FileSystem {
    pub(crate) device: Arc<dyn BlockDevice>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) geo: Geometry,
    pub(crate) inodes: InodeTable,
    pub(crate) freelist: Freelist,
    /// 活动文件状态，按 inode 指针索引
    pub(crate) files: BTreeMap<InodePtr, LiveFile>,
    pub(crate) file_handles: BTreeMap<Handle, FileHandle>,
    pub(crate) dir_handles: BTreeMap<Handle, FileHandle>,
    pub(crate) seq: HandleSeq,
}

impl FileSystem {
    /// 凭配置头装载一幅已格式化的磁盘
    pub fn init(
        device: Arc<dyn BlockDevice>,
        clock: Arc<dyn Clock>,
        config: &[u8; Config::SIZE],
    ) -> Result<Self> {
        let config = Config::decode(config)?;
        let block_size = device.block_size();
        if !block_size.is_power_of_two() || block_size < 32 {
            return Err(Error::InvalidFsParams);
        }
        if device.block_count() > u16::MAX as usize + 1 {
            return Err(Error::InvalidFsParams);
        }

        // 一台设备同一时刻只服务一个文件系统实例
        if !device.bind() {
            return Err(Error::Busy);
        }

        let inodes = InodeTable::init(&device, 1, config.inode_blocks());
        let freelist = Freelist::init(&device, 1 + config.inode_blocks());

        // 根 inode 必须在场且是目录
        match inodes.read(&device, InodePtr::ROOT) {
            Some(record) if record.is_dir() => {}
            _ => {
                device.unbind();
                return Err(Error::InvalidFsParams);
            }
        }

        debug!(
            "filesystem up: {} free blocks, {} free inodes",
            freelist.free_block_count(),
            inodes.free_count()
        );

        Ok(Self {
            geo: Geometry::new(block_size),
            device,
            clock,
            inodes,
            freelist,
            files: BTreeMap::new(),
            file_handles: BTreeMap::new(),
            dir_handles: BTreeMap::new(),
            seq: HandleSeq::default(),
        })
    }

    #[inline]
    pub fn geometry(&self) -> Geometry {
        self.geo
    }

    #[inline]
    pub fn free_block_count(&self) -> usize {
        self.freelist.free_block_count()
    }

    #[inline]
    pub fn free_inode_count(&self) -> usize {
        self.inodes.free_count()
    }

    pub fn stat(&self, inode: InodePtr) -> Result<Stat> {
        let record = self.read_inode(inode)?;
        // 打开期间以活动状态的大小为准
        let size = self
            .files
            .get(&inode)
            .map_or(record.size, |live| live.size);

        Ok(Stat {
            name: None,
            inode,
            kind: record.kind.into(),
            executable: record.executable,
            mtime: record.mtime,
            size,
        })
    }

    pub fn set_executable(&mut self, inode: InodePtr, executable: bool) -> Result<()> {
        self.read_inode(inode)?;
        self.inodes.set_executable(&self.device, inode, executable)
    }

    /// 打开一个普通文件
    pub fn open(&mut self, inode: InodePtr, flags: BitFlags<OpenFlag>) -> Result<Handle> {
        let record = self.read_inode(inode)?;
        if record.is_dir() {
            return Err(Error::IsADirectory);
        }

        let live = Self::live_entry(&mut self.files, inode, &record);
        live.refs += 1;

        // 不能截断已被其它句柄打开的文件
        if flags.contains(OpenFlag::TRUNCATE) && live.refs > 1 {
            live.refs -= 1;
            return Err(Error::Busy);
        }
        let root_blk = live.root_blk;

        let mut io = IndexIo {
            device: &self.device,
            freelist: &mut self.freelist,
            geo: self.geo,
        };
        let mut cursor = Cursor::open(&io, root_blk);

        if flags.contains(OpenFlag::TRUNCATE) {
            io.truncate(root_blk);
            live.size = 0;
        }
        if flags.contains(OpenFlag::SEEK_END) {
            cursor.abs = live.size;
            cursor.refs_invalid = true;
        }

        if flags.contains(OpenFlag::TRUNCATE) {
            let now = self.clock.now();
            if let Err(e) = self.inodes.update(&self.device, inode, Some(0), Some(now)) {
                self.release_live(inode);
                return Err(e);
            }
        }

        let id = self.next_handle();
        trace!("open inode {}: handle {:?}", inode.index(), id);
        self.file_handles
            .insert(id, FileHandle { inode, flags, cursor });
        Ok(id)
    }

    pub fn close(&mut self, handle: Handle) -> Result<()> {
        let closed = self
            .file_handles
            .remove(&handle)
            .ok_or(Error::BadHandle)?;
        trace!("close inode {}: handle {:?}", closed.inode.index(), handle);
        self.release_live(closed.inode);
        Ok(())
    }

    /// 读取至多 `buf.len()` 字节，返回读取数与是否触及文件末尾
    pub fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<(usize, bool)> {
        let handle = self
            .file_handles
            .get_mut(&handle)
            .ok_or(Error::BadHandle)?;
        if !handle.flags.contains(OpenFlag::READ) {
            return Err(Error::NotReadable);
        }

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
        io.read(&mut handle.cursor, size, buf)
    }

    /// 写入整个 `buf`；游标越过文件末尾时同步增长文件
    pub fn write(&mut self, handle: Handle, buf: &[u8]) -> Result<usize> {
        let handle = self
            .file_handles
            .get_mut(&handle)
            .ok_or(Error::BadHandle)?;
        if !handle.flags.contains(OpenFlag::WRITE) {
            return Err(Error::NotWritable);
        }
        let inode = handle.inode;

        let live = self.files.get_mut(&inode).ok_or(Error::Internal)?;
        let mut io = IndexIo {
            device: &self.device,
            freelist: &mut self.freelist,
            geo: self.geo,
        };
        let outcome = io.write(&mut handle.cursor, &mut live.size, buf);

        // 无论成败都把实际达到的大小落盘
        let size = live.size;
        let now = self.clock.now();
        self.inodes
            .update(&self.device, inode, Some(size), Some(now))?;
        outcome
    }

    /// 移动游标；只校验目标落在 `[0, size]` 内，索引重走推迟到下次I/O
    pub fn seek(&mut self, handle: Handle, offset: i64, whence: Whence) -> Result<()> {
        let handle = self
            .file_handles
            .get_mut(&handle)
            .ok_or(Error::BadHandle)?;
        let size = self
            .files
            .get(&handle.inode)
            .ok_or(Error::Internal)?
            .size;

        let base = match whence {
            Whence::Abs => 0,
            Whence::RelCurr => handle.cursor.abs as i64,
            Whence::RelEnd => size as i64,
        };
        let target = base.checked_add(offset).ok_or(Error::InvalidOffset)?;
        if target < 0 || target > size as i64 {
            return Err(Error::InvalidOffset);
        }

        handle.cursor.abs = target as u32;
        handle.cursor.refs_invalid = true;
        handle.cursor.hit_eof = false;
        Ok(())
    }

    pub fn tell(&self, handle: Handle) -> Result<u32> {
        let handle = self.file_handles.get(&handle).ok_or(Error::BadHandle)?;
        Ok(handle.cursor.abs)
    }

    pub fn eof(&self, handle: Handle) -> Result<bool> {
        let handle = self.file_handles.get(&handle).ok_or(Error::BadHandle)?;
        Ok(handle.cursor.hit_eof)
    }
}

impl FileSystem {
    pub(crate) fn read_inode(&self, inode: InodePtr) -> Result<InodeRecord> {
        self.inodes
            .read(&self.device, inode)
            .ok_or(Error::NotFound)
    }

    /// 取出或建立 inode 的活动状态
    pub(crate) fn live_entry<'a>(
        files: &'a mut BTreeMap<InodePtr, LiveFile>,
        inode: InodePtr,
        record: &InodeRecord,
    ) -> &'a mut LiveFile {
        files.entry(inode).or_insert_with(|| LiveFile {
            root_blk: record.data_blk,
            size: record.size,
            deleted: false,
            refs: 0,
        })
    }

    /// 归还一份活动状态；被删除的 inode 在最后一次归还时回收存储
    pub(crate) fn release_live(&mut self, inode: InodePtr) {
        let live = self
            .files
            .get_mut(&inode)
            .expect("releasing an inode that is not open");
        live.refs -= 1;
        if live.refs > 0 {
            return;
        }

        let deleted = live.deleted;
        self.files.remove(&inode);
        if deleted {
            trace!("last close of deleted inode {}: purging", inode.index());
            let (root_blk, _meta) = self.inodes.must_free(&self.device, inode);
            let mut io = IndexIo {
                device: &self.device,
                freelist: &mut self.freelist,
                geo: self.geo,
            };
            io.purge(root_blk);
        }
    }

    /// 取下一个句柄号；序列回绕后可能撞上仍在用的号码，要跳过
    pub(crate) fn next_handle(&mut self) -> Handle {
        loop {
            let id = self.seq.next();
            if !self.file_handles.contains_key(&id) && !self.dir_handles.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn io(&mut self) -> IndexIo<'_> {
        IndexIo {
            device: &self.device,
            freelist: &mut self.freelist,
            geo: self.geo,
        }
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        // 设备归外部所有，只解除绑定
        self.device.unbind();
    }
}
