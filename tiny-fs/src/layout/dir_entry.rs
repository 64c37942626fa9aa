use super::InodePtr;

/// 文件系统项的元信息，打包存放在目录文件的字节里
#[derive(Debug, Default, Clone)]
pub struct DirEntry {
    // 零填充；恰好14字节的名字没有NUL结尾
    name: [u8; Self::NAME_CAP],
    inode: InodePtr,
}

impl DirEntry {
    /// 元信息大小恒为16字节
    pub const SIZE: usize = 16;
    /// 名字容量
    pub const NAME_CAP: usize = 14;

    #[inline]
    pub fn new(name: &str, inode: InodePtr) -> Self {
        let bytes = name.as_bytes();
        let mut name = [0; Self::NAME_CAP];
        name[..bytes.len()].copy_from_slice(bytes);

        Self { name, inode }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(Self::NAME_CAP);
        core::str::from_utf8(&self.name[..len]).expect("dir entry name is not UTF-8")
    }

    #[inline]
    pub fn inode(&self) -> InodePtr {
        self.inode
    }

    /// 首字节为0即墓碑：已删除或从未使用的槽位
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.name[0] == 0
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0; Self::NAME_CAP];
        name.copy_from_slice(&buf[..Self::NAME_CAP]);

        Self {
            name,
            inode: InodePtr::decode(&buf[Self::NAME_CAP..Self::SIZE]),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..Self::NAME_CAP].copy_from_slice(&self.name);
        self.inode.encode(&mut buf[Self::NAME_CAP..Self::SIZE]);
    }
}
