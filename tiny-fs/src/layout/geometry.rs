//! 索引块的几何参数，全部由块大小推出。
//!
//! 索引块前半区顺次存放直接数据块指针，后半区存放间接指针；
//! 每个间接指针指向一个装满数据块指针的间接块。

/// 单个文件系统实例的寻址几何
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    block_size: usize,
}

impl Geometry {
    #[inline]
    pub const fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    #[inline]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// 索引块半区的字节数
    #[inline]
    pub const fn half(&self) -> usize {
        self.block_size / 2
    }

    /// 直接指针的数量
    #[inline]
    pub const fn direct_slots(&self) -> usize {
        self.block_size / 4
    }

    /// 间接指针槽位的数量
    #[inline]
    pub const fn indirect_slots(&self) -> usize {
        self.block_size / 4
    }

    /// 直接区域覆盖的字节数，越过它就进入间接寻址
    #[inline]
    pub const fn threshold(&self) -> usize {
        self.direct_slots() * self.block_size
    }

    /// 单个间接块覆盖的字节数
    #[inline]
    pub const fn indirect_span(&self) -> usize {
        self.half() * self.block_size
    }

    /// 文件大小上限
    #[inline]
    pub const fn max_file_size(&self) -> usize {
        self.threshold() + self.indirect_slots() * self.indirect_span()
    }
}
