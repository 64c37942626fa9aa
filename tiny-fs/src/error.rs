/// 面向调用者的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 名字为空或超出目录项的14字节容量
    NameTooLong,
    InvalidOffset,
    IsADirectory,
    NotADirectory,
    NotFound,
    AlreadyExists,
    /// 数据区或文件索引容量耗尽
    NoSpace,
    InvalidFsParams,
    Busy,
    NotReadable,
    NotWritable,
    NoFreeInodes,
    BadHandle,
    DirectoryNotEmpty,
    /// 磁盘字节违反了引擎刚刚建立的不变量
    Internal,
}
