mod common;

use std::sync::Arc;

use block_dev::BlockDevice;
use tiny_fs::{Error, FileSystem, InodePtr, OpenFlag, StatKind, Whence};

#[test]
fn format_then_init_yields_an_empty_root() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let root = fs.stat(InodePtr::ROOT).unwrap();
    assert_eq!(StatKind::Directory, root.kind);
    assert_eq!(0, root.size);
    assert_eq!(None, root.name);
    assert_eq!(common::CLOCK.0, root.mtime);

    let dir = fs.opendir(InodePtr::ROOT).unwrap();
    assert_eq!(None, fs.readdir(dir).unwrap());
    fs.closedir(dir).unwrap();
}

#[test]
fn a_second_process_can_reopen_the_disk() {
    let (disk, config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "state").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();
    assert_eq!(9, fs.write(fd, b"persisted").unwrap());
    fs.close(fd).unwrap();
    drop(fs);

    let device: Arc<dyn BlockDevice> = disk;
    let mut fs = FileSystem::init(device, Arc::new(common::CLOCK), &config).unwrap();
    let inode = fs.lookup(InodePtr::ROOT, "state").unwrap();
    let fd = fs.open(inode, OpenFlag::READ.into()).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!((9, true), fs.read(fd, &mut buf).unwrap());
    assert_eq!(b"persisted", &buf[..9]);
    fs.close(fd).unwrap();
}

#[test]
fn one_filesystem_instance_per_device() {
    let (disk, config, fs) = common::fresh(512, 256, 8);
    let device: Arc<dyn BlockDevice> = disk;

    match FileSystem::init(device.clone(), Arc::new(common::CLOCK), &config) {
        Err(Error::Busy) => {}
        _ => panic!("device bound twice"),
    }

    drop(fs);
    assert!(FileSystem::init(device, Arc::new(common::CLOCK), &config).is_ok());
}

#[test]
fn format_validates_its_parameters() {
    let (disk, _config, _fs) = common::fresh(512, 256, 8);
    let device: Arc<dyn BlockDevice> = disk;

    // inode 区域必须是8块的倍数
    assert_eq!(
        Err(Error::InvalidFsParams),
        tiny_fs::format(&device, &common::CLOCK, 12).map(|_| ())
    );
    assert_eq!(
        Err(Error::InvalidFsParams),
        tiny_fs::format(&device, &common::CLOCK, 0).map(|_| ())
    );
}

#[test]
fn mkdir_rmdir_churn() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    for name in ["a", "b", "c"] {
        fs.mkdir(InodePtr::ROOT, name).unwrap();
    }
    fs.rmdir(InodePtr::ROOT, "b").unwrap();
    fs.mkdir(InodePtr::ROOT, "d").unwrap();

    assert!(!fs.exists(InodePtr::ROOT, "b").unwrap());
    assert!(fs.exists(InodePtr::ROOT, "a").unwrap());

    let dir = fs.opendir(InodePtr::ROOT).unwrap();
    let mut names = Vec::new();
    while let Some(stat) = fs.readdir(dir).unwrap() {
        assert_eq!(StatKind::Directory, stat.kind);
        names.push(stat.name.unwrap());
    }
    fs.closedir(dir).unwrap();

    names.sort();
    assert_eq!(vec!["a", "c", "d"], names);
}

#[test]
fn write_then_read_small() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "hello").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();

    assert_eq!(13, fs.write(fd, b"Hello, World!").unwrap());
    fs.seek(fd, 0, Whence::Abs).unwrap();

    let mut buf = [0u8; 13];
    assert_eq!((13, false), fs.read(fd, &mut buf).unwrap());
    assert_eq!(b"Hello, World!", &buf);
    assert!(!fs.eof(fd).unwrap());
    assert_eq!(13, fs.tell(fd).unwrap());

    fs.close(fd).unwrap();
}

#[test]
fn overwrite_then_extend() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "hello").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();
    fs.write(fd, b"Hello, World!").unwrap();

    // 覆写开头不改变大小
    fs.seek(fd, 0, Whence::Abs).unwrap();
    fs.write(fd, b"FNARR").unwrap();
    assert_eq!(13, fs.stat(inode).unwrap().size);

    // 从末尾续写
    fs.seek(fd, 13, Whence::Abs).unwrap();
    fs.write(fd, b" This is goodbye :(").unwrap();
    assert_eq!(32, fs.stat(inode).unwrap().size);

    fs.seek(fd, 0, Whence::Abs).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!((32, false), fs.read(fd, &mut buf).unwrap());
    assert_eq!(b"FNARR, World! This is goodbye :(", &buf);

    fs.close(fd).unwrap();
}

#[test]
fn eof_flag_semantics() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "f").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();
    fs.write(fd, b"fnord").unwrap();

    // 游标在文件末尾：非空读触发EOF，空读不触发
    let mut byte = [0u8; 1];
    assert_eq!((0, true), fs.read(fd, &mut byte).unwrap());
    assert!(fs.eof(fd).unwrap());
    assert_eq!((0, false), fs.read(fd, &mut []).unwrap());
    assert!(!fs.eof(fd).unwrap());

    // 短读同样触发EOF
    fs.seek(fd, 3, Whence::Abs).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!((2, true), fs.read(fd, &mut buf).unwrap());
    assert_eq!(b"rd", &buf[..2]);

    fs.close(fd).unwrap();
}

#[test]
fn size_grows_to_the_write_end() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "f").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();
    fs.write(fd, &[7u8; 100]).unwrap();
    assert_eq!(100, fs.stat(inode).unwrap().size);

    // 文件中段的覆写不涨大小
    fs.seek(fd, 40, Whence::Abs).unwrap();
    fs.write(fd, &[9u8; 20]).unwrap();
    assert_eq!(100, fs.stat(inode).unwrap().size);

    // 越过末尾才涨
    fs.seek(fd, 90, Whence::Abs).unwrap();
    fs.write(fd, &[5u8; 20]).unwrap();
    assert_eq!(110, fs.stat(inode).unwrap().size);

    fs.close(fd).unwrap();
}

#[test]
fn seek_rejects_out_of_range_targets() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "f").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();
    fs.write(fd, &[1u8; 10]).unwrap();

    assert_eq!(Err(Error::InvalidOffset), fs.seek(fd, -1, Whence::Abs));
    assert_eq!(Err(Error::InvalidOffset), fs.seek(fd, 11, Whence::Abs));
    assert_eq!(Err(Error::InvalidOffset), fs.seek(fd, 1, Whence::RelEnd));
    assert_eq!(Err(Error::InvalidOffset), fs.seek(fd, i64::MAX, Whence::RelCurr));

    fs.seek(fd, -10, Whence::RelEnd).unwrap();
    assert_eq!(0, fs.tell(fd).unwrap());
    fs.seek(fd, 10, Whence::RelCurr).unwrap();
    assert_eq!(10, fs.tell(fd).unwrap());

    fs.close(fd).unwrap();
}

#[test]
fn block_aligned_end_primes_the_next_write() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "f").unwrap();
    let fd = fs.open(inode, OpenFlag::WRITE.into()).unwrap();
    let first: Vec<u8> = (0..512).map(|i| i as u8).collect();
    assert_eq!(512, fs.write(fd, &first).unwrap());
    fs.close(fd).unwrap();

    // 重新打开并定位到恰好块对齐的末尾，写入必须先推进到新块
    let fd = fs
        .open(inode, OpenFlag::READ | OpenFlag::WRITE | OpenFlag::SEEK_END)
        .unwrap();
    assert_eq!(512, fs.tell(fd).unwrap());
    assert_eq!(4, fs.write(fd, b"more").unwrap());
    assert_eq!(516, fs.stat(inode).unwrap().size);

    fs.seek(fd, 0, Whence::Abs).unwrap();
    let mut buf = vec![0u8; 516];
    assert_eq!((516, false), fs.read(fd, &mut buf).unwrap());
    assert_eq!(first, buf[..512]);
    assert_eq!(b"more", &buf[512..]);

    fs.close(fd).unwrap();
}

#[test]
fn truncate_of_an_open_file_is_busy() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "f").unwrap();
    let free_after_create = fs.free_block_count();

    let fd = fs.open(inode, OpenFlag::WRITE.into()).unwrap();
    fs.write(fd, &[3u8; 2000]).unwrap();

    assert_eq!(
        Err(Error::Busy),
        fs.open(inode, OpenFlag::TRUNCATE | OpenFlag::WRITE).map(|_| ())
    );
    fs.close(fd).unwrap();

    let fd = fs.open(inode, OpenFlag::TRUNCATE | OpenFlag::WRITE).unwrap();
    assert_eq!(0, fs.stat(inode).unwrap().size);
    // 除保留的首个数据块外，其余数据块都已归还
    assert_eq!(free_after_create, fs.free_block_count());
    fs.close(fd).unwrap();
}

#[test]
fn unlink_of_an_open_file_defers_the_purge() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);
    let free_before = fs.free_block_count();
    let inodes_before = fs.free_inode_count();

    let inode = fs.create(InodePtr::ROOT, "tmp").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();
    fs.write(fd, b"scratch data").unwrap();

    fs.unlink(InodePtr::ROOT, "tmp").unwrap();
    assert!(!fs.exists(InodePtr::ROOT, "tmp").unwrap());

    // 句柄仍然可用，存储也还没回收
    fs.seek(fd, 0, Whence::Abs).unwrap();
    let mut buf = [0u8; 7];
    assert_eq!((7, false), fs.read(fd, &mut buf).unwrap());
    assert_eq!(b"scratch", &buf);
    assert!(fs.stat(inode).is_ok());

    // 最后一次关闭触发清除
    fs.close(fd).unwrap();
    assert_eq!(free_before, fs.free_block_count());
    assert_eq!(inodes_before, fs.free_inode_count());
    assert!(matches!(fs.stat(inode), Err(Error::NotFound)));
}

#[test]
fn tombstones_are_reused_by_create() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    fs.create(InodePtr::ROOT, "a").unwrap();
    fs.create(InodePtr::ROOT, "b").unwrap();
    assert_eq!(32, fs.stat(InodePtr::ROOT).unwrap().size);

    // 删掉 a 留下墓碑，新建 c 复用它
    fs.unlink(InodePtr::ROOT, "a").unwrap();
    assert_eq!(32, fs.stat(InodePtr::ROOT).unwrap().size);
    fs.create(InodePtr::ROOT, "c").unwrap();
    assert_eq!(32, fs.stat(InodePtr::ROOT).unwrap().size);

    // 没有墓碑可用时才追加
    fs.create(InodePtr::ROOT, "d").unwrap();
    assert_eq!(48, fs.stat(InodePtr::ROOT).unwrap().size);

    let dir = fs.opendir(InodePtr::ROOT).unwrap();
    let mut names = Vec::new();
    while let Some(stat) = fs.readdir(dir).unwrap() {
        names.push(stat.name.unwrap());
    }
    fs.closedir(dir).unwrap();
    names.sort();
    assert_eq!(vec!["b", "c", "d"], names);
}

#[test]
fn rmdir_guards() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let d = fs.mkdir(InodePtr::ROOT, "d").unwrap();
    fs.create(d, "f").unwrap();

    assert_eq!(Err(Error::DirectoryNotEmpty), fs.rmdir(InodePtr::ROOT, "d"));
    assert_eq!(Err(Error::IsADirectory), fs.unlink(InodePtr::ROOT, "d"));

    fs.create(InodePtr::ROOT, "plain").unwrap();
    assert_eq!(Err(Error::NotADirectory), fs.rmdir(InodePtr::ROOT, "plain"));
    assert_eq!(Err(Error::NotFound), fs.rmdir(InodePtr::ROOT, "ghost"));

    fs.unlink(d, "f").unwrap();
    fs.rmdir(InodePtr::ROOT, "d").unwrap();
    assert!(!fs.exists(InodePtr::ROOT, "d").unwrap());
}

#[test]
fn names_are_capped_at_fourteen_bytes() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    assert_eq!(
        Err(Error::NameTooLong),
        fs.create(InodePtr::ROOT, "fifteen-chars!!").map(|_| ())
    );
    assert_eq!(
        Err(Error::NameTooLong),
        fs.mkdir(InodePtr::ROOT, "").map(|_| ())
    );

    fs.create(InodePtr::ROOT, "fourteen-chars").unwrap();
    assert!(fs.exists(InodePtr::ROOT, "fourteen-chars").unwrap());
    assert!(fs.lookup(InodePtr::ROOT, "fourteen-char").is_err());
}

#[test]
fn access_flags_gate_reads_and_writes() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "f").unwrap();

    let fd = fs.open(inode, OpenFlag::WRITE.into()).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(Err(Error::NotReadable), fs.read(fd, &mut buf));
    fs.close(fd).unwrap();

    let fd = fs.open(inode, OpenFlag::READ.into()).unwrap();
    assert_eq!(Err(Error::NotWritable), fs.write(fd, b"nope"));
    fs.close(fd).unwrap();
}

#[test]
fn handles_are_validated() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "f").unwrap();
    let fd = fs.open(inode, OpenFlag::READ.into()).unwrap();
    fs.close(fd).unwrap();

    let mut buf = [0u8; 1];
    assert_eq!(Err(Error::BadHandle), fs.close(fd));
    assert_eq!(Err(Error::BadHandle), fs.read(fd, &mut buf));
    assert_eq!(Err(Error::BadHandle), fs.tell(fd));
    // 文件句柄与目录句柄不同表
    assert_eq!(Err(Error::BadHandle), fs.readdir(fd).map(|_| ()));

    assert_eq!(
        Err(Error::IsADirectory),
        fs.open(InodePtr::ROOT, OpenFlag::READ.into()).map(|_| ())
    );
    assert_eq!(Err(Error::NotADirectory), fs.opendir(inode).map(|_| ()));
}

#[test]
fn executable_flag_round_trips() {
    let (_disk, _config, mut fs) = common::fresh(512, 256, 8);

    let inode = fs.create(InodePtr::ROOT, "tool").unwrap();
    assert!(!fs.stat(inode).unwrap().executable);

    fs.set_executable(inode, true).unwrap();
    assert!(fs.stat(inode).unwrap().executable);
    assert_eq!(StatKind::File, fs.stat(inode).unwrap().kind);

    fs.set_executable(inode, false).unwrap();
    assert!(!fs.stat(inode).unwrap().executable);
}

#[test]
fn max_file_size_is_enforced() {
    let (_disk, _config, mut fs) = common::fresh(128, 4096, 8);
    let max = fs.geometry().max_file_size();
    assert_eq!(266_240, max);

    let free_before = fs.free_block_count();
    let inode = fs.create(InodePtr::ROOT, "big").unwrap();
    let fd = fs.open(inode, OpenFlag::READ | OpenFlag::WRITE).unwrap();

    let data: Vec<u8> = (0..max).map(|i| (i * 31 % 251) as u8).collect();
    assert_eq!(max, fs.write(fd, &data).unwrap());
    assert_eq!(Err(Error::NoSpace), fs.write(fd, b"x"));
    assert_eq!(max as u32, fs.stat(inode).unwrap().size);

    // 抽查直接与间接两片区域
    for offset in [0usize, 4095, 4096, 100_000, max - 1] {
        fs.seek(fd, offset as i64, Whence::Abs).unwrap();
        let mut byte = [0u8; 1];
        assert_eq!((1, false), fs.read(fd, &mut byte).unwrap());
        assert_eq!(data[offset], byte[0], "mismatch at offset {offset}");
    }

    // 删除后块计数回到创建前
    fs.close(fd).unwrap();
    fs.unlink(InodePtr::ROOT, "big").unwrap();
    assert_eq!(free_before, fs.free_block_count());
}

#[test]
fn inode_table_can_run_dry() {
    // 8块*32字节 / 16 = 16条记录，根目录占掉1条
    let (_disk, _config, mut fs) = common::fresh(32, 64, 8);
    assert_eq!(15, fs.free_inode_count());

    for i in 0..15 {
        fs.create(InodePtr::ROOT, &format!("f{i}")).unwrap();
    }

    let free_blocks = fs.free_block_count();
    assert_eq!(
        Err(Error::NoFreeInodes),
        fs.create(InodePtr::ROOT, "overflow").map(|_| ())
    );
    // 失败的创建不泄漏块
    assert_eq!(free_blocks, fs.free_block_count());
}
