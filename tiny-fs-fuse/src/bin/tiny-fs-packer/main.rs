mod cli;

use std::fs;
use std::io;
use std::sync::Arc;

use block_dev::{BlockDevice, MemDisk};
use clap::Parser;
use cli::Cli;
use log::{info, warn};
use tiny_fs::{format, Clock, FileSystem, InodePtr, OpenFlag};
use tiny_fs_fuse::SystemClock;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let disk = Arc::new(MemDisk::new(cli.block_size, cli.blocks));
    let device: Arc<dyn BlockDevice> = disk.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let config = format(&device, &SystemClock, cli.inode_blocks).expect("formatting failed");
    let mut tfs = FileSystem::init(device, clock, &config).expect("init failed");

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_str().expect("source file name is not UTF-8");
        let data = fs::read(entry.path())?;

        let inode = match tfs.create(InodePtr::ROOT, name) {
            Ok(inode) => inode,
            Err(e) => {
                warn!("skipping {name:?}: {e:?}");
                continue;
            }
        };
        let fd = tfs.open(inode, OpenFlag::WRITE.into()).expect("open failed");
        tfs.write(fd, &data).expect("write failed");
        tfs.close(fd).expect("close failed");
        info!("packed {name:?}: {} bytes", data.len());
    }

    let dir = tfs.opendir(InodePtr::ROOT).expect("opendir failed");
    while let Some(stat) = tfs.readdir(dir).expect("readdir failed") {
        println!(
            "{:>5}  {:>8}  {}",
            stat.inode.index(),
            stat.size,
            stat.name.as_deref().unwrap_or("<none>")
        );
    }
    tfs.closedir(dir).expect("closedir failed");

    info!(
        "{} free blocks, {} free inodes",
        tfs.free_block_count(),
        tfs.free_inode_count()
    );
    drop(tfs);

    fs::create_dir_all(&cli.out_dir)?;
    fs::write(cli.out_dir.join("fs.img"), disk.dump())?;
    fs::write(cli.out_dir.join("fs.cfg"), config)?;

    Ok(())
}
