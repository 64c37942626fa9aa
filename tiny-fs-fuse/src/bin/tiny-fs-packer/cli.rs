use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Source directory packed into the image root
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output directory for fs.img and fs.cfg
    #[arg(long, short = 'O')]
    pub out_dir: PathBuf,

    /// Block size in bytes (power of two)
    #[arg(long, default_value_t = 512)]
    pub block_size: usize,

    /// Device size in blocks
    #[arg(long, default_value_t = 4096)]
    pub blocks: usize,

    /// Inode region size in blocks (multiple of 8)
    #[arg(long, default_value_t = 8)]
    pub inode_blocks: usize,
}
