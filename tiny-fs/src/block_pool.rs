//! # 暂存块缓冲池
//!
//! 引擎的每一次块级读写都要借出一个块大小的缓冲区；
//! 池子按块大小收纳用过的缓冲区，避免每次操作都重新分配。
//! 归还由守卫的 Drop 负责，提前返回与 panic 都不会漏还。

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use spin::Mutex;

/// 每种块大小收纳缓冲区的上限
const CAPACITY: usize = 16;

static POOL: Mutex<Vec<(usize, Vec<Box<[u8]>>)>> = Mutex::new(Vec::new());

/// 借出一个全零的块缓冲
pub fn take(block_size: usize) -> PoolBuf {
    let buf = POOL
        .lock()
        .iter_mut()
        .find_map(|(size, bufs)| (*size == block_size).then(|| bufs.pop()))
        .flatten()
        .map(|mut buf| {
            buf.fill(0);
            buf
        })
        .unwrap_or_else(|| vec![0; block_size].into());

    PoolBuf { buf: Some(buf) }
}

/// 池缓冲的持有凭证，析构时自动归还
pub struct PoolBuf {
    buf: Option<Box<[u8]>>,
}

impl Deref for PoolBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.buf.as_ref().unwrap()
    }
}

impl DerefMut for PoolBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().unwrap()
    }
}

impl Drop for PoolBuf {
    fn drop(&mut self) {
        let buf = self.buf.take().unwrap();
        let mut pool = POOL.lock();

        match pool.iter_mut().find(|(size, _)| *size == buf.len()) {
            // 池满就任其析构
            Some((_, bufs)) if bufs.len() < CAPACITY => bufs.push(buf),
            Some(_) => {}
            None => pool.push((buf.len(), vec![buf])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_recycled_and_zeroed() {
        {
            let mut buf = take(96);
            buf.fill(0xEE);
        }

        let buf = take(96);
        assert_eq!(96, buf.len());
        assert!(buf.iter().all(|&b| b == 0));
    }
}
