//! std 侧的配套设施。

use std::time::{SystemTime, UNIX_EPOCH};

use tiny_fs::Clock;

/// 以 UNIX 纪元为基准的墙钟
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the UNIX epoch")
            .as_secs() as u32
    }
}
