use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// 全局统一的时间工具
pub struct TimeUtils;

impl TimeUtils {
    /// [标准] 获取当前 Unix 时间戳 (秒, 双精度)
    /// 全系统统一使用这个方法获取“现在”，方便未来 Mock 或做时钟偏移
    pub fn now_f64() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_secs_f64()
    }

    /// 现实时钟，用于目录快照里的可读时间戳
    pub fn now_utc() -> DateTime<Utc> {
        Utc::now()
    }
}
