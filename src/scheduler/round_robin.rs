use std::sync::atomic::{AtomicUsize, Ordering};

use crate::common::{PilotSnapshot, UnitDescription};
use crate::scheduler::Scheduler;

/// 轮转放置策略
///
/// 原子游标依次指向下一个 Pilot，N 个单元在 K 个 Pilot 之间的
/// 分布不超过 ⌈N/K⌉。游标只在集合非空时前进。
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    cursor: AtomicUsize,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobinScheduler {
    fn select(&self, _unit: &UnitDescription, pilots: &[PilotSnapshot]) -> Option<usize> {
        if pilots.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(n % pilots.len())
    }
}
