use rand::Rng;

use crate::common::{PilotSnapshot, UnitDescription};
use crate::scheduler::Scheduler;

/// 随机放置策略
///
/// 每次在当前 Pilot 集合里均匀随机选一个。
#[derive(Debug, Default)]
pub struct RandomScheduler;

impl RandomScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for RandomScheduler {
    fn select(&self, _unit: &UnitDescription, pilots: &[PilotSnapshot]) -> Option<usize> {
        if pilots.is_empty() {
            return None;
        }
        let mut rng = rand::rng();
        Some(rng.random_range(0..pilots.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_stays_in_range() {
        let s = RandomScheduler::new();
        let pilots: Vec<PilotSnapshot> = (0..5)
            .map(|i| PilotSnapshot {
                id: format!("p{i}"),
                url: format!("mock://p{i}"),
                capacity: Some(8),
                affinity: None,
            })
            .collect();
        let desc = UnitDescription::new().set("executable", "/bin/true");

        for _ in 0..100 {
            let idx = s.select(&desc, &pilots).unwrap();
            assert!(idx < pilots.len());
        }
        assert_eq!(s.select(&desc, &[]), None);
    }
}
