pub mod random;
pub mod round_robin;

pub use random::RandomScheduler;
pub use round_robin::RoundRobinScheduler;

use crate::common::{PilotSnapshot, UnitDescription};

/// 放置策略接口 (The Decision)
///
/// 纯决策函数：给定单元描述与当前 Pilot 集合，返回被选中 Pilot 在
/// 切片里的下标；`None` 表示 "无合适 Pilot"。
///
/// # 契约
/// - `None` 是稳态而不是错误：分发循环会带退避重入队，直到放置
///   次数耗尽才把单元降级为 Failed。
/// - 核心对具体算法 (随机、亲和性、负载感知) 不做任何假设。
/// - 实现必须无副作用地容忍空集合。
pub trait Scheduler: Send + Sync + 'static {
    fn select(&self, unit: &UnitDescription, pilots: &[PilotSnapshot]) -> Option<usize>;
}
