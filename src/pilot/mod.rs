use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{PilotSnapshot, UnitDescription};

// ==========================================
// 1. Pilot 运行状态 (PilotState)
// ==========================================

/// 远端代理自身的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PilotState {
    /// 尚在启动，暂不接收单元
    Pending,
    /// 正常接收单元
    Running,
    /// 已停止
    Stopped,
    /// 异常退出
    Failed,
}

// ==========================================
// 2. Pilot 代理接口 (PilotService)
// ==========================================

/// Pilot 代理接口
///
/// **职责**: 代表一个远端执行代理 (Pilot-Compute 或 Pilot-Data)。
/// 句柄归远端代理所有，CDS 只是引用；同一份契约同时服务计算侧
/// 与数据侧注册表 (两类代理的代理形态完全一致)。
///
/// # 实现约定
/// - `submit` 返回代理本地句柄；报错用 `anyhow::Error` 包装具体原因，
///   分发循环会做有界重试并把最终失败写入单元的 `last_error`。
/// - 核心不关心代理内部如何启动进程或搬运数据。
#[async_trait]
pub trait PilotService: Send + Sync + 'static {
    /// 代理全局唯一 ID (注册表按它去重)
    fn id(&self) -> &str;

    /// 代理可解析的 url
    fn url(&self) -> &str;

    /// 容量元数据 (槽位数等)，供 Scheduler 决策；可不提供
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// 亲和性标签，原样透传给 Scheduler
    fn affinity(&self) -> Option<String> {
        None
    }

    /// 生成供 Scheduler 与目录发布消费的只读快照
    fn snapshot(&self) -> PilotSnapshot {
        PilotSnapshot {
            id: self.id().to_string(),
            url: self.url().to_string(),
            capacity: self.capacity(),
            affinity: self.affinity(),
        }
    }

    /// 通过代理的原生提交接口投递一个单元描述
    ///
    /// 返回代理本地句柄，供之后的状态回查使用。
    async fn submit(&self, description: &UnitDescription) -> anyhow::Result<String>;

    /// 查询代理自身状态
    ///
    /// 分发循环在提交前用它确认代理仍然存活。
    async fn get_state(&self) -> anyhow::Result<PilotState>;
}
