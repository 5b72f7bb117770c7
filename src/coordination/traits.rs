use async_trait::async_trait;

use crate::common::error::{CdsError, Result};
use crate::common::CdsSnapshot;

/// 协调目录接口 (Coordination Backend)
///
/// **职责**: 持久目录，用于 (a) 注册/恢复 CDS 身份，(b) 发布软状态的
/// Pilot 目录，(c) 让另一个进程凭 url 重挂载到同一个 CDS。
/// **特点**:
/// - 写路径是 fire-and-forget: 调用方记日志，不向应用上抛。
/// - 无事务保证；两个进程并发写同一条目时以后写者为准，这是被
///   接受并记录在案的弱点，不在本层解决。
#[async_trait]
pub trait CoordinationBackend: Send + Sync + 'static {
    /// 取应用级基础 url，CDS 条目挂在它下面
    async fn get_base_url(&self, application_id: &str) -> Result<String>;

    /// 注册一个新 CDS，返回其可解析 url
    ///
    /// url 必须把 `cds-<uuid>` 身份作为路径段嵌入，重挂载靠解析它恢复。
    async fn add_cds(&self, base_url: &str, snapshot: &CdsSnapshot) -> Result<String>;

    /// 覆盖发布 CDS 全量快照 (last-writer-wins)
    async fn update_cds(&self, cds_url: &str, snapshot: &CdsSnapshot) -> Result<()>;

    /// 删除 CDS 条目；条目不存在也算成功 (幂等)
    async fn delete_cds(&self, cds_url: &str) -> Result<()>;

    /// 读取快照 (重挂载时的诊断辅助)
    ///
    /// 可选操作；极简后端可以不实现，默认显式报 `Unsupported`。
    async fn get_cds(&self, cds_url: &str) -> Result<Option<CdsSnapshot>> {
        let _ = cds_url;
        Err(CdsError::Unsupported("get_cds"))
    }
}
