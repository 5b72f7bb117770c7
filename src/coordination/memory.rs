use async_trait::async_trait;
use dashmap::DashMap;

use crate::common::error::Result;
use crate::common::{CdsSnapshot, TimeUtils};
use crate::coordination::traits::CoordinationBackend;

/// 内存协调目录 (In-Memory Coordination)
///
/// 进程内的目录实现：单进程部署与测试都用它，编排逻辑因此可以在
/// 没有任何网络后端的情况下被完整验证。
#[derive(Debug)]
pub struct MemoryCoordination {
    /// 命名空间，仅参与 url 构造
    namespace: String,
    /// url -> 最近一次发布的快照 (last-writer-wins)
    entries: DashMap<String, CdsSnapshot>,
}

impl MemoryCoordination {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            entries: DashMap::new(),
        }
    }

    /// 当前条目数量 (测试辅助)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CoordinationBackend for MemoryCoordination {
    async fn get_base_url(&self, application_id: &str) -> Result<String> {
        Ok(format!("mem://{}/{}", self.namespace, application_id))
    }

    async fn add_cds(&self, base_url: &str, snapshot: &CdsSnapshot) -> Result<String> {
        let url = format!("{}/{}", base_url, snapshot.id);
        self.entries.insert(url.clone(), snapshot.clone());
        Ok(url)
    }

    async fn update_cds(&self, cds_url: &str, snapshot: &CdsSnapshot) -> Result<()> {
        // 覆盖写，后写者为准
        self.entries.insert(cds_url.to_string(), snapshot.clone());
        Ok(())
    }

    async fn delete_cds(&self, cds_url: &str) -> Result<()> {
        self.entries.remove(cds_url);
        Ok(())
    }

    async fn get_cds(&self, cds_url: &str) -> Result<Option<CdsSnapshot>> {
        Ok(self.entries.get(cds_url).map(|e| e.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str) -> CdsSnapshot {
        CdsSnapshot::empty(id)
    }

    #[tokio::test]
    async fn register_publish_delete_roundtrip() {
        let backend = MemoryCoordination::new("talaria");
        let base = backend.get_base_url("app-1").await.unwrap();
        assert_eq!(base, "mem://talaria/app-1");

        let url = backend.add_cds(&base, &snap("cds-abc")).await.unwrap();
        assert_eq!(url, "mem://talaria/app-1/cds-abc");
        assert!(backend.get_cds(&url).await.unwrap().is_some());

        // 覆盖发布
        let mut updated = snap("cds-abc");
        updated.updated_at = TimeUtils::now_utc();
        backend.update_cds(&url, &updated).await.unwrap();
        assert_eq!(backend.len(), 1);

        // 删除幂等
        backend.delete_cds(&url).await.unwrap();
        backend.delete_cds(&url).await.unwrap();
        assert!(backend.get_cds(&url).await.unwrap().is_none());
    }
}
