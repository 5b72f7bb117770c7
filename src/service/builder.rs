use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::{new_cds_id, parse_cds_id, CdsConfig, CdsError, CdsSnapshot, Result};
use crate::coordination::{CoordinationBackend, MemoryCoordination};
use crate::scheduler::{RoundRobinScheduler, Scheduler};
use crate::service::core::{CdsShared, ComputeDataService};
use crate::service::dispatch::Dispatcher;

/// CDS 构建器
///
/// 负责组装协调后端、放置策略与分发循环。`build()` 铸造一个全新
/// 身份并注册到目录；`reattach()` 凭 url 恢复既有身份。
///
/// # 示例
/// ```ignore
/// let cds = CdsBuilder::new()
///     .application_id("bfast")
///     .build()
///     .await?;
/// ```
pub struct CdsBuilder {
    application_id: String,
    config: CdsConfig,
    coordination: Option<Arc<dyn CoordinationBackend>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    shutdown_token: Option<CancellationToken>,
}

impl Default for CdsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CdsBuilder {
    pub fn new() -> Self {
        Self {
            application_id: "default".to_string(),
            config: CdsConfig::default(),
            coordination: None,
            scheduler: None,
            shutdown_token: None,
        }
    }

    /// 应用 id，决定目录里的基础 url
    pub fn application_id(mut self, application_id: &str) -> Self {
        self.application_id = application_id.to_string();
        self
    }

    pub fn config(mut self, config: CdsConfig) -> Self {
        self.config = config;
        self
    }

    /// 协调后端；缺省用进程内内存目录
    pub fn coordination(mut self, backend: Arc<dyn CoordinationBackend>) -> Self {
        self.coordination = Some(backend);
        self
    }

    /// 放置策略
    ///
    /// 缺省时计算侧与数据侧各持一个独立的轮转实例，游标互不干扰。
    /// 显式传入的策略会被两侧共用，有内部游标的策略要自己考虑
    /// 混合流量下的交错。
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// 外部停机令牌；CDS 的取消会联动到它的子令牌
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// 铸造新身份并启动
    ///
    /// 在协调目录注册 `cds-<uuid>`，返回的服务立即可以接收提交。
    pub async fn build(self) -> Result<ComputeDataService> {
        let coordination = self.default_coordination();
        let id = new_cds_id();

        let base_url = coordination.get_base_url(&self.application_id).await?;
        let url = coordination
            .add_cds(&base_url, &CdsSnapshot::empty(&id))
            .await?;

        // 注册出的 url 必须能解析回同一个身份，否则重挂载会失败
        if parse_cds_id(&url)? != id {
            return Err(CdsError::MalformedUrl(url));
        }

        info!("[Cds-{}] Registered at {}", id, url);
        Ok(self.finish(id, url, coordination))
    }

    /// 凭 url 重挂载到既有 CDS 身份
    ///
    /// 不重新注册；目录条目若仍在，下一次快照发布会覆盖它。
    pub async fn reattach(self, cds_url: &str) -> Result<ComputeDataService> {
        let coordination = self.default_coordination();
        let id = parse_cds_id(cds_url)?;

        // 诊断性读取；极简后端不支持读也不影响重挂载
        match coordination.get_cds(cds_url).await {
            Ok(Some(snapshot)) => {
                debug!(
                    "[Cds-{}] Found existing directory entry ({} CUs, {} DUs)",
                    id,
                    snapshot.compute_units.len(),
                    snapshot.data_units.len()
                );
            }
            Ok(None) => {
                debug!("[Cds-{}] No directory entry at {}, starting fresh", id, cds_url);
            }
            Err(CdsError::Unsupported(_)) => {
                debug!("[Cds-{}] Backend does not support directory reads", id);
            }
            Err(e) => return Err(e),
        }

        info!("[Cds-{}] Reattached at {}", id, cds_url);
        Ok(self.finish(id, cds_url.to_string(), coordination))
    }

    fn default_coordination(&self) -> Arc<dyn CoordinationBackend> {
        match &self.coordination {
            Some(backend) => Arc::clone(backend),
            None => Arc::new(MemoryCoordination::new(&self.config.namespace)),
        }
    }

    fn finish(
        self,
        id: String,
        url: String,
        coordination: Arc<dyn CoordinationBackend>,
    ) -> ComputeDataService {
        let stop = match self.shutdown_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let (scheduler_compute, scheduler_data): (Arc<dyn Scheduler>, Arc<dyn Scheduler>) =
            match self.scheduler {
                Some(shared) => (Arc::clone(&shared), shared),
                None => (
                    Arc::new(RoundRobinScheduler::new()),
                    Arc::new(RoundRobinScheduler::new()),
                ),
            };
        let shared = Arc::new(CdsShared::new(
            id,
            url,
            Arc::new(self.config),
            coordination,
            scheduler_compute,
            scheduler_data,
            stop,
        ));
        let worker = Dispatcher::spawn(Arc::clone(&shared));
        ComputeDataService::new(shared, worker)
    }
}
