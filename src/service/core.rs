use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::{
    CdsConfig, CdsError, CdsSnapshot, ComputeUnit, DataUnit, PilotSnapshot, Result, ServiceState,
    TimeUtils, Unit, UnitDescription, UnitKind,
};
use crate::coordination::CoordinationBackend;
use crate::pilot::PilotService;
use crate::scheduler::Scheduler;
use crate::service::queue::IntakeQueue;

// ==========================================
// 1. 内部共享状态 (CdsShared)
// ==========================================

/// CDS 内部共享状态
///
/// 服务句柄与分发循环各持一个 Arc；循环不持有服务句柄本身，
/// 取消令牌是两者之间唯一的停机信号。
pub(crate) struct CdsShared {
    /// CDS 身份 ("cds-<uuid>")
    pub(crate) id: String,
    /// 协调目录中的可解析 url
    pub(crate) url: String,
    pub(crate) config: Arc<CdsConfig>,

    /// 单元表 (id -> 活句柄)
    pub(crate) compute_units: DashMap<String, Unit>,
    pub(crate) data_units: DashMap<String, Unit>,

    /// Pilot 注册表 (保持注册顺序，轮转调度依赖它)
    pub(crate) pilot_compute: RwLock<Vec<Arc<dyn PilotService>>>,
    pub(crate) pilot_data: RwLock<Vec<Arc<dyn PilotService>>>,

    /// 进料队列，计算/数据各一条
    pub(crate) cu_queue: Arc<IntakeQueue<Unit>>,
    pub(crate) du_queue: Arc<IntakeQueue<Unit>>,

    pub(crate) coordination: Arc<dyn CoordinationBackend>,
    /// 放置策略，计算/数据各一份；缺省时两份是独立实例，
    /// 轮转游标互不干扰
    pub(crate) scheduler_compute: Arc<dyn Scheduler>,
    pub(crate) scheduler_data: Arc<dyn Scheduler>,

    /// 停机信号 (cancel / shutdown 触发)
    pub(crate) stop: CancellationToken,
    canceled: AtomicBool,
}

impl CdsShared {
    pub(crate) fn new(
        id: String,
        url: String,
        config: Arc<CdsConfig>,
        coordination: Arc<dyn CoordinationBackend>,
        scheduler_compute: Arc<dyn Scheduler>,
        scheduler_data: Arc<dyn Scheduler>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            id,
            url,
            config,
            compute_units: DashMap::new(),
            data_units: DashMap::new(),
            pilot_compute: RwLock::new(Vec::new()),
            pilot_data: RwLock::new(Vec::new()),
            cu_queue: Arc::new(IntakeQueue::new()),
            du_queue: Arc::new(IntakeQueue::new()),
            coordination,
            scheduler_compute,
            scheduler_data,
            stop,
            canceled: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// 标记已取消；返回 false 表示之前已经标记过 (幂等)
    fn mark_canceled(&self) -> bool {
        !self.canceled.swap(true, Ordering::SeqCst)
    }

    /// 对应种类的单元表
    pub(crate) fn units_for(&self, kind: UnitKind) -> &DashMap<String, Unit> {
        match kind {
            UnitKind::Compute => &self.compute_units,
            UnitKind::Data => &self.data_units,
        }
    }

    /// 对应种类的进料队列
    pub(crate) fn queue_for(&self, kind: UnitKind) -> &Arc<IntakeQueue<Unit>> {
        match kind {
            UnitKind::Compute => &self.cu_queue,
            UnitKind::Data => &self.du_queue,
        }
    }

    /// 对应种类的 Pilot 注册表
    pub(crate) fn pilots_for(&self, kind: UnitKind) -> &RwLock<Vec<Arc<dyn PilotService>>> {
        match kind {
            UnitKind::Compute => &self.pilot_compute,
            UnitKind::Data => &self.pilot_data,
        }
    }

    /// 对应种类的放置策略
    pub(crate) fn scheduler_for(&self, kind: UnitKind) -> &Arc<dyn Scheduler> {
        match kind {
            UnitKind::Compute => &self.scheduler_compute,
            UnitKind::Data => &self.scheduler_data,
        }
    }

    /// 生成当前全量快照
    pub(crate) fn snapshot(&self) -> CdsSnapshot {
        let collect_units = |map: &DashMap<String, Unit>| {
            let mut units: Vec<_> = map.iter().map(|e| e.value().snapshot()).collect();
            units.sort_by(|a, b| a.id.cmp(&b.id));
            units
        };
        let collect_pilots = |reg: &RwLock<Vec<Arc<dyn PilotService>>>| {
            reg.read().iter().map(|p| p.snapshot()).collect()
        };
        CdsSnapshot {
            id: self.id.clone(),
            updated_at: TimeUtils::now_utc(),
            compute_units: collect_units(&self.compute_units),
            data_units: collect_units(&self.data_units),
            pilot_compute: collect_pilots(&self.pilot_compute),
            pilot_data: collect_pilots(&self.pilot_data),
        }
    }

    /// 向协调目录发布快照
    ///
    /// 目录是软状态：写失败只记日志，绝不向应用上抛。
    pub(crate) async fn publish_directory(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.coordination.update_cds(&self.url, &snapshot).await {
            warn!("[Cds-{}] Failed to publish directory snapshot: {}", self.id, e);
        }
    }
}

// ==========================================
// 2. 服务句柄 (ComputeDataService)
// ==========================================

/// 计算数据服务 (CDS)
///
/// 去中心化元编排器：应用提交计算/数据单元，CDS 通过可插拔的
/// Scheduler 把它们放置到已注册的 Pilot 上并驱动到终态。
///
/// 句柄即所有权：句柄被丢弃时服务自动 `cancel()`。
pub struct ComputeDataService {
    shared: Arc<CdsShared>,
    /// 分发循环的任务句柄 (shutdown 时回收)
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ComputeDataService {
    pub(crate) fn new(shared: Arc<CdsShared>, worker: JoinHandle<()>) -> Self {
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// CDS 身份 ("cds-<uuid>")
    pub fn get_id(&self) -> &str {
        &self.shared.id
    }

    /// 协调目录中的可解析 url (重挂载用)
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn get_state(&self) -> ServiceState {
        if self.shared.is_canceled() {
            ServiceState::Canceled
        } else {
            ServiceState::Running
        }
    }

    // ---------- 单元提交 ----------

    async fn submit_unit(&self, kind: UnitKind, description: UnitDescription) -> Result<Unit> {
        if self.shared.is_canceled() {
            return Err(CdsError::ServiceCanceled(self.shared.id.clone()));
        }
        if description.is_empty() {
            return Err(CdsError::InvalidDescription(
                "unit description must not be empty".into(),
            ));
        }

        let unit = Unit::new(kind, self.shared.id.clone(), description);
        debug!("[Cds-{}] Accepted unit: {}", self.shared.id, unit.id());

        self.shared
            .units_for(kind)
            .insert(unit.id().to_string(), unit.clone());
        // cancel 可能落在首次检查与登记之间；复查后再入队，
        // 避免留下一个分发循环永远不会取走的条目
        if self.shared.is_canceled() {
            self.shared.units_for(kind).remove(unit.id());
            return Err(CdsError::ServiceCanceled(self.shared.id.clone()));
        }
        self.shared.queue_for(kind).push(unit.clone());
        self.shared.publish_directory().await;
        Ok(unit)
    }

    /// 提交一个计算单元，立即返回可轮询的句柄
    pub async fn submit_compute_unit(&self, description: UnitDescription) -> Result<ComputeUnit> {
        Ok(ComputeUnit(
            self.submit_unit(UnitKind::Compute, description).await?,
        ))
    }

    /// 提交一个数据单元，走与计算单元对称的放置路径
    pub async fn submit_data_unit(&self, description: UnitDescription) -> Result<DataUnit> {
        Ok(DataUnit(self.submit_unit(UnitKind::Data, description).await?))
    }

    // ---------- 单元查询 ----------

    pub fn list_compute_units(&self) -> Vec<ComputeUnit> {
        self.shared
            .compute_units
            .iter()
            .map(|e| ComputeUnit(e.value().clone()))
            .collect()
    }

    pub fn list_data_units(&self) -> Vec<DataUnit> {
        self.shared
            .data_units
            .iter()
            .map(|e| DataUnit(e.value().clone()))
            .collect()
    }

    pub fn get_compute_unit(&self, unit_id: &str) -> Result<ComputeUnit> {
        self.shared
            .compute_units
            .get(unit_id)
            .map(|e| ComputeUnit(e.value().clone()))
            .ok_or_else(|| CdsError::UnitNotFound(unit_id.to_string()))
    }

    pub fn get_data_unit(&self, unit_id: &str) -> Result<DataUnit> {
        self.shared
            .data_units
            .get(unit_id)
            .map(|e| DataUnit(e.value().clone()))
            .ok_or_else(|| CdsError::UnitNotFound(unit_id.to_string()))
    }

    // ---------- Pilot 注册表 ----------

    async fn add_pilot(&self, kind: UnitKind, pilot: Arc<dyn PilotService>) {
        {
            let mut registry = self.shared.pilots_for(kind).write();
            // 同 id 重复注册是幂等的
            if registry.iter().any(|p| p.id() == pilot.id()) {
                debug!(
                    "[Cds-{}] Pilot already registered, ignored: {}",
                    self.shared.id,
                    pilot.id()
                );
                return;
            }
            debug!("[Cds-{}] Pilot registered: {}", self.shared.id, pilot.id());
            registry.push(pilot);
        }
        self.shared.publish_directory().await;
    }

    async fn remove_pilot(&self, kind: UnitKind, pilot_id: &str) {
        let removed = {
            let mut registry = self.shared.pilots_for(kind).write();
            let before = registry.len();
            registry.retain(|p| p.id() != pilot_id);
            before != registry.len()
        };
        if removed {
            debug!("[Cds-{}] Pilot removed: {}", self.shared.id, pilot_id);
            self.shared.publish_directory().await;
        }
    }

    /// 注册一个 Pilot-Compute；同 id 重复注册被忽略
    pub async fn add_pilot_compute_service(&self, pilot: Arc<dyn PilotService>) {
        self.add_pilot(UnitKind::Compute, pilot).await;
    }

    /// 按 id 摘除一个 Pilot-Compute；不影响已放置的单元
    pub async fn remove_pilot_compute_service(&self, pilot_id: &str) {
        self.remove_pilot(UnitKind::Compute, pilot_id).await;
    }

    /// 注册一个 Pilot-Data；同 id 重复注册被忽略
    pub async fn add_pilot_data_service(&self, pilot: Arc<dyn PilotService>) {
        self.add_pilot(UnitKind::Data, pilot).await;
    }

    /// 按 id 摘除一个 Pilot-Data
    pub async fn remove_pilot_data_service(&self, pilot_id: &str) {
        self.remove_pilot(UnitKind::Data, pilot_id).await;
    }

    pub fn list_pilot_compute(&self) -> Vec<PilotSnapshot> {
        self.shared
            .pilot_compute
            .read()
            .iter()
            .map(|p| p.snapshot())
            .collect()
    }

    pub fn list_pilot_data(&self) -> Vec<PilotSnapshot> {
        self.shared
            .pilot_data
            .read()
            .iter()
            .map(|p| p.snapshot())
            .collect()
    }

    // ---------- 生命周期 ----------

    /// 阻塞直到所有已提交单元到达终态
    ///
    /// 排空顺序沿袭数据先于计算的约定：先等两条队列排空，再等全部
    /// DU 终态，最后等全部 CU 终态。等待期间收到 Ctrl-C 时取消服务
    /// 并返回 `InterruptedWait`。
    pub async fn wait(&self) -> Result<()> {
        tokio::select! {
            _ = self.drain() => Ok(()),
            r = tokio::signal::ctrl_c() => {
                if let Err(e) = r {
                    warn!("[Cds-{}] Failed to listen for interrupt: {}", self.shared.id, e);
                }
                self.cancel();
                Err(CdsError::InterruptedWait)
            }
        }
    }

    async fn drain(&self) {
        loop {
            self.shared.cu_queue.join().await;
            self.shared.du_queue.join().await;

            // 退避重试的单元已在完成计数里占位，队列排空即全部出队;
            // 还要等它们真正到达终态
            let dus: Vec<Unit> = self
                .shared
                .data_units
                .iter()
                .map(|e| e.value().clone())
                .collect();
            for du in &dus {
                du.wait().await;
            }
            let cus: Vec<Unit> = self
                .shared
                .compute_units
                .iter()
                .map(|e| e.value().clone())
                .collect();
            for cu in &cus {
                cu.wait().await;
            }

            // 等待期间可能有新提交，复查后才能返回
            if self.shared.cu_queue.is_drained()
                && self.shared.du_queue.is_drained()
                && self.all_terminal()
            {
                return;
            }
        }
    }

    fn all_terminal(&self) -> bool {
        self.shared
            .compute_units
            .iter()
            .chain(self.shared.data_units.iter())
            .all(|e| e.value().state().is_terminal())
    }

    /// 取消服务 (幂等)
    ///
    /// 停掉分发循环、异步删除目录条目。后续提交返回 `ServiceCanceled`。
    /// 在途单元保持原状：取消的是服务，不是单元；需要取消单元时
    /// 调用方自己持有句柄 (`Unit::cancel`)。
    pub fn cancel(&self) {
        if !self.shared.mark_canceled() {
            return;
        }
        debug!("[Cds-{}] Canceling service", self.shared.id);
        self.shared.stop.cancel();

        // 目录清理尽力而为；没有运行时上下文时跳过 (Drop 路径)
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            handle.spawn(async move {
                if let Err(e) = shared.coordination.delete_cds(&shared.url).await {
                    warn!("[Cds-{}] Failed to delete directory entry: {}", shared.id, e);
                }
            });
        }
    }

    /// 取消并回收分发循环
    pub async fn shutdown(self) {
        self.cancel();
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!("[Cds-{}] Dispatch worker ended abnormally: {}", self.shared.id, e);
            }
        }
    }
}

impl Drop for ComputeDataService {
    fn drop(&mut self) {
        self.cancel();
    }
}
