use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::common::{new_unit_id, TimeUtils};

// ==========================================
// 1. 单元状态 (UnitState)
// ==========================================

/// 单元生命周期状态
///
/// 偏序: New ≺ Scheduled ≺ Running ≺ {Done, Failed, Canceled}。
/// 只允许沿偏序向前流转；Canceled 可以从任意非终态到达。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    /// 新建
    /// - 单元已提交并入队，尚未被分发循环取走。
    New,

    /// 已调度
    /// - Scheduler 已为其选中一个 Pilot，提交正在进行。
    Scheduled,

    /// 运行中
    /// - Pilot 的原生提交接口已确认接收，返回了本地句柄。
    Running,

    /// 已完成 (终态)
    Done,

    /// 已失败 (终态)
    /// - 放置重试耗尽、提交重试耗尽，或分发过程中出现不可恢复错误。
    Failed,

    /// 已取消 (终态)
    /// - 协作式取消；从任意非终态可达。
    Canceled,
}

impl UnitState {
    /// 状态是否是终态（不可流转）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Done | UnitState::Failed | UnitState::Canceled
        )
    }

    /// 偏序中的位次，用于禁止倒退
    fn rank(&self) -> u8 {
        match self {
            UnitState::New => 0,
            UnitState::Scheduled => 1,
            UnitState::Running => 2,
            UnitState::Done | UnitState::Failed | UnitState::Canceled => 3,
        }
    }
}

/// CDS 服务自身的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Running,
    Canceled,
}

// ==========================================
// 2. 单元种类与描述 (UnitKind / UnitDescription)
// ==========================================

/// 单元种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    /// 计算单元 (CU)，投递给 Pilot-Compute
    Compute,
    /// 数据单元 (DU)，投递给 Pilot-Data
    Data,
}

impl UnitKind {
    /// 单元 ID 前缀
    pub(crate) fn prefix(&self) -> &'static str {
        match self {
            UnitKind::Compute => "cu",
            UnitKind::Data => "du",
        }
    }
}

/// 单元描述：不透明的属性映射
///
/// 核心只校验非空，内部结构 (executable / 资源需求 / 亲和性提示)
/// 原样透传给 Scheduler 和被选中的 Pilot。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitDescription(serde_json::Map<String, serde_json::Value>);

impl UnitDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式写入一个属性
    pub fn set(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 常用属性的快捷读取
    pub fn executable(&self) -> Option<&str> {
        self.get("executable").and_then(|v| v.as_str())
    }

    pub fn affinity(&self) -> Option<&str> {
        self.get("affinity").and_then(|v| v.as_str())
    }
}

// ==========================================
// 3. 单元句柄 (Unit / ComputeUnit / DataUnit)
// ==========================================

/// 单元内部共享状态
///
/// 对归属 CDS 的引用是非拥有的 (只存 id)，绝不形成所有权环。
#[derive(Debug)]
struct UnitInner {
    id: String,
    kind: UnitKind,
    cds_id: String,
    description: UnitDescription,
    created_at: f64,

    state: Mutex<UnitState>,
    last_error: Mutex<Option<String>>,
    /// 被选中的 Pilot 与其返回的本地句柄 (仅分发循环写入)
    pilot_id: Mutex<Option<String>>,
    local_handle: Mutex<Option<String>>,
    updated_at: Mutex<f64>,

    placement_attempts: AtomicU32,
    submit_attempts: AtomicU32,

    /// 状态变更通知，唤醒 wait() 等待者
    changed: Notify,
}

/// 单元句柄
///
/// 提交后返回给应用，同时注册在 CDS 的单元表里。克隆是廉价的 (内部 Arc)。
/// 状态只能沿偏序向前推进，推进逻辑封装在句柄内部。
#[derive(Debug, Clone)]
pub struct Unit {
    inner: Arc<UnitInner>,
}

impl Unit {
    pub(crate) fn new(kind: UnitKind, cds_id: String, description: UnitDescription) -> Self {
        let now = TimeUtils::now_f64();
        Self {
            inner: Arc::new(UnitInner {
                id: new_unit_id(kind),
                kind,
                cds_id,
                description,
                created_at: now,
                state: Mutex::new(UnitState::New),
                last_error: Mutex::new(None),
                pilot_id: Mutex::new(None),
                local_handle: Mutex::new(None),
                updated_at: Mutex::new(now),
                placement_attempts: AtomicU32::new(0),
                submit_attempts: AtomicU32::new(0),
                changed: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> UnitKind {
        self.inner.kind
    }

    /// 归属 CDS 的 id (非拥有的反向引用)
    pub fn cds_id(&self) -> &str {
        &self.inner.cds_id
    }

    pub fn description(&self) -> &UnitDescription {
        &self.inner.description
    }

    pub fn state(&self) -> UnitState {
        *self.inner.state.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// 被选中的 Pilot id (放置完成前为 None)
    pub fn pilot_id(&self) -> Option<String> {
        self.inner.pilot_id.lock().clone()
    }

    /// Pilot 返回的本地句柄
    pub fn local_handle(&self) -> Option<String> {
        self.inner.local_handle.lock().clone()
    }

    pub fn placement_attempts(&self) -> u32 {
        self.inner.placement_attempts.load(Ordering::Relaxed)
    }

    pub fn submit_attempts(&self) -> u32 {
        self.inner.submit_attempts.load(Ordering::Relaxed)
    }

    /// [核心] 沿偏序推进状态
    ///
    /// 终态之后不再流转；目标位次不高于当前位次的请求被拒绝。
    /// 返回是否发生了变更。
    pub(crate) fn advance(&self, to: UnitState) -> bool {
        {
            let mut cur = self.inner.state.lock();
            if cur.is_terminal() || to.rank() <= cur.rank() {
                return false;
            }
            *cur = to;
        }
        *self.inner.updated_at.lock() = TimeUtils::now_f64();
        self.inner.changed.notify_waiters();
        true
    }

    /// 接收 Pilot 回传的状态报告 (例如 Running -> Done)
    ///
    /// 与内部流转走同一条只进不退的路径。
    pub fn report_state(&self, to: UnitState) -> bool {
        self.advance(to)
    }

    /// 协作式取消本单元
    ///
    /// 从任意非终态可达；对终态单元无效果。返回是否真的取消了。
    pub fn cancel(&self) -> bool {
        self.advance(UnitState::Canceled)
    }

    /// 降级为 Failed，并把原因写入 last_error
    pub(crate) fn fail(&self, reason: String) {
        *self.inner.last_error.lock() = Some(reason);
        self.advance(UnitState::Failed);
    }

    pub(crate) fn set_last_error(&self, reason: String) {
        *self.inner.last_error.lock() = Some(reason);
    }

    pub(crate) fn clear_last_error(&self) {
        *self.inner.last_error.lock() = None;
    }

    /// 记录放置结果 (仅分发循环调用)
    pub(crate) fn assign_pilot(&self, pilot_id: String, local_handle: String) {
        *self.inner.pilot_id.lock() = Some(pilot_id);
        *self.inner.local_handle.lock() = Some(local_handle);
    }

    /// 放置失败计数 +1，返回新值
    pub(crate) fn note_placement_attempt(&self) -> u32 {
        self.inner.placement_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 提交尝试计数 +1，返回新值
    pub(crate) fn note_submit_attempt(&self) -> u32 {
        self.inner.submit_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 阻塞直到单元到达终态，返回终态
    ///
    /// 这是编排层批量 `wait()` 赖以组合的原语。
    pub async fn wait(&self) -> UnitState {
        loop {
            let s = self.state();
            if s.is_terminal() {
                return s;
            }
            // 先注册再复查，关闭 "变更发生在注册之前" 的窗口
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let s = self.state();
            if s.is_terminal() {
                return s;
            }
            notified.await;
        }
    }

    /// 生成目录快照条目
    pub(crate) fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            id: self.inner.id.clone(),
            kind: self.inner.kind,
            state: self.state(),
            pilot_id: self.pilot_id(),
            last_error: self.last_error(),
            created_at: self.inner.created_at,
            updated_at: *self.inner.updated_at.lock(),
        }
    }
}

/// 计算单元句柄 (CU)
#[derive(Debug, Clone)]
pub struct ComputeUnit(pub(crate) Unit);

impl Deref for ComputeUnit {
    type Target = Unit;

    fn deref(&self) -> &Unit {
        &self.0
    }
}

/// 数据单元句柄 (DU)
#[derive(Debug, Clone)]
pub struct DataUnit(pub(crate) Unit);

impl Deref for DataUnit {
    type Target = Unit;

    fn deref(&self) -> &Unit {
        &self.0
    }
}

// ==========================================
// 4. 目录快照 (CdsSnapshot)
// ==========================================

/// Pilot 只读元数据快照
///
/// 注册表从活句柄生成，供 Scheduler 决策与目录发布使用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotSnapshot {
    pub id: String,
    pub url: String,
    /// 容量元数据 (槽位数等)，Pilot 可不提供
    pub capacity: Option<usize>,
    /// 亲和性标签
    pub affinity: Option<String>,
}

/// 单元目录条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: String,
    pub kind: UnitKind,
    pub state: UnitState,
    pub pilot_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: f64,
    pub updated_at: f64,
}

/// 发布到协调目录的 CDS 全量快照
///
/// 软状态、最终一致；两个进程并发写同一条目时以后写者为准。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdsSnapshot {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub compute_units: Vec<UnitSnapshot>,
    pub data_units: Vec<UnitSnapshot>,
    pub pilot_compute: Vec<PilotSnapshot>,
    pub pilot_data: Vec<PilotSnapshot>,
}

impl CdsSnapshot {
    /// 空快照，仅携带身份；注册时使用
    pub fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            updated_at: TimeUtils::now_utc(),
            compute_units: Vec::new(),
            data_units: Vec::new(),
            pilot_compute: Vec::new(),
            pilot_data: Vec::new(),
        }
    }
}
