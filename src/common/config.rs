use serde::{Deserialize, Serialize};

// ==========================================
// 1. 分发循环配置 (DispatchConfig)
// ==========================================

/// 后台分发循环的节奏控制
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 兜底轮询间隔 (毫秒)
    ///
    /// - 说明: 队列弹出带此超时上界，保证停机标志能被及时观察到。
    /// - 默认值: 100 ms
    /// - 影响: 设得太短会空转；设得太长会拖慢 `cancel()` 的生效。
    pub poll_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

// ==========================================
// 2. 放置策略配置 (PlacementConfig)
// ==========================================

/// 放置与提交的重试/退避配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// 放置尝试上限
    ///
    /// - 说明: Scheduler 连续返回 "无合适 Pilot" 的次数超过此值，单元降级为 Failed。
    /// - 默认值: 60
    /// - 说明: 配合退避上限，默认给新 Pilot 注册留出约一分钟的窗口。
    pub max_placement_attempts: u32,

    /// 放置退避基准 (毫秒)
    ///
    /// - 说明: 第 n 次放置失败后，重入队延迟按指数增长并加全抖动。
    /// - 默认值: 50 ms
    pub placement_backoff_base_ms: u64,

    /// 放置退避封顶 (毫秒)
    ///
    /// - 默认值: 1000 ms
    pub placement_backoff_max_ms: u64,

    /// 单元提交重试上限
    ///
    /// - 说明: Pilot 的提交接口报错时在分发循环内重试的总次数 (含首次)。
    /// - 默认值: 3
    pub submit_max_retries: u32,

    /// 提交重试退避基准 (毫秒)
    pub submit_backoff_base_ms: u64,

    /// 提交重试退避封顶 (毫秒)
    pub submit_backoff_max_ms: u64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            max_placement_attempts: 60,
            placement_backoff_base_ms: 50,
            placement_backoff_max_ms: 1000,
            submit_max_retries: 3,
            submit_backoff_base_ms: 50,
            submit_backoff_max_ms: 500,
        }
    }
}

// ==========================================
// 3. 总配置入口 (CdsConfig)
// ==========================================

/// CDS 总配置
///
/// 使用分层结构组织配置项。支持 `serde` 序列化，可直接从 YAML/JSON 加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdsConfig {
    /// 分发循环节奏
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// 放置与重试策略
    #[serde(default)]
    pub placement: PlacementConfig,

    /// 命名空间 (用于协调目录 Key 前缀)
    /// 默认: "talaria"
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "talaria".to_string()
}

impl Default for CdsConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            placement: PlacementConfig::default(),
            namespace: default_namespace(),
        }
    }
}

impl CdsConfig {
    /// 快速创建一个测试用配置
    ///
    /// 轮询与退避都调到最短，方便在单测里观察状态流转。
    pub fn new_test() -> Self {
        let mut cfg = Self::default();
        cfg.dispatch.poll_interval_ms = 10;
        cfg.placement.placement_backoff_base_ms = 5;
        cfg.placement.placement_backoff_max_ms = 20;
        cfg.placement.submit_backoff_base_ms = 1;
        cfg.placement.submit_backoff_max_ms = 5;
        cfg
    }
}
