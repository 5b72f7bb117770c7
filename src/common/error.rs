use thiserror::Error;

/// CDS 统一结果类型
///
/// 使用此别名可以简化函数签名：`fn do_something() -> Result<()>`
pub type Result<T> = std::result::Result<T, CdsError>;

#[derive(Error, Debug)]
pub enum CdsError {
    // ==========================================
    // 1. 提交与查询错误 (Submission & Lookup)
    // ==========================================
    /// 非法的单元描述
    ///
    /// - 触发场景: `submit_*` 收到空的或结构非法的描述。
    /// - 后果: 提交被拒绝，不会创建任何单元。
    /// - 处理: 核心只校验描述非空，内部字段原样透传给 Scheduler 和 Pilot。
    #[error("Invalid unit description: {0}")]
    InvalidDescription(String),

    /// 操作未实现
    ///
    /// - 触发场景: 调用了实现方未提供的可选操作 (例如极简协调后端的 `get_cds`)。
    /// - 处理: 显式报错，绝不静默吞掉 (No-Op 是被禁止的)。
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// 单元不存在
    ///
    /// - 触发场景: 按 ID 查询一个从未注册或属于其他 CDS 的单元。
    #[error("Unit {0} not found")]
    UnitNotFound(String),

    /// CDS 已取消
    ///
    /// - 触发场景: `cancel()` 之后仍有调用方尝试提交新单元。
    /// - 后果: 请求被拒绝。后台分发循环已退出，收下的单元只会被搁置。
    #[error("Compute data service {0} is canceled, rejecting new submissions")]
    ServiceCanceled(String),

    // ==========================================
    // 2. 放置与提交失败 (Placement & Submission)
    // ==========================================
    /// 放置重试耗尽
    ///
    /// - 触发场景: Scheduler 连续 N 次返回 "无合适 Pilot"。
    /// - 后果: 单元转入 Failed，原因写入 `last_error`。
    /// - 说明: 单次 "无合适 Pilot" 是稳态而不是错误，只有耗尽才降级。
    #[error("No suitable pilot after {attempts} placement attempts")]
    PlacementExhausted { attempts: u32 },

    /// 向 Pilot 提交失败
    ///
    /// - 触发场景: Pilot 的原生提交接口连续拒绝或报错，且重试次数耗尽。
    /// - 后果: 单元转入 Failed，最后一次错误写入 `last_error`。
    #[error("Submission to pilot {pilot_id} failed after {attempts} attempts: {reason}")]
    SubmissionFailed {
        pilot_id: String,
        attempts: u32,
        reason: String,
    },

    /// wait() 期间收到中断信号
    ///
    /// - 触发场景: 调用方在 `wait()` 阻塞期间按下 Ctrl-C。
    /// - 后果: CDS 被 `cancel()`，中断以此错误形式回抛给调用方。
    #[error("Wait interrupted, compute data service canceled")]
    InterruptedWait,

    // ==========================================
    // 3. 基础设施与 IO 错误 (Infrastructure & IO)
    // ==========================================
    /// CDS url 无法解析
    ///
    /// - 触发场景: `reattach` 收到的 url 中找不到 `cds-` 前缀段。
    #[error("Malformed CDS url: {0}")]
    MalformedUrl(String),

    /// 协调后端交互失败
    ///
    /// - 触发场景: 目录读写失败。写路径是 fire-and-forget 的，只记日志不上抛。
    #[error("Coordination backend failure: {0}")]
    Coordination(String),

    /// Redis 交互失败
    ///
    /// - 处理: 此类错误通常是暂时的，目录写入下一轮会重新发布。
    #[cfg(feature = "distributed")]
    #[error("Redis interaction failed: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    /// Redis 连接池错误
    #[cfg(feature = "distributed")]
    #[error("Redis pool failure: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// 序列化/反序列化失败
    ///
    /// - 触发场景: 目录里的快照 JSON 损坏，或结构体版本不兼容。
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 通用 IO 错误
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl CdsError {
    /// 判断该错误是否值得重试 (Retryable)
    ///
    /// - 返回 `true`: 基础设施抖动，局部退避重试即可。
    /// - 返回 `false`: 输入或逻辑错误，重试也没用。
    pub fn is_retryable(&self) -> bool {
        match self {
            // 基础设施抖动 -> 重试
            CdsError::Coordination(_) => true,
            CdsError::Io(_) => true,
            #[cfg(feature = "distributed")]
            CdsError::Redis(e) => {
                e.is_connection_dropped() || e.is_cluster_error() || e.is_io_error()
            }
            #[cfg(feature = "distributed")]
            CdsError::Pool(_) => true,

            // 输入/逻辑错误 -> 不重试
            CdsError::InvalidDescription(_) => false,
            CdsError::Unsupported(_) => false,
            CdsError::UnitNotFound(_) => false,
            CdsError::ServiceCanceled(_) => false,
            CdsError::MalformedUrl(_) => false,
            CdsError::Serialization(_) => false,

            // 终局性结果 -> 不重试 (重试已在分发循环内部做完)
            CdsError::PlacementExhausted { .. } => false,
            CdsError::SubmissionFailed { .. } => false,
            CdsError::InterruptedWait => false,
        }
    }
}
