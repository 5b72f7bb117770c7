pub mod config;
pub mod error;
pub mod model;
pub mod time;
pub(crate) mod utils;

// 导出配置
pub use config::{CdsConfig, DispatchConfig, PlacementConfig};

// 导出错误类型
pub use error::{CdsError, Result};

// 导出核心模型
pub use model::{
    CdsSnapshot, ComputeUnit, DataUnit, PilotSnapshot, ServiceState, Unit, UnitDescription,
    UnitKind, UnitSnapshot, UnitState,
};

pub use time::TimeUtils;
// 内部工具的快捷访问
pub(crate) use utils::{calculate_backoff, new_cds_id, new_unit_id, parse_cds_id};
