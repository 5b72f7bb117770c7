// 1. 基础模块
pub mod common;

// 2. 外部契约 (协调目录 / Pilot 代理 / 放置策略)
pub mod coordination;
pub mod pilot;
pub mod scheduler;

// 3. 编排核心
pub mod service;
