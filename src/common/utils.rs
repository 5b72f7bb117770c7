use nanoid::nanoid;
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

use crate::common::error::{CdsError, Result};
use crate::common::model::UnitKind;

// ==========================================
// 1. ID 生成与恢复 (Identity Utilities)
// ==========================================

/// CDS 身份的固定前缀，嵌在 url 的路径段里
pub(crate) const CDS_ID_PREFIX: &str = "cds-";

/// 生成新的 CDS 身份: `cds-<uuid>`
pub(crate) fn new_cds_id() -> String {
    format!("{}{}", CDS_ID_PREFIX, Uuid::new_v4())
}

/// 从任意 url 字符串里恢复 CDS 身份
///
/// 解析固定的 `cds-` 前缀段，到下一个 `/` 或字符串末尾为止。
/// 同一个 url 在任何进程里解析出的 id 必须一致。
pub(crate) fn parse_cds_id(cds_url: &str) -> Result<String> {
    let start = cds_url
        .find(CDS_ID_PREFIX)
        .ok_or_else(|| CdsError::MalformedUrl(cds_url.to_string()))?;
    let rest = &cds_url[start..];
    let end = rest.find('/').unwrap_or(rest.len());
    let id = &rest[..end];
    if id.len() <= CDS_ID_PREFIX.len() {
        return Err(CdsError::MalformedUrl(cds_url.to_string()));
    }
    Ok(id.to_string())
}

/// 生成单元 ID: `cu-xxxx` / `du-xxxx`
///
/// 使用 NanoID 替换 UUID。
/// - 字符集: A-Za-z0-9 (不含 - 和 _，便于双击选中)
/// - 长度 12，在单个 CDS 的量级下碰撞概率可以忽略。
pub(crate) fn new_unit_id(kind: UnitKind) -> String {
    const ALPHABET: [char; 62] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
        'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
        'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
        'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
    ];
    format!("{}-{}", kind.prefix(), nanoid!(12, &ALPHABET))
}

// ==========================================
// 2. 算法工具 (Algorithmic Utilities)
// ==========================================

/// 计算指数退避时间 (Exponential Backoff with Jitter)
///
/// - attempt: 当前重试次数 (1, 2, 3...)
/// - base_ms: 基础延迟毫秒数
/// - max_ms: 最大延迟毫秒数
pub(crate) fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::rng();

    // 1. 计算指数部分: base * 2^(attempt-1)
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1).min(30));
    let mut backoff = (base_ms as f64) * (exponent as f64);

    // 2. 限制最大值 (Cap)
    if backoff > max_ms as f64 {
        backoff = max_ms as f64;
    }

    // 3. 添加抖动 (Full Jitter)
    // 随机取 [0, backoff]，比 Equal Jitter 更能平滑负载
    let jittered = rng.random_range(0.0..=backoff);

    // 4. 保证最小延迟 (防止 0ms 空转)
    Duration::from_millis(jittered.max(1.0) as u64)
}
