use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};

use crate::common::error::Result;
use crate::common::CdsSnapshot;
use crate::coordination::traits::CoordinationBackend;

/// Redis 连接凭证
///
/// 结构化、强类型的凭证记录，由配置反序列化而来。
/// 绝不通过执行任意编码字符串来恢复安全上下文。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCredentials {
    /// 连接 url (e.g. "redis://127.0.0.1:6379/0")
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl RedisCredentials {
    /// 拼出带认证信息的连接 url
    fn connection_url(&self) -> String {
        match (&self.username, &self.password) {
            (None, None) => self.url.clone(),
            (user, pass) => {
                let rest = self
                    .url
                    .strip_prefix("redis://")
                    .unwrap_or(self.url.as_str());
                format!(
                    "redis://{}:{}@{}",
                    user.as_deref().unwrap_or_default(),
                    pass.as_deref().unwrap_or_default(),
                    rest
                )
            }
        }
    }
}

/// Redis 协调目录实现
///
/// 快照以 JSON 字符串存在以 CDS url 为 Key 的条目下。
/// 写操作无事务保证 (SET 覆盖，后写者为准)。
pub struct RedisCoordination {
    /// Redis 连接池
    pool: Pool,
    /// Key 前缀 (命名空间)
    namespace: String,
}

impl RedisCoordination {
    /// 创建新实例
    pub fn new(namespace: &str, credentials: &RedisCredentials, pool_size: usize) -> Result<Self> {
        let mut cfg = Config::from_url(credentials.connection_url());
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| crate::common::CdsError::Coordination(e.to_string()))?;

        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    /// CDS 条目的存储 Key
    fn key_cds(&self, cds_url: &str) -> String {
        format!("{}:cds:{}", self.namespace, cds_url)
    }
}

#[async_trait]
impl CoordinationBackend for RedisCoordination {
    async fn get_base_url(&self, application_id: &str) -> Result<String> {
        Ok(format!("redis://{}/{}", self.namespace, application_id))
    }

    async fn add_cds(&self, base_url: &str, snapshot: &CdsSnapshot) -> Result<String> {
        let url = format!("{}/{}", base_url, snapshot.id);
        self.update_cds(&url, snapshot).await?;
        Ok(url)
    }

    async fn update_cds(&self, cds_url: &str, snapshot: &CdsSnapshot) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(snapshot)?;
        conn.set::<_, _, ()>(self.key_cds(cds_url), json).await?;
        Ok(())
    }

    async fn delete_cds(&self, cds_url: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        // DEL 对不存在的 Key 返回 0，天然幂等
        conn.del::<_, ()>(self.key_cds(cds_url)).await?;
        Ok(())
    }

    async fn get_cds(&self, cds_url: &str) -> Result<Option<CdsSnapshot>> {
        let mut conn = self.pool.get().await?;
        let json: Option<String> = conn.get(self.key_cds(cds_url)).await?;
        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}
