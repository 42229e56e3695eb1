//! KV 存储模块 - 基于 sled 的本地持久化
//!
//! 本模块提供：
//! - 按命名空间隔离的 Tree（绑定状态、排行榜各占一个）
//! - JSON 编码的值
//! - 写入后立即 flush，进程重启后数据仍在

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::{Result, StateLinkError};

/// 常用命名空间
pub mod namespaces {
    /// 玩家绑定状态
    pub const LINK_STATE: &str = "link_state";
    /// 排行榜前 3 名
    pub const LEADERBOARD: &str = "leaderboard";
}

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    base_path: PathBuf,
    db: Arc<Db>,
    /// 已打开的命名空间 Tree
    trees: Arc<RwLock<HashMap<String, Tree>>>,
}

impl KvStore {
    /// 在 `base_path/kv` 下打开数据库
    pub async fn new(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| StateLinkError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个实例可能刚释放文件锁（热重载），带退避重试
        const MAX_OPEN_RETRIES: u32 = 6;
        const RETRY_DELAY_MS: u64 = 200;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(db) => {
                    tracing::info!("✅ KV 存储已打开: {}", kv_path.display());
                    return Ok(Self {
                        base_path,
                        db: Arc::new(db),
                        trees: Arc::new(RwLock::new(HashMap::new())),
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if !is_lock || attempt + 1 == MAX_OPEN_RETRIES {
                        break;
                    }
                    let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                    tracing::warn!("⚠️ KV 存储被占用，{}ms 后重试 (第 {} 次)", delay_ms, attempt + 1);
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Err(StateLinkError::KvStore(
            last_err
                .map(|e| format!("打开 sled 数据库失败: {}", e))
                .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
        ))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 获取（必要时打开）命名空间 Tree
    fn tree(&self, namespace: &str) -> Result<Tree> {
        if let Some(tree) = self.trees.read().get(namespace) {
            return Ok(tree.clone());
        }

        let tree = self
            .db
            .open_tree(namespace)
            .map_err(|e| StateLinkError::KvStore(format!("打开 Tree {} 失败: {}", namespace, e)))?;
        self.trees.write().insert(namespace.to_string(), tree.clone());
        tracing::debug!("KV Tree 已打开: {}", namespace);
        Ok(tree)
    }

    /// 写入并 flush
    pub async fn set<K, V>(&self, namespace: &str, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let tree = self.tree(namespace)?;
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| StateLinkError::Serialization(format!("序列化值失败: {}", e)))?;

        tree.insert(key, value_bytes)
            .map_err(|e| StateLinkError::KvStore(format!("设置键值对失败: {}", e)))?;
        tree.flush_async()
            .await
            .map_err(|e| StateLinkError::KvStore(format!("flush 失败: {}", e)))?;

        Ok(())
    }

    pub async fn get<K, V>(&self, namespace: &str, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: for<'de> Deserialize<'de>,
    {
        let tree = self.tree(namespace)?;

        let result = tree
            .get(key)
            .map_err(|e| StateLinkError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| StateLinkError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn delete<K>(&self, namespace: &str, key: K) -> Result<bool>
    where
        K: AsRef<[u8]>,
    {
        let tree = self.tree(namespace)?;
        let removed = tree
            .remove(key)
            .map_err(|e| StateLinkError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(removed.is_some())
    }

    /// 遍历命名空间下指定前缀的全部记录
    ///
    /// 无法解析的记录会被跳过并记录警告，一条坏数据不影响其他记录加载。
    pub async fn scan_prefix<V>(&self, namespace: &str, prefix: &[u8]) -> Result<Vec<(String, V)>>
    where
        V: for<'de> Deserialize<'de>,
    {
        let tree = self.tree(namespace)?;
        let mut results = Vec::new();

        for entry in tree.scan_prefix(prefix) {
            let (key, value_bytes) =
                entry.map_err(|e| StateLinkError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let key = String::from_utf8_lossy(&key).into_owned();

            match serde_json::from_slice(&value_bytes) {
                Ok(value) => results.push((key, value)),
                Err(e) => tracing::warn!("⚠️ 跳过无法解析的记录 {}/{}: {}", namespace, key, e),
            }
        }

        Ok(results)
    }

    pub fn len(&self, namespace: &str) -> Result<usize> {
        Ok(self.tree(namespace)?.len())
    }

    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| StateLinkError::KvStore(format!("flush 失败: {}", e)))?;
        Ok(())
    }
}
