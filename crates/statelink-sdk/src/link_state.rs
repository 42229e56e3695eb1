//! 玩家绑定状态缓存
//!
//! - 内存 Map 是读路径，缺失时才回落到磁盘读取
//! - 写入先更新内存，再同步写穿到磁盘后返回
//! - 磁盘写失败只记日志，不回滚内存：I/O 故障期间以内存为准
//! - 记录只切换、不删除，解绑后链接时间和同步时间仍然保留

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::snapshot::ActorId;
use crate::storage::{namespaces, KvStore};
use crate::utils::Clock;

/// 单个玩家的绑定状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorLinkState {
    pub actor_id: ActorId,
    pub linked: bool,
    /// 最近一次绑定时间（UTC 毫秒）
    pub linked_at: Option<i64>,
    /// 最近一次成功同步时间（UTC 毫秒）
    pub last_sync_at: Option<i64>,
}

impl ActorLinkState {
    pub fn new(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            linked: false,
            linked_at: None,
            last_sync_at: None,
        }
    }
}

/// 绑定状态的持久化后端
#[async_trait]
pub trait LinkStateBackend: Send + Sync {
    async fn load_all(&self) -> Result<Vec<ActorLinkState>>;

    async fn load(&self, actor: ActorId) -> Result<Option<ActorLinkState>>;

    async fn save(&self, state: &ActorLinkState) -> Result<()>;
}

/// 基于 sled 的持久化后端
pub struct SledLinkBackend {
    kv: KvStore,
}

impl SledLinkBackend {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl LinkStateBackend for SledLinkBackend {
    async fn load_all(&self) -> Result<Vec<ActorLinkState>> {
        let entries: Vec<(String, ActorLinkState)> =
            self.kv.scan_prefix(namespaces::LINK_STATE, b"").await?;
        Ok(entries.into_iter().map(|(_, state)| state).collect())
    }

    async fn load(&self, actor: ActorId) -> Result<Option<ActorLinkState>> {
        self.kv.get(namespaces::LINK_STATE, actor.to_string()).await
    }

    async fn save(&self, state: &ActorLinkState) -> Result<()> {
        self.kv
            .set(namespaces::LINK_STATE, state.actor_id.to_string(), state)
            .await
    }
}

/// 绑定状态缓存
pub struct LinkStateStore {
    cache: RwLock<HashMap<ActorId, ActorLinkState>>,
    backend: Arc<dyn LinkStateBackend>,
    clock: Arc<dyn Clock>,
}

impl LinkStateStore {
    pub fn new(backend: Arc<dyn LinkStateBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            backend,
            clock,
        }
    }

    /// 创建并立即加载全部记录
    pub async fn open(backend: Arc<dyn LinkStateBackend>, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self::new(backend, clock);
        store.load_from_disk().await?;
        Ok(store)
    }

    /// 从磁盘加载全部记录到内存，返回加载条数
    pub async fn load_from_disk(&self) -> Result<usize> {
        let states = self.backend.load_all().await?;
        let count = states.len();
        let linked = states.iter().filter(|s| s.linked).count();

        let mut cache = self.cache.write();
        for state in states {
            cache.insert(state.actor_id, state);
        }
        drop(cache);

        info!("✅ 已加载 {} 条绑定状态（{} 个已绑定）", count, linked);
        Ok(count)
    }

    /// 读取状态；内存没有时回落到磁盘
    pub async fn state_of(&self, actor: ActorId) -> ActorLinkState {
        if let Some(state) = self.cache.read().get(&actor) {
            return state.clone();
        }

        let loaded = match self.backend.load(actor).await {
            Ok(Some(state)) => state,
            Ok(None) => ActorLinkState::new(actor),
            Err(e) => {
                warn!("⚠️ 读取 {} 的绑定状态失败，按未绑定处理: {}", actor, e);
                ActorLinkState::new(actor)
            }
        };

        self.cache.write().entry(actor).or_insert(loaded).clone()
    }

    pub async fn is_linked(&self, actor: ActorId) -> bool {
        self.state_of(actor).await.linked
    }

    /// 设置绑定状态，返回状态是否发生变化
    pub async fn set_linked(&self, actor: ActorId, linked: bool) -> bool {
        let now = self.clock.now_millis();
        let (changed, _) = self
            .update(actor, |state| {
                let changed = state.linked != linked;
                if linked && changed {
                    state.linked_at = Some(now);
                }
                state.linked = linked;
                changed
            })
            .await;
        if changed {
            debug!("玩家 {} 绑定状态 -> {}", actor, linked);
        }
        changed
    }

    /// 解除绑定，与 `set_linked(actor, false)` 等价
    pub async fn clear_link(&self, actor: ActorId) -> bool {
        info!("🔓 清除玩家 {} 的绑定状态", actor);
        self.set_linked(actor, false).await
    }

    pub async fn sync_time_of(&self, actor: ActorId) -> Option<i64> {
        self.state_of(actor).await.last_sync_at
    }

    pub async fn touch_sync_time(&self, actor: ActorId) {
        let now = self.clock.now_millis();
        self.update(actor, |state| state.last_sync_at = Some(now)).await;
    }

    pub async fn link_time_of(&self, actor: ActorId) -> Option<i64> {
        self.state_of(actor).await.linked_at
    }

    /// 当前内存中已绑定的玩家
    pub fn linked_actors(&self) -> Vec<ActorId> {
        self.cache
            .read()
            .values()
            .filter(|state| state.linked)
            .map(|state| state.actor_id)
            .collect()
    }

    /// 修改内存后写穿到磁盘
    async fn update<R>(&self, actor: ActorId, mutate: impl FnOnce(&mut ActorLinkState) -> R) -> (R, ActorLinkState) {
        // 确保内存里有条目（可能需要读磁盘）
        self.state_of(actor).await;

        let (result, snapshot) = {
            let mut cache = self.cache.write();
            let state = cache.entry(actor).or_insert_with(|| ActorLinkState::new(actor));
            let result = mutate(state);
            (result, state.clone())
        };

        // 写盘在锁外进行，同一玩家并发更新时磁盘按最后完成的写入为准，可能落后于内存
        if let Err(e) = self.backend.save(&snapshot).await {
            error!("❌ 绑定状态写入磁盘失败（内存已更新）: actor={}, error={}", actor, e);
        }

        (result, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateLinkError;
    use crate::utils::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::from_millis(1_700_000_000_000))
    }

    async fn sled_store(dir: &TempDir, clock: Arc<ManualClock>) -> LinkStateStore {
        let kv = KvStore::new(dir.path()).await.unwrap();
        LinkStateStore::open(Arc::new(SledLinkBackend::new(kv)), clock).await.unwrap()
    }

    /// 写入永远失败的后端
    struct FailingBackend {
        saves: AtomicUsize,
    }

    #[async_trait]
    impl LinkStateBackend for FailingBackend {
        async fn load_all(&self) -> Result<Vec<ActorLinkState>> {
            Ok(Vec::new())
        }

        async fn load(&self, _actor: ActorId) -> Result<Option<ActorLinkState>> {
            Err(StateLinkError::IO("disk gone".into()))
        }

        async fn save(&self, _state: &ActorLinkState) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(StateLinkError::IO("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_link_round_trip_and_timestamps() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = sled_store(&dir, clock.clone()).await;
        let actor = ActorId::random();

        assert!(!store.is_linked(actor).await);
        assert!(store.set_linked(actor, true).await);
        assert!(store.is_linked(actor).await);
        assert_eq!(store.link_time_of(actor).await, Some(1_700_000_000_000));

        clock.advance(std::time::Duration::from_secs(30));
        store.touch_sync_time(actor).await;
        assert_eq!(store.sync_time_of(actor).await, Some(1_700_000_030_000));
        assert_eq!(store.linked_actors(), vec![actor]);
    }

    #[tokio::test]
    async fn test_unlink_is_idempotent_and_keeps_history() {
        let dir = TempDir::new().unwrap();
        let store = sled_store(&dir, clock()).await;
        let actor = ActorId::random();

        store.set_linked(actor, true).await;
        store.touch_sync_time(actor).await;

        assert!(store.clear_link(actor).await);
        assert!(!store.is_linked(actor).await);
        assert!(!store.clear_link(actor).await);
        assert!(!store.is_linked(actor).await);

        // 历史时间戳在解绑后保留
        let state = store.state_of(actor).await;
        assert!(state.linked_at.is_some());
        assert!(state.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let actor = ActorId::random();
        {
            let store = sled_store(&dir, clock()).await;
            store.set_linked(actor, true).await;
        }

        let store = sled_store(&dir, clock()).await;
        assert_eq!(store.linked_actors(), vec![actor]);
        assert!(store.is_linked(actor).await);
    }

    #[tokio::test]
    async fn test_lazy_fallback_reads_disk_when_cache_misses() {
        let dir = TempDir::new().unwrap();
        let kv = KvStore::new(dir.path()).await.unwrap();
        let backend = Arc::new(SledLinkBackend::new(kv.clone()));
        // 不做启动加载
        let store = LinkStateStore::new(backend.clone(), clock());

        let actor = ActorId::random();
        let mut state = ActorLinkState::new(actor);
        state.linked = true;
        backend.save(&state).await.unwrap();

        assert!(store.is_linked(actor).await);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory_authoritative() {
        let backend = Arc::new(FailingBackend { saves: AtomicUsize::new(0) });
        let store = LinkStateStore::new(backend.clone(), clock());
        let actor = ActorId::random();

        assert!(!store.is_linked(actor).await);
        store.set_linked(actor, true).await;
        assert!(store.is_linked(actor).await);
        assert_eq!(backend.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(sled_store(&dir, clock()).await);
        let actors: Vec<ActorId> = (0..32).map(|_| ActorId::random()).collect();

        let handles: Vec<_> = actors
            .iter()
            .map(|actor| {
                let store = store.clone();
                let actor = *actor;
                tokio::spawn(async move {
                    store.set_linked(actor, true).await;
                    store.touch_sync_time(actor).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.linked_actors().len(), 32);
    }
}
