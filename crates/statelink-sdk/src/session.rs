//! 玩家会话生命周期
//!
//! 玩家上线/下线时统一通知各模块，下线时各模块清理自己的会话级缓存
//! （冷却记录、余额观测、远端 userId 等），持久化的绑定状态不受影响。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::snapshot::ActorProfile;

/// 会话回调 Hook
#[async_trait]
pub trait SessionHook: Send + Sync {
    async fn on_session_start(&self, actor: &ActorProfile) -> Result<()>;

    async fn on_session_end(&self, actor: &ActorProfile) -> Result<()>;
}

/// 会话管理器
#[derive(Default)]
pub struct SessionManager {
    hooks: Vec<Arc<dyn SessionHook>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn register_hook(&mut self, hook: Arc<dyn SessionHook>) {
        self.hooks.push(hook);
        debug!("会话 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：玩家上线
    ///
    /// 按注册顺序执行，单个 Hook 失败只记录，其余继续执行，最后返回第一个错误
    pub async fn notify_start(&self, actor: &ActorProfile) -> Result<()> {
        let mut first_error = None;
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_session_start(actor).await {
                warn!("⚠️ Hook #{} 处理 {} 上线失败: {}", index, actor.name, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// 通知所有 Hook：玩家下线
    pub async fn notify_end(&self, actor: &ActorProfile) -> Result<()> {
        let mut first_error = None;
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_session_end(actor).await {
                warn!("⚠️ Hook #{} 处理 {} 下线失败: {}", index, actor.name, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
