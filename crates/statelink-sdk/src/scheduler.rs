//! 同步调度
//!
//! 两种节奏各自独立冷却：
//! - 轻量（Lightweight）：单个字段变化的近实时通知，秒级
//! - 全量（Full）：完整快照上传，下限 60 秒
//!
//! `should_sync` 是非阻塞检查，返回 false 的调用方直接跳过本周期，
//! 不排队、不重试，错过的窗口由下一次周期同步或事件补上。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::{limits, SyncConfig};
use crate::error::Result;
use crate::session::SessionHook;
use crate::snapshot::{ActorId, ActorProfile};
use crate::utils::Clock;

/// 同步节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    Lightweight,
    Full,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Lightweight => "lightweight",
            Cadence::Full => "full",
        }
    }
}

/// 冷却窗口调度器，可被多个并发调用方同时使用
pub struct SyncScheduler {
    lightweight_cooldown: Duration,
    full_cooldown: Duration,
    /// (玩家, 节奏) -> 上次触发时间（UTC 毫秒）
    last_fired: RwLock<HashMap<(ActorId, Cadence), i64>>,
    clock: Arc<dyn Clock>,
}

impl SyncScheduler {
    pub fn new(config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_cooldowns(
            config.effective_lightweight_cooldown(),
            config.effective_full_cooldown(),
            clock,
        )
    }

    /// 传入的冷却值同样会被钳制到下限
    pub fn with_cooldowns(lightweight: Duration, full: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            lightweight_cooldown: lightweight.max(limits::LIGHTWEIGHT_COOLDOWN_FLOOR),
            full_cooldown: full.max(limits::FULL_SYNC_COOLDOWN_FLOOR),
            last_fired: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn effective_cooldown(&self, cadence: Cadence) -> Duration {
        match cadence {
            Cadence::Lightweight => self.lightweight_cooldown,
            Cadence::Full => self.full_cooldown,
        }
    }

    fn cooldown_elapsed(&self, last: Option<i64>, cadence: Cadence, now: i64) -> bool {
        match last {
            None => true,
            Some(last) => {
                let cooldown = self.effective_cooldown(cadence).as_millis() as i64;
                now.saturating_sub(last) > cooldown
            }
        }
    }

    /// 距上次 `mark_synced` 是否已超过冷却时间
    pub fn should_sync(&self, actor: ActorId, cadence: Cadence) -> bool {
        let last = self.last_fired.read().get(&(actor, cadence)).copied();
        self.cooldown_elapsed(last, cadence, self.clock.now_millis())
    }

    /// 记录一次同步（成功或已尝试）
    pub fn mark_synced(&self, actor: ActorId, cadence: Cadence) {
        let now = self.clock.now_millis();
        self.last_fired.write().insert((actor, cadence), now);
    }

    /// 检查并占用窗口，两个并发调用方只有一个能拿到
    pub fn try_acquire(&self, actor: ActorId, cadence: Cadence) -> bool {
        let now = self.clock.now_millis();
        let mut last_fired = self.last_fired.write();
        let last = last_fired.get(&(actor, cadence)).copied();
        if !self.cooldown_elapsed(last, cadence, now) {
            debug!("{} 的 {} 同步仍在冷却中", actor, cadence.as_str());
            return false;
        }
        last_fired.insert((actor, cadence), now);
        true
    }

    pub fn last_fired(&self, actor: ActorId, cadence: Cadence) -> Option<i64> {
        self.last_fired.read().get(&(actor, cadence)).copied()
    }

    /// 清除该玩家的全部冷却记录
    pub fn forget(&self, actor: ActorId) {
        self.last_fired.write().retain(|(id, _), _| *id != actor);
    }

    /// 当前有冷却记录的玩家数
    pub fn tracked_actors(&self) -> usize {
        let last_fired = self.last_fired.read();
        let mut actors: Vec<ActorId> = last_fired.keys().map(|(id, _)| *id).collect();
        actors.sort();
        actors.dedup();
        actors.len()
    }
}

#[async_trait]
impl SessionHook for SyncScheduler {
    async fn on_session_start(&self, _actor: &ActorProfile) -> Result<()> {
        Ok(())
    }

    async fn on_session_end(&self, actor: &ActorProfile) -> Result<()> {
        self.forget(actor.id);
        Ok(())
    }
}

/// 批量同步游标：每次取出一个玩家
///
/// 由单个周期定时器驱动，取完即结束。
#[derive(Debug, Clone)]
pub struct BatchCursor {
    actors: Vec<ActorProfile>,
    position: usize,
}

impl BatchCursor {
    pub fn new(actors: Vec<ActorProfile>) -> Self {
        Self { actors, position: 0 }
    }

    /// 取下一个玩家；第二个值表示游标是否已经走完
    pub fn advance(&mut self) -> (Option<ActorProfile>, bool) {
        let next = self.actors.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }
        (next, self.is_done())
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.actors.len()
    }

    pub fn remaining(&self) -> usize {
        self.actors.len().saturating_sub(self.position)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl Iterator for BatchCursor {
    type Item = ActorProfile;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().0
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}
