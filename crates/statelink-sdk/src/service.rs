//! 同步服务 - 把各模块组装起来并驱动所有定时任务
//!
//! 定时任务（相互独立，统一由 [`CancellationToken`] 停止）：
//! - 每个在线且已绑定玩家各自的周期全量同步
//! - 全局批量同步：每次间隔一段时间同步一个玩家，一轮结束后评估排行榜
//! - 余额轮询与每日午夜重置
//! - 独立的排行榜评估
//!
//! 游戏事件通过 [`SyncService::dispatch`] 投递，处理过程在独立任务中执行，
//! 不阻塞产生事件的调用方。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::SnapshotCollector;
use crate::config::StateLinkConfig;
use crate::economy::{PollOutcome, ResourceDeltaMonitor, ResourceLedger};
use crate::error::{Result, StateLinkError};
use crate::events::{EventManager, SyncEvent};
use crate::leaderboard::{LeaderboardEvent, LeaderboardTracker};
use crate::link_state::{LinkStateBackend, LinkStateStore, SledLinkBackend};
use crate::providers::{Capabilities, GameStateProvider};
use crate::remote::{RemoteSyncClient, SyncBackend, UnlinkOutcome};
use crate::scheduler::{BatchCursor, Cadence, SyncScheduler};
use crate::session::SessionManager;
use crate::snapshot::{ActorId, ActorProfile, Location, StateSnapshot};
use crate::storage::KvStore;
use crate::utils::{Clock, SystemClock};

/// 宿主上报的游戏事件
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    WorldChanged { actor: ActorProfile },
    Teleported { actor: ActorProfile, to: Location },
    Moved { actor: ActorProfile, to: Location },
    Died { actor: ActorProfile, deaths: i64 },
    AdvancementDone { actor: ActorProfile, key: String },
    LevelChanged { actor: ActorProfile, level: u32 },
    ExperienceChanged { actor: ActorProfile, total: u64, progress: f32 },
    GameModeChanged { actor: ActorProfile, mode: String },
    MobKilled { actor: ActorProfile, total: i64 },
    BlockMined { actor: ActorProfile, total: i64 },
    /// 玩家执行了经济相关命令，立即检查余额
    EconomyCommand { actor: ActorProfile },
}

impl GameEvent {
    pub fn actor(&self) -> &ActorProfile {
        match self {
            GameEvent::WorldChanged { actor }
            | GameEvent::Teleported { actor, .. }
            | GameEvent::Moved { actor, .. }
            | GameEvent::Died { actor, .. }
            | GameEvent::AdvancementDone { actor, .. }
            | GameEvent::LevelChanged { actor, .. }
            | GameEvent::ExperienceChanged { actor, .. }
            | GameEvent::GameModeChanged { actor, .. }
            | GameEvent::MobKilled { actor, .. }
            | GameEvent::BlockMined { actor, .. }
            | GameEvent::EconomyCommand { actor } => actor,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::WorldChanged { .. } => "world_change",
            GameEvent::Teleported { .. } => "teleport",
            GameEvent::Moved { .. } => "move",
            GameEvent::Died { .. } => "death",
            GameEvent::AdvancementDone { .. } => "advancement",
            GameEvent::LevelChanged { .. } => "level",
            GameEvent::ExperienceChanged { .. } => "experience",
            GameEvent::GameModeChanged { .. } => "gamemode",
            GameEvent::MobKilled { .. } => "mob_kill",
            GameEvent::BlockMined { .. } => "block_mined",
            GameEvent::EconomyCommand { .. } => "economy_command",
        }
    }
}

/// 全量同步的触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    Join,
    Periodic,
    Batch,
    Linked,
    Event(&'static str),
}

impl SyncReason {
    /// 事件触发的同步受冷却限制，定时任务自身已按间隔运行
    fn is_gated(&self) -> bool {
        matches!(self, SyncReason::Event(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    NotLinked,
    CoolingDown,
    Pushed(Box<StateSnapshot>),
}

/// 一轮批量同步的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub actors: usize,
    pub pushed: usize,
    pub failed: usize,
    pub leaderboard_events: usize,
    pub cancelled: bool,
}

/// 单个玩家的周期同步任务，generation 用来区分同一玩家的新旧任务
struct ActorTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// 同步服务
pub struct SyncService {
    config: StateLinkConfig,
    clock: Arc<dyn Clock>,
    kv: KvStore,
    game: Arc<dyn GameStateProvider>,
    links: Arc<LinkStateStore>,
    collector: Arc<SnapshotCollector>,
    scheduler: Arc<SyncScheduler>,
    backend: Arc<dyn SyncBackend>,
    monitor: Arc<ResourceDeltaMonitor>,
    leaderboard: Arc<LeaderboardTracker>,
    events: Arc<EventManager>,
    sessions: SessionManager,
    /// 玩家 -> 周期同步任务
    actor_tasks: Mutex<HashMap<ActorId, ActorTask>>,
    task_generation: AtomicU64,
    /// 玩家 -> 上次同步时的位置
    sync_locations: RwLock<HashMap<ActorId, Location>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl SyncService {
    pub fn builder(config: StateLinkConfig) -> SyncServiceBuilder {
        SyncServiceBuilder::new(config)
    }

    pub fn config(&self) -> &StateLinkConfig {
        &self.config
    }

    pub fn links(&self) -> &Arc<LinkStateStore> {
        &self.links
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<ResourceDeltaMonitor> {
        &self.monitor
    }

    pub fn leaderboard(&self) -> &Arc<LeaderboardTracker> {
        &self.leaderboard
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn active_sessions(&self) -> usize {
        self.actor_tasks.lock().len()
    }

    /// 启动全局定时任务：余额轮询、日切、批量同步、排行榜
    pub fn start(self: &Arc<Self>) {
        let mut background = self.background.lock();
        if !background.is_empty() {
            debug!("同步服务已经启动");
            return;
        }

        background.extend(self.monitor.spawn(self.shutdown.clone()));
        background.push(self.spawn_batch_loop());
        if self.config.leaderboard.enabled {
            background.push(self.spawn_leaderboard_loop());
        }
        info!("🚀 同步服务已启动: {} 个后台任务", background.len());
    }

    /// 停止所有定时任务并刷盘
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        info!("正在关闭同步服务...");
        self.shutdown.cancel();

        for (_, task) in self.actor_tasks.lock().drain() {
            task.handle.abort();
        }
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }

        self.kv.flush().await?;
        info!("✅ 同步服务已关闭");
        Ok(())
    }

    // ========== 会话 ==========

    /// 玩家上线：已绑定时立即全量同步并启动周期同步
    pub async fn on_actor_join(self: &Arc<Self>, actor: &ActorProfile) {
        info!("👋 {} 上线", actor.name);
        if let Err(e) = self.sessions.notify_start(actor).await {
            warn!("⚠️ 会话开始处理失败: {}", e);
        }

        if !self.links.is_linked(actor.id).await {
            return;
        }
        self.start_actor_sync(actor, SyncReason::Join).await;
    }

    /// 玩家下线：取消周期任务并清理所有会话级缓存
    pub async fn on_actor_quit(&self, actor: &ActorProfile) {
        info!("👋 {} 下线", actor.name);
        self.stop_actor_task(actor.id);
        self.sync_locations.write().remove(&actor.id);
        self.backend.forget_actor(actor.id);
        if let Err(e) = self.sessions.notify_end(actor).await {
            warn!("⚠️ 会话结束处理失败: {}", e);
        }
    }

    /// 先登记周期任务再做首次同步，首次同步期间下线也能取消任务
    async fn start_actor_sync(self: &Arc<Self>, actor: &ActorProfile, reason: SyncReason) {
        {
            let mut tasks = self.actor_tasks.lock();
            let generation = self.task_generation.fetch_add(1, Ordering::Relaxed);
            let handle = self.spawn_periodic_sync(actor.clone(), generation);
            if let Some(previous) = tasks.insert(actor.id, ActorTask { generation, handle }) {
                previous.handle.abort();
            }
        }

        if let Err(e) = self.sync_actor(actor, reason).await {
            warn!("⚠️ {} 的首次同步失败: {}", actor.name, e);
        }
    }

    fn stop_actor_task(&self, actor: ActorId) {
        if let Some(task) = self.actor_tasks.lock().remove(&actor) {
            task.handle.abort();
        }
    }

    /// 任务自行退出时只移除自己那一代的登记
    fn release_actor_task(&self, actor: ActorId, generation: u64) {
        let mut tasks = self.actor_tasks.lock();
        if tasks.get(&actor).is_some_and(|task| task.generation == generation) {
            tasks.remove(&actor);
        }
    }

    fn spawn_periodic_sync(self: &Arc<Self>, actor: ActorProfile, generation: u64) -> JoinHandle<()> {
        let interval = self.config.sync.effective_periodic_interval();
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(service) = weak.upgrade() else { break };
                if !service.game.is_online(actor.id) || !service.links.is_linked(actor.id).await {
                    debug!("{} 已离线或解绑，停止周期同步", actor.name);
                    break;
                }
                if let Err(e) = service.sync_actor(&actor, SyncReason::Periodic).await {
                    debug!("{} 的周期同步失败: {}", actor.name, e);
                }
            }
            if let Some(service) = weak.upgrade() {
                service.release_actor_task(actor.id, generation);
            }
        })
    }

    // ========== 全量同步 ==========

    /// 采集并上传一名玩家的完整快照
    pub async fn sync_actor(&self, actor: &ActorProfile, reason: SyncReason) -> Result<SyncOutcome> {
        if !self.links.is_linked(actor.id).await {
            return Ok(SyncOutcome::NotLinked);
        }
        if reason.is_gated() {
            if !self.scheduler.try_acquire(actor.id, Cadence::Full) {
                return Ok(SyncOutcome::CoolingDown);
            }
        } else {
            self.scheduler.mark_synced(actor.id, Cadence::Full);
        }

        let snapshot = self.collector.collect(actor)?;
        let location = snapshot.location().cloned();

        match self.backend.push_snapshot(snapshot.clone()).await {
            Ok(()) => {
                self.links.touch_sync_time(actor.id).await;
                // 上传期间可能已下线，不能留下会话级缓存
                if let Some(location) = location.filter(|_| self.game.is_online(actor.id)) {
                    self.sync_locations.write().insert(actor.id, location);
                }
                self.events.emit(SyncEvent::SnapshotPushed {
                    actor: actor.id,
                    timestamp: self.clock.now_millis(),
                });
                debug!("📤 {} 的快照已上传 ({:?})", actor.name, reason);
                Ok(SyncOutcome::Pushed(Box::new(snapshot)))
            }
            Err(e) => {
                self.events.emit(SyncEvent::SnapshotFailed {
                    actor: actor.id,
                    reason: e.to_string(),
                    timestamp: self.clock.now_millis(),
                });
                Err(e)
            }
        }
    }

    pub fn last_sync_location(&self, actor: ActorId) -> Option<Location> {
        self.sync_locations.read().get(&actor).cloned()
    }

    // ========== 游戏事件 ==========

    /// 在独立任务中处理事件
    pub fn dispatch(self: &Arc<Self>, event: GameEvent) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let name = event.name();
            if let Err(e) = service.handle_event(event).await {
                warn!("⚠️ 处理游戏事件 {} 失败: {}", name, e);
            }
        })
    }

    pub async fn handle_event(&self, event: GameEvent) -> Result<()> {
        let actor = event.actor().clone();
        if !self.links.is_linked(actor.id).await {
            return Ok(());
        }
        let sync = &self.config.sync;

        match event {
            GameEvent::WorldChanged { .. } => {
                if sync.sync_on_world_change {
                    self.event_sync(&actor, "world_change").await;
                }
            }
            GameEvent::Teleported { .. } => {
                self.event_sync(&actor, "teleport").await;
            }
            GameEvent::Moved { to, .. } => {
                if sync.sync_on_distance && self.moved_far_enough(actor.id, &to) {
                    self.event_sync(&actor, "distance").await;
                }
            }
            GameEvent::Died { deaths, .. } => {
                if sync.sync_on_death {
                    self.event_sync(&actor, "death").await;
                }
                self.notify_lightweight(&actor, &[("deaths", json!(deaths))]).await;
            }
            GameEvent::AdvancementDone { key, .. } => {
                if sync.sync_on_advancement {
                    self.event_sync(&actor, "advancement").await;
                }
                // 配方解锁也算进度，但不值得通知
                if !key.starts_with("recipes/") {
                    self.notify_lightweight(&actor, &[("achievement", json!(key))]).await;
                }
            }
            GameEvent::LevelChanged { level, .. } => {
                self.notify_lightweight(&actor, &[("level", json!(level))]).await;
            }
            GameEvent::ExperienceChanged { total, progress, .. } => {
                self.notify_lightweight(
                    &actor,
                    &[("total_experience", json!(total)), ("experience", json!(progress))],
                )
                .await;
            }
            GameEvent::GameModeChanged { mode, .. } => {
                self.notify_lightweight(&actor, &[("gamemode", json!(mode))]).await;
            }
            GameEvent::MobKilled { total, .. } => {
                self.notify_lightweight(&actor, &[("mobs_killed", json!(total))]).await;
            }
            GameEvent::BlockMined { total, .. } => {
                self.notify_lightweight(&actor, &[("blocks_mined", json!(total))]).await;
            }
            GameEvent::EconomyCommand { .. } => {
                let outcome = self.monitor.poll_actor(&actor).await?;
                if let PollOutcome::Changed { diff, notified } = outcome {
                    debug!("💰 {} 经济命令后余额变化 {:.2} (通知: {})", actor.name, diff, notified);
                }
            }
        }
        Ok(())
    }

    fn moved_far_enough(&self, actor: ActorId, to: &Location) -> bool {
        match self.sync_locations.read().get(&actor) {
            None => true,
            Some(last) => to
                .distance_to(last)
                .map_or(true, |distance| distance >= self.config.sync.sync_distance),
        }
    }

    async fn event_sync(&self, actor: &ActorProfile, trigger: &'static str) {
        match self.sync_actor(actor, SyncReason::Event(trigger)).await {
            Ok(SyncOutcome::CoolingDown) => debug!("{} 的 {} 同步在冷却中，跳过", actor.name, trigger),
            Ok(_) => {}
            Err(e) => warn!("⚠️ {} 的 {} 同步失败: {}", actor.name, trigger, e),
        }
    }

    /// 冷却允许时发送一组字段变化通知
    async fn notify_lightweight(&self, actor: &ActorProfile, changes: &[(&str, Value)]) -> bool {
        if !self.scheduler.try_acquire(actor.id, Cadence::Lightweight) {
            return false;
        }
        for (category, value) in changes {
            if let Err(e) = self.backend.notify_change(actor, category, value.clone()).await {
                debug!("{} 的 {} 通知失败（忽略）: {}", actor.name, category, e);
            }
        }
        true
    }

    // ========== 绑定 ==========

    async fn set_link(&self, actor: ActorId, linked: bool) -> bool {
        let changed = if linked {
            self.links.set_linked(actor, true).await
        } else {
            self.links.clear_link(actor).await
        };
        if changed {
            self.events.emit(SyncEvent::LinkStateChanged {
                actor,
                linked,
                timestamp: self.clock.now_millis(),
            });
        }
        changed
    }

    /// 用绑定码完成绑定
    ///
    /// 先清除本地状态，只有远端确认后才标记为已绑定。
    pub async fn complete_link(self: &Arc<Self>, actor: &ActorProfile, code: &str) -> Result<bool> {
        let code = code.trim();
        if code.is_empty() {
            return Err(StateLinkError::InvalidData("绑定码不能为空".to_string()));
        }

        self.set_link(actor.id, false).await;
        match self.backend.verify_link_code(actor, code).await {
            Ok(true) => {
                self.set_link(actor.id, true).await;
                info!("🔗 {} 绑定成功", actor.name);
                if let Err(e) = self.backend.notify_refresh(actor).await {
                    debug!("绑定后的刷新通知失败（忽略）: {}: {}", actor.name, e);
                }
                self.start_actor_sync(actor, SyncReason::Linked).await;
                Ok(true)
            }
            Ok(false) => {
                info!("{} 的绑定码无效", actor.name);
                Ok(false)
            }
            Err(e) => {
                warn!("⚠️ {} 绑定验证失败，保持未绑定: {}", actor.name, e);
                Err(e)
            }
        }
    }

    /// 解绑；本地总会解绑，远端结果原样返回
    pub async fn unlink(&self, actor: &ActorProfile) -> Result<UnlinkOutcome> {
        self.stop_actor_task(actor.id);

        let result = self.backend.unlink(actor).await;
        self.set_link(actor.id, false).await;
        match &result {
            Ok(outcome) => info!("🔓 {} 已解绑 ({:?})", actor.name, outcome),
            Err(e) if e.is_transient() => {
                warn!("⚠️ 远端解绑未确认（已在本地解绑）: {}: {}", actor.name, e)
            }
            Err(e) => warn!("⚠️ 远端拒绝解绑（已在本地解绑）: {}: {}", actor.name, e),
        }
        result
    }

    /// 向远端确认绑定状态并修正本地缓存
    pub async fn reconcile_link(&self, actor: &ActorProfile) -> Result<bool> {
        match self.backend.check_link_status(actor).await {
            Ok(linked) => {
                if self.set_link(actor.id, linked).await {
                    info!("🔄 {} 的绑定状态已按远端修正为 {}", actor.name, linked);
                }
                Ok(linked)
            }
            Err(e) if e.is_rejection() => {
                self.set_link(actor.id, false).await;
                Err(e)
            }
            Err(e) => {
                debug!("绑定状态查询失败，保留本地缓存: {}", e);
                Err(e)
            }
        }
    }

    // ========== 批量同步与排行榜 ==========

    fn spawn_batch_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let sync = &self.config.sync;
        let initial_delay = Duration::from_secs(sync.batch_initial_delay_secs);
        let interval = sync.effective_batch_interval();
        let step = sync.effective_batch_step();
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(service) = weak.upgrade() else { break };
                let report = service.run_batch(step).await;
                debug!("批量同步完成: {:?}", report);
            }
        })
    }

    /// 逐个同步当前在线玩家，结束后与定时评估按同一口径（全部在线玩家）评估排行榜
    pub async fn run_batch(&self, step: Duration) -> BatchReport {
        let mut cursor = BatchCursor::new(self.game.online_actors());
        let mut report = BatchReport {
            actors: cursor.len(),
            ..Default::default()
        };
        let mut snapshots = Vec::with_capacity(cursor.len());

        loop {
            let (next, done) = cursor.advance();
            if let Some(actor) = next.filter(|actor| self.game.is_online(actor.id)) {
                match self.sync_actor(&actor, SyncReason::Batch).await {
                    Ok(SyncOutcome::Pushed(snapshot)) => {
                        report.pushed += 1;
                        snapshots.push(*snapshot);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        report.failed += 1;
                        debug!("批量同步 {} 失败: {}", actor.name, e);
                    }
                }
            }
            if done {
                break;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    report.cancelled = true;
                    return report;
                }
                _ = tokio::time::sleep(step) => {}
            }
        }

        if self.config.leaderboard.enabled {
            let population = self.leaderboard_population(snapshots);
            report.leaderboard_events = self.leaderboard.evaluate(&population).await.len();
        }
        report
    }

    fn spawn_leaderboard_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.leaderboard.effective_interval();
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(service) = weak.upgrade() else { break };
                service.evaluate_leaderboard().await;
            }
        })
    }

    /// 采集所有在线玩家的快照（不上传）并评估排行榜
    pub async fn evaluate_leaderboard(&self) -> Vec<LeaderboardEvent> {
        let population = self.leaderboard_population(Vec::new());
        self.leaderboard.evaluate(&population).await
    }

    /// 排行榜总是对全部在线玩家排名：复用已有快照，其余现场采集
    fn leaderboard_population(&self, mut snapshots: Vec<StateSnapshot>) -> Vec<StateSnapshot> {
        snapshots.retain(|snapshot| self.game.is_online(snapshot.actor_id()));
        let covered: HashSet<ActorId> = snapshots.iter().map(|s| s.actor_id()).collect();

        for actor in self.game.online_actors() {
            if covered.contains(&actor.id) {
                continue;
            }
            match self.collector.collect(&actor) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => debug!("排行榜采集 {} 失败: {}", actor.name, e),
            }
        }
        snapshots
    }
}

/// 同步服务构建器
pub struct SyncServiceBuilder {
    config: StateLinkConfig,
    game: Option<Arc<dyn GameStateProvider>>,
    capabilities: Capabilities,
    backend: Option<Arc<dyn SyncBackend>>,
    link_backend: Option<Arc<dyn LinkStateBackend>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SyncServiceBuilder {
    pub fn new(config: StateLinkConfig) -> Self {
        Self {
            config,
            game: None,
            capabilities: Capabilities::default(),
            backend: None,
            link_backend: None,
            clock: None,
        }
    }

    pub fn game(mut self, game: Arc<dyn GameStateProvider>) -> Self {
        self.game = Some(game);
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// 替换默认的 HTTP 远端实现
    pub fn backend(mut self, backend: Arc<dyn SyncBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 替换默认的 sled 绑定状态存储
    pub fn link_backend(mut self, backend: Arc<dyn LinkStateBackend>) -> Self {
        self.link_backend = Some(backend);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub async fn build(self) -> Result<Arc<SyncService>> {
        info!("正在初始化同步服务...");
        let config = self.config;
        config.validate()?;

        let game = self
            .game
            .ok_or_else(|| StateLinkError::Config("缺少 GameStateProvider".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        // === 第1层：本地存储 ===
        let kv = KvStore::new(&config.data_dir).await?;
        let link_backend = self
            .link_backend
            .unwrap_or_else(|| Arc::new(SledLinkBackend::new(kv.clone())));
        let links = LinkStateStore::new(link_backend, clock.clone());
        if let Err(e) = links.load_from_disk().await {
            warn!("⚠️ 绑定状态加载失败，将按需从磁盘读取: {}", e);
        }
        let links = Arc::new(links);

        // === 第2层：远端 ===
        let backend: Arc<dyn SyncBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(RemoteSyncClient::new(
                &config.api,
                &config.http_client_config,
                clock.clone(),
            )?),
        };

        // === 第3层：采集、调度、事件 ===
        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let ledger = Arc::new(ResourceLedger::new());
        let economy = self.capabilities.economy.clone();
        let collector = Arc::new(SnapshotCollector::new(
            game.clone(),
            self.capabilities,
            ledger.clone(),
            config.tracking.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(&config.sync, clock.clone()));

        // === 第4层：余额监控与排行榜 ===
        let monitor = Arc::new(ResourceDeltaMonitor::new(
            config.economy.clone(),
            ledger,
            links.clone(),
            game.clone(),
            economy,
            collector.clone(),
            backend.clone(),
            scheduler.clone(),
            events.clone(),
            clock.clone(),
        )?);
        let leaderboard =
            Arc::new(LeaderboardTracker::load(kv.clone(), events.clone(), clock.clone()).await);

        let mut sessions = SessionManager::new();
        sessions.register_hook(scheduler.clone());
        sessions.register_hook(monitor.clone());

        info!("✅ 同步服务初始化完成: {}", config.data_dir.display());
        Ok(Arc::new(SyncService {
            config,
            clock,
            kv,
            game,
            links,
            collector,
            scheduler,
            backend,
            monitor,
            leaderboard,
            events,
            sessions,
            actor_tasks: Mutex::new(HashMap::new()),
            task_generation: AtomicU64::new(0),
            sync_locations: RwLock::new(HashMap::new()),
            background: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }))
    }
}
