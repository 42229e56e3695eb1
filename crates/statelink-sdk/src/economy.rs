//! 余额变化监控
//!
//! 按固定间隔轮询在线且已绑定玩家的余额：
//! - 每次轮询都更新当日收入/支出累计，累计不受通知阈值影响
//! - 变化量达到阈值且距上次通知足够久时，发送实时通知并上传全量快照
//! - 每日在配置时区的本地午夜清零累计，由自我续期的一次性定时器驱动
//! - 单个玩家的失败只记录日志，不影响其他玩家

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::SnapshotCollector;
use crate::config::EconomyConfig;
use crate::error::{Result, StateLinkError};
use crate::events::{EventManager, SyncEvent};
use crate::link_state::LinkStateStore;
use crate::providers::{EconomyProvider, GameStateProvider};
use crate::remote::SyncBackend;
use crate::scheduler::{Cadence, SyncScheduler};
use crate::session::SessionHook;
use crate::snapshot::{ActorId, ActorProfile};
use crate::utils::{Clock, TimeFormatter};

/// 单个玩家的余额观测
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceObservation {
    pub last_known_value: f64,
    pub earned_today: f64,
    pub spent_today: f64,
    /// 上次通知远端的时间（UTC 毫秒）
    pub last_notified_at: Option<i64>,
}

/// 观测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Unobserved,
    Tracking,
}

/// 一次观测的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observed {
    pub previous: Option<f64>,
    pub current: f64,
    /// |current - previous|，首次观测为 0
    pub diff: f64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    observations: HashMap<ActorId, ResourceObservation>,
    /// 当前统计所属的日历日
    day: Option<NaiveDate>,
}

/// 余额台账，由监控写入、快照采集器读取
#[derive(Debug, Default)]
pub struct ResourceLedger {
    inner: RwLock<LedgerInner>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置起始日历日（仅在尚未设置时生效）
    pub fn begin_day(&self, day: NaiveDate) {
        self.inner.write().day.get_or_insert(day);
    }

    pub fn current_day(&self) -> Option<NaiveDate> {
        self.inner.read().day
    }

    /// 记录一次读数并按变化方向累计收支
    pub fn observe(&self, actor: ActorId, current: f64) -> Observed {
        let mut inner = self.inner.write();
        match inner.observations.get_mut(&actor) {
            None => {
                inner.observations.insert(
                    actor,
                    ResourceObservation {
                        last_known_value: current,
                        ..Default::default()
                    },
                );
                Observed { previous: None, current, diff: 0.0 }
            }
            Some(observation) => {
                let previous = observation.last_known_value;
                let delta = current - previous;
                if delta > 0.0 {
                    observation.earned_today += delta;
                } else if delta < 0.0 {
                    observation.spent_today += -delta;
                }
                observation.last_known_value = current;
                Observed {
                    previous: Some(previous),
                    current,
                    diff: delta.abs(),
                }
            }
        }
    }

    /// 判断是否应通知，是则同时记录通知时间
    pub fn claim_notification(
        &self,
        actor: ActorId,
        diff: f64,
        now: i64,
        min_change: f64,
        min_interval_ms: i64,
    ) -> bool {
        if diff < min_change {
            return false;
        }
        let mut inner = self.inner.write();
        let Some(observation) = inner.observations.get_mut(&actor) else {
            return false;
        };
        let interval_ok = observation
            .last_notified_at
            .map_or(true, |last| now.saturating_sub(last) >= min_interval_ms);
        if interval_ok {
            observation.last_notified_at = Some(now);
        }
        interval_ok
    }

    /// 当日（收入, 支出）
    pub fn daily_totals(&self, actor: ActorId) -> Option<(f64, f64)> {
        self.inner
            .read()
            .observations
            .get(&actor)
            .map(|o| (o.earned_today, o.spent_today))
    }

    pub fn observation(&self, actor: ActorId) -> Option<ResourceObservation> {
        self.inner.read().observations.get(&actor).cloned()
    }

    pub fn state_of(&self, actor: ActorId) -> TrackingState {
        if self.inner.read().observations.contains_key(&actor) {
            TrackingState::Tracking
        } else {
            TrackingState::Unobserved
        }
    }

    /// 进入新的日历日时清零所有累计，同一天只生效一次
    pub fn reset_daily(&self, day: NaiveDate) -> bool {
        let mut inner = self.inner.write();
        match inner.day {
            Some(current) if current >= day => return false,
            None => {
                inner.day = Some(day);
                return false;
            }
            Some(_) => {}
        }
        inner.day = Some(day);
        for observation in inner.observations.values_mut() {
            observation.earned_today = 0.0;
            observation.spent_today = 0.0;
        }
        true
    }

    pub fn forget(&self, actor: ActorId) {
        self.inner.write().observations.remove(&actor);
    }

    pub fn tracked_actors(&self) -> usize {
        self.inner.read().observations.len()
    }
}

/// 单个玩家一次轮询的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    NotLinked,
    FirstObservation,
    Unchanged,
    Changed { diff: f64, notified: bool },
}

/// 一轮轮询的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polled: usize,
    pub changed: usize,
    pub notified: usize,
    pub failed: usize,
}

/// 余额变化监控
pub struct ResourceDeltaMonitor {
    config: EconomyConfig,
    timezone: Tz,
    ledger: Arc<ResourceLedger>,
    links: Arc<LinkStateStore>,
    game: Arc<dyn GameStateProvider>,
    economy: Arc<dyn EconomyProvider>,
    collector: Arc<SnapshotCollector>,
    backend: Arc<dyn SyncBackend>,
    scheduler: Arc<SyncScheduler>,
    events: Arc<EventManager>,
    clock: Arc<dyn Clock>,
}

impl ResourceDeltaMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EconomyConfig,
        ledger: Arc<ResourceLedger>,
        links: Arc<LinkStateStore>,
        game: Arc<dyn GameStateProvider>,
        economy: Arc<dyn EconomyProvider>,
        collector: Arc<SnapshotCollector>,
        backend: Arc<dyn SyncBackend>,
        scheduler: Arc<SyncScheduler>,
        events: Arc<EventManager>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let timezone = config.timezone()?;
        ledger.begin_day(TimeFormatter::local_day(clock.now_utc(), timezone));
        Ok(Self {
            config,
            timezone,
            ledger,
            links,
            game,
            economy,
            collector,
            backend,
            scheduler,
            events,
            clock,
        })
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.economy.is_available()
    }

    /// 轮询所有在线玩家一次
    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();
        if !self.is_enabled() {
            return report;
        }

        // 午夜定时器错过时（例如进程挂起），由轮询补上日切
        let today = TimeFormatter::local_day(self.clock.now_utc(), self.timezone);
        self.reset_daily(today);

        let actors = self.game.online_actors();
        let results = join_all(actors.iter().map(|actor| self.poll_actor(actor))).await;

        for (actor, result) in actors.iter().zip(results) {
            match result {
                Ok(PollOutcome::NotLinked) => {}
                Ok(outcome) => {
                    report.polled += 1;
                    if let PollOutcome::Changed { notified, .. } = outcome {
                        report.changed += 1;
                        if notified {
                            report.notified += 1;
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("⚠️ 轮询 {} 的余额失败: {}", actor.name, e);
                }
            }
        }

        report
    }

    /// 轮询单个玩家；也用于经济命令之后的即时检查
    pub async fn poll_actor(&self, actor: &ActorProfile) -> Result<PollOutcome> {
        if !self.links.is_linked(actor.id).await {
            return Ok(PollOutcome::NotLinked);
        }

        let current = self.economy.balance(actor.id)?;
        if !current.is_finite() {
            return Err(StateLinkError::InvalidData(format!("余额不是有限数: {}", current)));
        }

        let observed = self.ledger.observe(actor.id, current);
        let Some(previous) = observed.previous else {
            return Ok(PollOutcome::FirstObservation);
        };
        if observed.diff == 0.0 {
            return Ok(PollOutcome::Unchanged);
        }

        let now = self.clock.now_millis();
        let min_interval_ms = self.config.effective_min_notify_interval().as_millis() as i64;
        let notified = self.ledger.claim_notification(
            actor.id,
            observed.diff,
            now,
            self.config.min_balance_change,
            min_interval_ms,
        );

        self.events.emit(SyncEvent::BalanceChanged {
            actor: actor.id,
            previous,
            current,
            notified,
            timestamp: now,
        });

        if notified {
            debug!("💰 {} 余额 {:.2} -> {:.2}，通知远端", actor.name, previous, current);
            self.notify_remote(actor, current).await;
        }

        Ok(PollOutcome::Changed {
            diff: observed.diff,
            notified,
        })
    }

    async fn notify_remote(&self, actor: &ActorProfile, balance: f64) {
        if let Err(e) = self.backend.notify_change(actor, "balance", json!(balance)).await {
            debug!("余额实时通知失败（忽略）: {}: {}", actor.name, e);
        }

        let snapshot = match self.collector.collect(actor) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("⚠️ 采集 {} 的快照失败: {}", actor.name, e);
                return;
            }
        };

        self.scheduler.mark_synced(actor.id, Cadence::Full);
        match self.backend.push_snapshot(snapshot).await {
            Ok(()) => {
                self.links.touch_sync_time(actor.id).await;
                self.events.emit(SyncEvent::SnapshotPushed {
                    actor: actor.id,
                    timestamp: self.clock.now_millis(),
                });
            }
            Err(e) => {
                self.events.emit(SyncEvent::SnapshotFailed {
                    actor: actor.id,
                    reason: e.to_string(),
                    timestamp: self.clock.now_millis(),
                });
            }
        }
    }

    /// 日切清零，返回是否真正发生了清零
    pub fn reset_daily(&self, day: NaiveDate) -> bool {
        if !self.ledger.reset_daily(day) {
            return false;
        }
        let actors = self.ledger.tracked_actors();
        info!("🌙 每日收支统计已清零: {} ({} 名玩家)", day, actors);
        self.events.emit(SyncEvent::DailyTotalsReset {
            day,
            actors,
            timestamp: self.clock.now_millis(),
        });
        true
    }

    /// 启动轮询循环和午夜重置循环
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        if !self.is_enabled() {
            info!("余额监控未启用（配置关闭或没有经济插件）");
            return Vec::new();
        }

        let poll_interval = self.config.effective_poll_interval();
        info!("✅ 余额监控已启动: 每 {:?} 轮询一次", poll_interval);

        let poller = {
            let monitor = Arc::clone(self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let report = monitor.poll_once().await;
                            if report.changed > 0 || report.failed > 0 {
                                debug!("余额轮询: {:?}", report);
                            }
                        }
                    }
                }
            })
        };

        let resetter = {
            let monitor = Arc::clone(self);
            tokio::spawn(async move { monitor.run_daily_reset(shutdown).await })
        };

        vec![poller, resetter]
    }

    /// 每次只等到下一个本地午夜，触发后重新计算下一次
    async fn run_daily_reset(&self, shutdown: CancellationToken) {
        let mut fired: Option<DateTime<Utc>> = None;
        loop {
            // 墙钟可能略慢于定时器，不能早于上一次触发的午夜
            let now = match fired {
                Some(boundary) => self.clock.now_utc().max(boundary),
                None => self.clock.now_utc(),
            };
            let next = TimeFormatter::next_local_midnight(now, self.timezone);
            let wait = TimeFormatter::duration_until(now, next);
            debug!("下一次日切: {} (等待 {:?})", next, wait);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            self.reset_daily(TimeFormatter::local_day(next, self.timezone));
            fired = Some(next);
        }
    }
}

#[async_trait]
impl SessionHook for ResourceDeltaMonitor {
    async fn on_session_start(&self, _actor: &ActorProfile) -> Result<()> {
        Ok(())
    }

    async fn on_session_end(&self, actor: &ActorProfile) -> Result<()> {
        self.ledger.forget(actor.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::TimeZone;
    use std::time::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_ledger_accumulates_by_sign_and_never_decreases() {
        let ledger = ResourceLedger::new();
        ledger.begin_day(day(1));
        let actor = ActorId::random();

        assert_eq!(ledger.state_of(actor), TrackingState::Unobserved);
        let first = ledger.observe(actor, 100.0);
        assert_eq!(first.previous, None);
        assert_eq!(ledger.state_of(actor), TrackingState::Tracking);

        let mut last = (0.0, 0.0);
        for value in [150.0, 120.0, 120.0, 119.5, 300.0, 10.0] {
            ledger.observe(actor, value);
            let totals = ledger.daily_totals(actor).unwrap();
            assert!(totals.0 >= last.0 && totals.1 >= last.1);
            last = totals;
        }
        assert_eq!(last, (230.5, 320.5));
    }

    #[test]
    fn test_reset_happens_exactly_once_per_boundary() {
        let ledger = ResourceLedger::new();
        ledger.begin_day(day(1));
        let actor = ActorId::random();
        ledger.observe(actor, 10.0);
        ledger.observe(actor, 50.0);

        assert!(!ledger.reset_daily(day(1)));
        assert_eq!(ledger.daily_totals(actor), Some((40.0, 0.0)));

        assert!(ledger.reset_daily(day(2)));
        assert_eq!(ledger.daily_totals(actor), Some((0.0, 0.0)));
        // 最后读数保留，下一次变化仍能算出差值
        assert_eq!(ledger.observation(actor).unwrap().last_known_value, 50.0);

        ledger.observe(actor, 45.0);
        assert!(!ledger.reset_daily(day(2)));
        assert_eq!(ledger.daily_totals(actor), Some((0.0, 5.0)));
    }

    #[test]
    fn test_claim_notification_respects_both_thresholds() {
        let ledger = ResourceLedger::new();
        let actor = ActorId::random();
        ledger.observe(actor, 0.0);

        assert!(!ledger.claim_notification(actor, 0.5, 0, 1.0, 10_000));
        assert!(ledger.claim_notification(actor, 5.0, 0, 1.0, 10_000));
        assert!(!ledger.claim_notification(actor, 5.0, 9_999, 1.0, 10_000));
        assert!(ledger.claim_notification(actor, 5.0, 10_000, 1.0, 10_000));
    }

    #[tokio::test]
    async fn test_poll_notifies_only_above_threshold() {
        let harness = Harness::new().await;
        let actor = harness.online_linked("Alex", 100.0).await;
        let monitor = harness.monitor();

        // 首次观测只建立基线
        assert_eq!(monitor.poll_actor(&actor).await.unwrap(), PollOutcome::FirstObservation);

        harness.economy.set_balance(actor.id, 100.5);
        let outcome = monitor.poll_actor(&actor).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Changed { notified: false, .. }));
        assert_eq!(harness.backend.notifications().len(), 0);

        harness.economy.set_balance(actor.id, 150.0);
        let outcome = monitor.poll_actor(&actor).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Changed { notified: true, .. }));
        assert_eq!(harness.backend.notifications().len(), 1);
        assert_eq!(harness.backend.pushes().len(), 1);

        // 通知间隔内的再次变化只记账
        harness.economy.set_balance(actor.id, 10.0);
        let outcome = monitor.poll_actor(&actor).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Changed { notified: false, .. }));
        assert_eq!(harness.backend.notifications().len(), 1);
        assert_eq!(monitor.ledger().daily_totals(actor.id), Some((50.0, 140.0)));

        harness.clock.advance(Duration::from_secs(11));
        harness.economy.set_balance(actor.id, 20.0);
        let outcome = monitor.poll_actor(&actor).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Changed { notified: true, .. }));
        assert_eq!(harness.backend.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_one_failing_actor_does_not_block_others() {
        let harness = Harness::new().await;
        let healthy = harness.online_linked("Alex", 10.0).await;
        let broken = harness.online_linked("Steve", 10.0).await;
        let unlinked = harness.online("Guest", 10.0);
        let monitor = harness.monitor();

        monitor.poll_once().await;
        harness.economy.set_balance(healthy.id, 500.0);
        harness.economy.fail_for(broken.id);

        let report = monitor.poll_once().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.polled, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(monitor.ledger().state_of(unlinked.id), TrackingState::Unobserved);
    }

    #[tokio::test]
    async fn test_poll_skipped_without_economy_provider() {
        let harness = Harness::without_economy().await;
        let monitor = harness.monitor();
        assert!(!monitor.is_enabled());
        assert_eq!(monitor.poll_once().await, PollReport::default());
    }

    #[tokio::test]
    async fn test_poll_rolls_day_when_timer_missed() {
        let harness = Harness::new().await;
        let actor = harness.online_linked("Alex", 10.0).await;
        let monitor = harness.monitor();
        let mut events = harness.events.subscribe();

        monitor.poll_once().await;
        harness.economy.set_balance(actor.id, 30.0);
        monitor.poll_once().await;
        assert_eq!(monitor.ledger().daily_totals(actor.id), Some((20.0, 0.0)));

        harness.clock.advance(Duration::from_secs(24 * 3600));
        monitor.poll_once().await;
        assert_eq!(monitor.ledger().daily_totals(actor.id), Some((0.0, 0.0)));

        let mut resets = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::DailyTotalsReset { .. }) {
                resets += 1;
            }
        }
        assert_eq!(resets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_midnight_timer_resets_once_per_boundary() {
        let harness = Harness::new().await;
        // 伦敦夏令时 23:59:00
        harness.clock.set(Utc.with_ymd_and_hms(2024, 5, 1, 22, 59, 0).unwrap());
        let actor = harness.online_linked("Alex", 10.0).await;
        let monitor = harness.monitor();
        let mut events = harness.events.subscribe();

        monitor.poll_once().await;
        harness.economy.set_balance(actor.id, 30.0);
        monitor.poll_once().await;
        assert_eq!(monitor.ledger().daily_totals(actor.id), Some((20.0, 0.0)));

        let shutdown = CancellationToken::new();
        let handles = monitor.spawn(shutdown.clone());
        assert_eq!(handles.len(), 2);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(monitor.ledger().current_day(), Some(day(2)));
        assert_eq!(monitor.ledger().daily_totals(actor.id), Some((0.0, 0.0)));

        harness.clock.advance(Duration::from_secs(61));
        harness.economy.set_balance(actor.id, 25.0);
        monitor.poll_once().await;
        assert_eq!(monitor.ledger().daily_totals(actor.id), Some((0.0, 5.0)));

        // 定时器自行排到下一个午夜
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert_eq!(monitor.ledger().current_day(), Some(day(3)));
        assert_eq!(monitor.ledger().daily_totals(actor.id), Some((0.0, 0.0)));

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut resets = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::DailyTotalsReset { day, .. } = event {
                resets.push(day);
            }
        }
        assert_eq!(resets, vec![day(2), day(3)]);
    }

    #[tokio::test]
    async fn test_session_end_forgets_observation() {
        let harness = Harness::new().await;
        let actor = harness.online_linked("Alex", 10.0).await;
        let monitor = harness.monitor();
        monitor.poll_once().await;
        assert_eq!(monitor.ledger().state_of(actor.id), TrackingState::Tracking);

        monitor.on_session_end(&actor).await.unwrap();
        assert_eq!(monitor.ledger().state_of(actor.id), TrackingState::Unobserved);
    }
}
