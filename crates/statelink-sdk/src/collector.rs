//! 快照采集
//!
//! 从游戏状态访问器和可选能力插件拉取数据，组装成一份 [`StateSnapshot`]。
//! 单个访问器失败时记录日志并使用默认值，快照照常生成。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::TrackingConfig;
use crate::economy::ResourceLedger;
use crate::error::{Result, StateLinkError};
use crate::providers::{Capabilities, GameStateProvider};
use crate::snapshot::{
    ActorProfile, EconomyData, PermissionData, SkillData, SnapshotBuilder, StateSnapshot,
};
use crate::utils::Clock;

const DEFAULT_GAME_MODE: &str = "SURVIVAL";

pub struct SnapshotCollector {
    game: Arc<dyn GameStateProvider>,
    capabilities: Capabilities,
    ledger: Arc<ResourceLedger>,
    tracking: TrackingConfig,
    clock: Arc<dyn Clock>,
}

impl SnapshotCollector {
    pub fn new(
        game: Arc<dyn GameStateProvider>,
        capabilities: Capabilities,
        ledger: Arc<ResourceLedger>,
        tracking: TrackingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            game,
            capabilities,
            ledger,
            tracking,
            clock,
        }
    }

    pub fn tracking(&self) -> &TrackingConfig {
        &self.tracking
    }

    /// 采集一名在线玩家的完整快照
    ///
    /// 只有玩家不在线时返回 `NotFound`。
    pub fn collect(&self, actor: &ActorProfile) -> Result<StateSnapshot> {
        if !self.game.is_online(actor.id) {
            return Err(StateLinkError::NotFound(format!("{} 不在线", actor.name)));
        }

        let id = actor.id;
        let mut builder = StateSnapshot::builder(actor.clone(), self.clock.now_millis())
            .online(true)
            .game_mode(
                self.game
                    .game_mode(id)
                    .unwrap_or_else(|e| fallback(actor, "game_mode", e, DEFAULT_GAME_MODE.to_string())),
            )
            .location(or_default(actor, "location", self.game.location(id)))
            .vitals(or_default(actor, "vitals", self.game.vitals(id)))
            .experience(or_default(actor, "experience", self.game.experience(id)));

        if self.tracking.inventory {
            builder = builder.inventory(or_default(actor, "inventory", self.game.inventory(id)));
        }
        if self.tracking.statistics {
            builder = builder.statistics(or_default(actor, "statistics", self.game.statistics(id)));
        }
        if self.tracking.advancements {
            builder = builder.advancements(or_default(actor, "advancements", self.game.advancements(id)));
        }
        if self.tracking.playtime {
            builder = builder.playtime_minutes(or_default(actor, "playtime", self.game.playtime_minutes(id)));
        }

        builder = self.collect_economy(actor, builder);
        builder = self.collect_permissions(actor, builder);
        builder = self.collect_skills(actor, builder);

        let snapshot = builder.build();
        debug!(
            "📸 已采集 {} 的快照: {} 个类别",
            actor.name,
            snapshot.change_fingerprint().len()
        );
        Ok(snapshot)
    }

    fn collect_economy(&self, actor: &ActorProfile, builder: SnapshotBuilder) -> SnapshotBuilder {
        let economy = &self.capabilities.economy;
        if !self.tracking.economy || !economy.is_available() {
            return builder;
        }
        let balance = or_default(actor, "balance", economy.balance(actor.id));
        let (earned_today, spent_today) = self.ledger.daily_totals(actor.id).unwrap_or_default();
        builder.economy(EconomyData {
            balance,
            earned_today,
            spent_today,
        })
    }

    fn collect_permissions(&self, actor: &ActorProfile, builder: SnapshotBuilder) -> SnapshotBuilder {
        if !self.tracking.permissions {
            return builder;
        }
        let permissions = &self.capabilities.permissions;
        if !permissions.is_available() {
            return builder.permissions(PermissionData::default());
        }
        let defaults = PermissionData::default();
        builder.permissions(PermissionData {
            primary_group: permissions
                .primary_group(actor.id)
                .unwrap_or_else(|e| fallback(actor, "primary_group", e, defaults.primary_group)),
            groups: or_default(actor, "groups", permissions.groups(actor.id)),
        })
    }

    fn collect_skills(&self, actor: &ActorProfile, builder: SnapshotBuilder) -> SnapshotBuilder {
        let skills = &self.capabilities.skills;
        if !self.tracking.skills || !skills.is_available() {
            return builder;
        }
        builder.skills(SkillData {
            levels: or_default(actor, "skills", skills.skills(actor.id)),
        })
    }
}

fn or_default<T: Default>(actor: &ActorProfile, what: &str, result: Result<T>) -> T {
    result.unwrap_or_else(|e| fallback(actor, what, e, T::default()))
}

fn fallback<T>(actor: &ActorProfile, what: &str, error: StateLinkError, default: T) -> T {
    warn!("⚠️ 读取 {} 的 {} 失败，使用默认值: {}", actor.name, what, error);
    default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{stat_keys, Category, Location, Statistics};
    use crate::test_support::{FakeSkills, Harness};
    use std::time::Duration;

    #[tokio::test]
    async fn test_offline_actor_is_not_found() {
        let harness = Harness::new().await;
        let actor = harness.online("Alex", 0.0);
        harness.game.leave(actor.id);

        let err = harness.collector.collect(&actor).unwrap_err();
        assert!(matches!(err, StateLinkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_every_category_is_stamped_with_collection_time() {
        let harness = Harness::new().await;
        let actor = harness.online("Alex", 42.0);

        let snapshot = harness.collector.collect(&actor).unwrap();
        let now = harness.clock.now_millis();
        // 没有技能插件时不采集技能
        assert_eq!(snapshot.change_fingerprint().len(), Category::ALL.len() - 1);
        assert!(snapshot.skills().is_none());
        for category in snapshot.change_fingerprint().keys() {
            assert_eq!(snapshot.last_updated().get(category), Some(&now));
        }
        assert_eq!(snapshot.economy().map(|e| e.balance), Some(42.0));
        assert_eq!(snapshot.permissions().map(|p| p.primary_group.as_str()), Some("default"));
    }

    #[tokio::test]
    async fn test_failing_accessor_substitutes_default() {
        let harness = Harness::new().await;
        let actor = harness.online("Alex", 10.0);
        harness.game.update(actor.id, |a| {
            a.statistics = Statistics::default().with(stat_keys::DEATHS, 3);
            a.location = Location::new("nether", 10.0, 70.0, 10.0);
        });
        harness.game.fail(actor.id, "location");
        harness.economy.fail_for(actor.id);

        let snapshot = harness.collector.collect(&actor).unwrap();
        assert_eq!(snapshot.location(), Some(&Location::default()));
        assert_eq!(snapshot.economy().map(|e| e.balance), Some(0.0));
        assert_eq!(snapshot.statistics().map(|s| s.get(stat_keys::DEATHS)), Some(3));
        assert!(snapshot.fingerprint_of(Category::Location).is_some());
    }

    #[tokio::test]
    async fn test_economy_fingerprint_tracks_balance_change() {
        let harness = Harness::new().await;
        let actor = harness.online("Alex", 100.0);
        assert!(!harness.links.is_linked(actor.id).await);
        harness.links.set_linked(actor.id, true).await;
        assert!(harness.links.is_linked(actor.id).await);

        let before = harness.collector.collect(&actor).unwrap();
        harness.clock.advance(Duration::from_secs(5));
        let unchanged = harness.collector.collect(&actor).unwrap();
        harness.economy.set_balance(actor.id, 100.0 + harness.economy_config.min_balance_change + 1.0);
        let after = harness.collector.collect(&actor).unwrap();

        assert_eq!(
            before.fingerprint_of(Category::Economy),
            unchanged.fingerprint_of(Category::Economy)
        );
        assert_ne!(
            before.fingerprint_of(Category::Economy),
            after.fingerprint_of(Category::Economy)
        );
        assert_eq!(after.changed_categories(&before), vec![Category::Economy]);
        // 未变化的类别也会刷新时间戳
        assert!(unchanged.last_updated()[&Category::Location] > before.last_updated()[&Category::Location]);
    }

    #[tokio::test]
    async fn test_daily_totals_come_from_ledger() {
        let harness = Harness::new().await;
        let actor = harness.online("Alex", 100.0);
        harness.ledger.observe(actor.id, 100.0);
        harness.ledger.observe(actor.id, 160.0);
        harness.ledger.observe(actor.id, 150.0);

        let snapshot = harness.collector.collect(&actor).unwrap();
        let economy = snapshot.economy().unwrap();
        assert_eq!(economy.earned_today, 60.0);
        assert_eq!(economy.spent_today, 10.0);
    }

    #[tokio::test]
    async fn test_tracking_switches_and_skills_provider() {
        let harness = Harness::new().await;
        let actor = harness.online("Alex", 1.0);
        let skills = Arc::new(FakeSkills::default());
        skills.set(actor.id, "mining", 12);
        skills.set(actor.id, "fishing", 3);

        let collector = SnapshotCollector::new(
            harness.game.clone(),
            Capabilities::default().with_skills(skills),
            harness.ledger.clone(),
            TrackingConfig {
                inventory: false,
                statistics: false,
                ..Default::default()
            },
            harness.clock.clone(),
        );
        let snapshot = collector.collect(&actor).unwrap();
        assert!(snapshot.inventory().is_none());
        assert!(snapshot.statistics().is_none());
        // 默认能力集合里没有经济插件
        assert!(snapshot.economy().is_none());
        assert_eq!(snapshot.skills().map(|s| s.power_level()), Some(15));
    }
}
