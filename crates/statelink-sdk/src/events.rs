//! 事件系统模块 - 同步核心对外广播的事件
//!
//! 功能包括：
//! - 绑定状态变更事件
//! - 快照上传成功/失败事件
//! - 余额变化与每日统计重置事件
//! - 排行榜进榜/超越事件
//! - 事件广播、订阅和统计

use std::collections::HashMap;

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::leaderboard::LeaderboardEvent;
use crate::snapshot::ActorId;

/// 同步事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// 绑定状态变更
    LinkStateChanged {
        actor: ActorId,
        linked: bool,
        timestamp: i64,
    },
    /// 全量快照上传成功
    SnapshotPushed {
        actor: ActorId,
        timestamp: i64,
    },
    /// 全量快照上传失败
    SnapshotFailed {
        actor: ActorId,
        reason: String,
        timestamp: i64,
    },
    /// 余额变化（无论是否通知远端）
    BalanceChanged {
        actor: ActorId,
        previous: f64,
        current: f64,
        notified: bool,
        timestamp: i64,
    },
    /// 每日收支统计已清零
    DailyTotalsReset {
        day: NaiveDate,
        actors: usize,
        timestamp: i64,
    },
    /// 排行榜事件
    Leaderboard {
        event: LeaderboardEvent,
        timestamp: i64,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::LinkStateChanged { .. } => "link_state_changed",
            SyncEvent::SnapshotPushed { .. } => "snapshot_pushed",
            SyncEvent::SnapshotFailed { .. } => "snapshot_failed",
            SyncEvent::BalanceChanged { .. } => "balance_changed",
            SyncEvent::DailyTotalsReset { .. } => "daily_totals_reset",
            SyncEvent::Leaderboard { .. } => "leaderboard",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::LinkStateChanged { timestamp, .. }
            | SyncEvent::SnapshotPushed { timestamp, .. }
            | SyncEvent::SnapshotFailed { timestamp, .. }
            | SyncEvent::BalanceChanged { timestamp, .. }
            | SyncEvent::DailyTotalsReset { timestamp, .. }
            | SyncEvent::Leaderboard { timestamp, .. } => *timestamp,
        }
    }

    /// 事件涉及的玩家
    pub fn actor(&self) -> Option<ActorId> {
        match self {
            SyncEvent::LinkStateChanged { actor, .. }
            | SyncEvent::SnapshotPushed { actor, .. }
            | SyncEvent::SnapshotFailed { actor, .. }
            | SyncEvent::BalanceChanged { actor, .. } => Some(*actor),
            SyncEvent::Leaderboard { event, .. } => Some(event.actor()),
            SyncEvent::DailyTotalsReset { .. } => None,
        }
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    stats: RwLock<EventStats>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_manager_basic_functionality() {
        let manager = EventManager::new(16);
        let mut receiver = manager.subscribe();
        let actor = ActorId::random();

        manager.emit(SyncEvent::LinkStateChanged { actor, linked: true, timestamp: 5 });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "link_state_changed");
        assert_eq!(received.actor(), Some(actor));

        let stats = manager.stats();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("link_state_changed"), Some(&1));
        assert_eq!(stats.last_event_time, Some(5));
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let manager = EventManager::default();
        manager.emit(SyncEvent::DailyTotalsReset {
            day: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            actors: 0,
            timestamp: 1,
        });
        assert_eq!(manager.subscriber_count(), 0);
        assert_eq!(manager.stats().total_events, 1);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SyncEvent::SnapshotFailed {
            actor: ActorId::random(),
            reason: "timeout".into(),
            timestamp: 9,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "snapshot_failed");
        assert_eq!(json["reason"], "timeout");
    }
}
