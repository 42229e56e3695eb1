//! 排行榜前三名跟踪
//!
//! 每次评估按类别对一批快照重新排名，取前三名与上一次持久化的前三名逐位比较：
//! - 新进入前三：进榜事件，非第一名时附带与上一名的差距
//! - 名次上升：超越事件，附带与自己上次数值的差距
//! - 名次不变或跌出前三：不产生事件
//!
//! 评估后整份排名替换旧状态并写入 sled。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventManager, SyncEvent};
use crate::snapshot::{stat_keys, ActorId, StateSnapshot};
use crate::storage::{namespaces, KvStore};
use crate::utils::Clock;

/// 每个类别保留的名次数
pub const TOP_N: usize = 3;

const STATE_KEY: &str = "top3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardCategory {
    Playtime,
    Economy,
    Skills,
    Kills,
    Mining,
    Achievements,
}

/// 数值差距的显示方式
#[derive(Debug, Clone, Copy)]
enum ValueFormat {
    /// 分钟数，显示为 "Xh Ym"
    Duration,
    Currency,
    PowerLevel,
    Count(&'static str),
}

struct CategoryInfo {
    category: LeaderboardCategory,
    label: &'static str,
    format: ValueFormat,
}

const CATEGORY_TABLE: [CategoryInfo; 6] = [
    CategoryInfo { category: LeaderboardCategory::Playtime, label: "Playtime", format: ValueFormat::Duration },
    CategoryInfo { category: LeaderboardCategory::Economy, label: "Economy", format: ValueFormat::Currency },
    CategoryInfo { category: LeaderboardCategory::Skills, label: "Skills", format: ValueFormat::PowerLevel },
    CategoryInfo { category: LeaderboardCategory::Kills, label: "Kills", format: ValueFormat::Count("kills") },
    CategoryInfo { category: LeaderboardCategory::Mining, label: "Mining", format: ValueFormat::Count("blocks") },
    CategoryInfo { category: LeaderboardCategory::Achievements, label: "Achievements", format: ValueFormat::Count("achievements") },
];

impl LeaderboardCategory {
    pub const ALL: [LeaderboardCategory; 6] = [
        LeaderboardCategory::Playtime,
        LeaderboardCategory::Economy,
        LeaderboardCategory::Skills,
        LeaderboardCategory::Kills,
        LeaderboardCategory::Mining,
        LeaderboardCategory::Achievements,
    ];

    fn info(&self) -> &'static CategoryInfo {
        // 表与枚举一一对应
        let info = &CATEGORY_TABLE[*self as usize];
        debug_assert_eq!(info.category, *self);
        info
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardCategory::Playtime => "playtime",
            LeaderboardCategory::Economy => "economy",
            LeaderboardCategory::Skills => "skills",
            LeaderboardCategory::Kills => "kills",
            LeaderboardCategory::Mining => "mining",
            LeaderboardCategory::Achievements => "achievements",
        }
    }

    pub fn label(&self) -> &'static str {
        self.info().label
    }

    /// 从快照中取排名用的数值，缺失时为 0
    pub fn metric(&self, snapshot: &StateSnapshot) -> f64 {
        let value = match self {
            LeaderboardCategory::Playtime => snapshot.playtime_minutes().unwrap_or(0) as f64,
            LeaderboardCategory::Economy => snapshot.economy().map_or(0.0, |e| e.balance),
            LeaderboardCategory::Skills => snapshot.skills().map_or(0, |s| s.power_level()) as f64,
            LeaderboardCategory::Kills => snapshot
                .statistics()
                .map_or(0, |s| s.get(stat_keys::MOBS_KILLED)) as f64,
            LeaderboardCategory::Mining => snapshot
                .statistics()
                .map_or(0, |s| s.get(stat_keys::BLOCKS_MINED)) as f64,
            LeaderboardCategory::Achievements => {
                snapshot.advancements().map_or(0, |a| a.completed) as f64
            }
        };
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }

    /// 按类别格式化数值差距
    pub fn format_value(&self, value: f64) -> String {
        match self.info().format {
            ValueFormat::Duration => {
                let minutes = value.max(0.0) as u64;
                let (hours, minutes) = (minutes / 60, minutes % 60);
                if hours > 0 {
                    format!("{}h {}m", hours, minutes)
                } else {
                    format!("{}m", minutes)
                }
            }
            ValueFormat::Currency => format!("${}", group_thousands(value.round() as i64)),
            ValueFormat::PowerLevel => format!("{:.0} PL", value),
            ValueFormat::Count(unit) => format!("{:.0} {}", value, unit),
        }
    }
}

impl fmt::Display for LeaderboardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub actor_id: ActorId,
    pub name: String,
    pub value: f64,
}

/// 持久化的排行榜状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardState {
    pub categories: BTreeMap<LeaderboardCategory, Vec<RankEntry>>,
    pub updated_at: Option<i64>,
}

impl LeaderboardState {
    pub fn standings(&self, category: LeaderboardCategory) -> &[RankEntry] {
        self.categories.get(&category).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeaderboardEvent {
    /// 新进入前 N
    Entered {
        category: LeaderboardCategory,
        actor: ActorId,
        name: String,
        rank: usize,
        /// 与上一名的差距，第一名为 None
        gap: Option<f64>,
    },
    /// 名次上升
    Overtook {
        category: LeaderboardCategory,
        actor: ActorId,
        name: String,
        rank: usize,
        previous_rank: usize,
        gained: f64,
    },
}

impl LeaderboardEvent {
    pub fn actor(&self) -> ActorId {
        match self {
            LeaderboardEvent::Entered { actor, .. } | LeaderboardEvent::Overtook { actor, .. } => *actor,
        }
    }

    pub fn category(&self) -> LeaderboardCategory {
        match self {
            LeaderboardEvent::Entered { category, .. }
            | LeaderboardEvent::Overtook { category, .. } => *category,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            LeaderboardEvent::Entered { rank, .. } | LeaderboardEvent::Overtook { rank, .. } => *rank,
        }
    }

    /// 广播给玩家的文本
    pub fn message(&self) -> String {
        match self {
            LeaderboardEvent::Entered { category, name, rank, gap, .. } => {
                let mut message = format!(
                    "[Leaderboards] {} has reached Top {} in {}!",
                    name,
                    rank,
                    category.label()
                );
                if let Some(gap) = gap {
                    message.push_str(&format!(" (Overtook by {})", category.format_value(*gap)));
                }
                message
            }
            LeaderboardEvent::Overtook { category, name, rank, gained, .. } => format!(
                "[Leaderboards] {} has overtaken and is now Top {} in {}! (Gained {})",
                name,
                rank,
                category.label(),
                category.format_value(*gained)
            ),
        }
    }
}

/// 按类别数值降序取前 N
///
/// 数值互不相同时结果严格降序；数值相同的玩家都保留，按玩家 ID 升序排列，
/// 因此同样的输入无论顺序如何都得到同一份名单，不会产生虚假的超越事件。
pub fn rank(category: LeaderboardCategory, snapshots: &[StateSnapshot]) -> Vec<RankEntry> {
    let mut entries: Vec<RankEntry> = snapshots
        .iter()
        .map(|snapshot| RankEntry {
            actor_id: snapshot.actor_id(),
            name: snapshot.actor().name.clone(),
            value: category.metric(snapshot),
        })
        .collect();
    entries.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.actor_id.cmp(&b.actor_id))
    });
    entries.truncate(TOP_N);
    entries
}

/// 比较新旧前 N，只报告进榜和名次上升
pub fn diff_events(
    category: LeaderboardCategory,
    previous: &[RankEntry],
    current: &[RankEntry],
) -> Vec<LeaderboardEvent> {
    let mut events = Vec::new();
    for (index, entry) in current.iter().enumerate() {
        match previous.iter().position(|p| p.actor_id == entry.actor_id) {
            None => events.push(LeaderboardEvent::Entered {
                category,
                actor: entry.actor_id,
                name: entry.name.clone(),
                rank: index + 1,
                gap: index
                    .checked_sub(1)
                    .map(|above| (current[above].value - entry.value).abs()),
            }),
            Some(old_index) if old_index > index => events.push(LeaderboardEvent::Overtook {
                category,
                actor: entry.actor_id,
                name: entry.name.clone(),
                rank: index + 1,
                previous_rank: old_index + 1,
                gained: (entry.value - previous[old_index].value).abs(),
            }),
            Some(_) => {}
        }
    }
    events
}

/// 排行榜跟踪器
pub struct LeaderboardTracker {
    kv: KvStore,
    state: RwLock<LeaderboardState>,
    /// 同一时间只允许一次评估
    evaluating: tokio::sync::Mutex<()>,
    events: Arc<EventManager>,
    clock: Arc<dyn Clock>,
}

impl LeaderboardTracker {
    /// 启动时加载一次持久化状态，损坏时从空状态开始
    pub async fn load(kv: KvStore, events: Arc<EventManager>, clock: Arc<dyn Clock>) -> Self {
        let state = match kv.get::<_, LeaderboardState>(namespaces::LEADERBOARD, STATE_KEY).await {
            Ok(Some(state)) => {
                info!("✅ 已加载排行榜状态: {} 个类别", state.categories.len());
                state
            }
            Ok(None) => LeaderboardState::default(),
            Err(e) => {
                warn!("⚠️ 排行榜状态读取失败，从空状态开始: {}", e);
                LeaderboardState::default()
            }
        };

        Self {
            kv,
            state: RwLock::new(state),
            evaluating: tokio::sync::Mutex::new(()),
            events,
            clock,
        }
    }

    pub fn state(&self) -> LeaderboardState {
        self.state.read().clone()
    }

    pub fn standings(&self, category: LeaderboardCategory) -> Vec<RankEntry> {
        self.state.read().standings(category).to_vec()
    }

    /// 用一批快照重新评估所有类别
    ///
    /// 空批次直接跳过，避免没有玩家在线时清空排名。
    pub async fn evaluate(&self, snapshots: &[StateSnapshot]) -> Vec<LeaderboardEvent> {
        if snapshots.is_empty() {
            debug!("排行榜评估跳过: 没有快照");
            return Vec::new();
        }

        let _guard = self.evaluating.lock().await;
        let now = self.clock.now_millis();

        let mut next = LeaderboardState {
            categories: BTreeMap::new(),
            updated_at: Some(now),
        };
        let mut events = Vec::new();
        {
            let previous = self.state.read();
            for category in LeaderboardCategory::ALL {
                let current = rank(category, snapshots);
                events.extend(diff_events(category, previous.standings(category), &current));
                next.categories.insert(category, current);
            }
        }

        *self.state.write() = next.clone();
        if let Err(e) = self.kv.set(namespaces::LEADERBOARD, STATE_KEY, &next).await {
            warn!("⚠️ 排行榜状态持久化失败（内存状态仍有效）: {}", e);
        }

        for event in &events {
            info!("🏆 {}", event.message());
            self.events.emit(SyncEvent::Leaderboard {
                event: event.clone(),
                timestamp: now,
            });
        }
        debug!("排行榜评估完成: {} 个快照, {} 个事件", snapshots.len(), events.len());

        events
    }

    pub async fn flush(&self) -> Result<()> {
        self.kv.flush().await
    }
}
