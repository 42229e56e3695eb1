//! StateLink SDK - 游戏内玩家状态到外部 Web 后端的同步核心
//!
//! 本 SDK 负责决定何时同步、同步什么，以及如何避免压垮远端服务：
//! - 🔗 绑定状态：内存缓存 + sled 持久化（写穿）
//! - ⏱️ 双节奏调度：轻量通知与全量快照各自独立冷却
//! - 🧬 变更指纹：按类别生成确定性指纹，供后端判断"是否变化"
//! - 💰 余额监控：当日收支累计与本地午夜重置
//! - 🏆 排行榜：前三名进榜/超越检测并持久化
//! - ⚙️ 事件系统：统一广播同步相关事件
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statelink_sdk::{GameEvent, GameStateProvider, StateLinkConfig, SyncService};
//!
//! # async fn run(game: Arc<dyn GameStateProvider>) -> statelink_sdk::Result<()> {
//! let config = StateLinkConfig::builder()
//!     .data_dir("/var/lib/statelink")
//!     .base_url("https://example.com/api")
//!     .server_key("server-key")
//!     .build();
//!
//! let service = SyncService::builder(config).game(game.clone()).build().await?;
//! service.start();
//!
//! for actor in game.online_actors() {
//!     service.on_actor_join(&actor).await;
//!     service.dispatch(GameEvent::WorldChanged { actor });
//! }
//!
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod economy;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod leaderboard;
pub mod link_state;
pub mod logging;
pub mod providers;
pub mod remote;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出核心类型，方便使用
pub use collector::SnapshotCollector;
pub use config::{
    ApiConfig, EconomyConfig, EndpointConfig, HttpClientConfig, LeaderboardConfig,
    StateLinkConfig, StateLinkConfigBuilder, SyncConfig, TrackingConfig,
};
pub use economy::{PollOutcome, PollReport, ResourceDeltaMonitor, ResourceLedger, ResourceObservation, TrackingState};
pub use error::{Result, StateLinkError};
pub use events::{EventManager, EventStats, SyncEvent};
pub use fingerprint::{ChangeFingerprinter, Fingerprint};
pub use leaderboard::{LeaderboardCategory, LeaderboardEvent, LeaderboardState, LeaderboardTracker, RankEntry};
pub use link_state::{ActorLinkState, LinkStateBackend, LinkStateStore, SledLinkBackend};
pub use logging::init_logging;
pub use providers::{
    Capabilities, EconomyProvider, GameStateProvider, NoopEconomy, NoopPermissions, NoopSkills,
    PermissionProvider, SkillsProvider,
};
pub use remote::{LogSampler, RemoteRecord, RemoteStats, RemoteSyncClient, SyncBackend, UnlinkOutcome};
pub use scheduler::{BatchCursor, Cadence, SyncScheduler};
pub use service::{BatchReport, GameEvent, SyncOutcome, SyncReason, SyncService, SyncServiceBuilder};
pub use session::{SessionHook, SessionManager};
pub use snapshot::{
    ActorId, ActorProfile, Advancements, Category, EconomyData, Experience, Inventory, ItemStack,
    Location, PermissionData, SkillData, StateSnapshot, Statistics, Vitals,
};
pub use storage::KvStore;
pub use utils::{Clock, ManualClock, SystemClock, TimeFormatter};
