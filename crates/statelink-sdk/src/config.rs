//! 同步核心配置
//!
//! 宿主负责读取配置文件，本模块只消费解析完成的结构体。
//! 所有时间间隔都通过 `effective_*` 访问器读取，访问器负责把配置值钳制到下限，
//! 无论配置多小，远端都不会被高频请求压垮。

use crate::error::{Result, StateLinkError};
use crate::utils::TimeFormatter;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 各节奏的硬下限
pub mod limits {
    use std::time::Duration;

    /// 全量同步冷却下限
    pub const FULL_SYNC_COOLDOWN_FLOOR: Duration = Duration::from_secs(60);
    /// 轻量通知冷却下限：一个游戏 tick
    pub const LIGHTWEIGHT_COOLDOWN_FLOOR: Duration = Duration::from_millis(50);
    /// 单个玩家周期同步下限
    pub const PERIODIC_SYNC_FLOOR: Duration = Duration::from_secs(10);
    /// 全局批量同步下限
    pub const BATCH_SYNC_FLOOR: Duration = Duration::from_secs(60);
    /// 余额轮询下限
    pub const ECONOMY_POLL_FLOOR: Duration = Duration::from_secs(1);
    /// 余额通知最小间隔下限
    pub const ECONOMY_NOTIFY_FLOOR: Duration = Duration::from_secs(1);
    /// 排行榜评估下限
    pub const LEADERBOARD_FLOOR: Duration = Duration::from_secs(10);
}

/// 远端接口路径
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub player_update: String,
    pub player_status: String,
    pub unlink: String,
    pub notify: String,
    /// `{uuid}` 会被替换为玩家 UUID
    pub player_lookup: String,
    pub verify_link: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            player_update: "/player/update".to_string(),
            player_status: "/player/status".to_string(),
            unlink: "/minecraft/unlink".to_string(),
            notify: "/minecraft/notify".to_string(),
            player_lookup: "/player/{uuid}".to_string(),
            verify_link: "/verify".to_string(),
        }
    }
}

/// 远端 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 例如 https://example.com/api
    pub base_url: String,
    /// 服务器密钥，作为 X-API-KEY 与 serverKey 发送
    pub server_key: String,
    /// 通知接口使用的 Bearer token
    pub jwt_token: Option<String>,
    /// 是否发送实时通知
    pub realtime_updates: bool,
    pub endpoints: EndpointConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            server_key: String::new(),
            jwt_token: None,
            realtime_updates: true,
            endpoints: EndpointConfig::default(),
        }
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 全量快照上传超时（秒）
    pub snapshot_timeout_secs: u64,
    /// 状态查询、解绑、验证超时（秒）
    pub query_timeout_secs: u64,
    /// 实时通知超时（秒）
    pub notify_timeout_secs: u64,
    pub user_agent: String,
    /// 429 日志采样：首次及之后每 N 次记录一次
    pub rate_limit_log_every: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 3,
            snapshot_timeout_secs: 10,
            query_timeout_secs: 5,
            notify_timeout_secs: 3, // 通知是尽力而为，超时短一些
            user_agent: format!("StateLink-SDK/{}", env!("CARGO_PKG_VERSION")),
            rate_limit_log_every: 10,
        }
    }
}

/// 同步节奏配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 全量同步冷却（秒），下限 60
    pub full_sync_cooldown_secs: u64,
    /// 轻量通知冷却（毫秒）
    pub lightweight_cooldown_ms: u64,
    /// 在线玩家各自的周期同步间隔（秒）
    pub periodic_sync_interval_secs: u64,
    /// 全局批量同步间隔（秒），下限 60
    pub batch_sync_interval_secs: u64,
    /// 批量同步中相邻两个玩家的间隔（秒）
    pub batch_step_interval_secs: u64,
    /// 启动后首次批量同步的延迟（秒）
    pub batch_initial_delay_secs: u64,
    /// 移动超过该距离触发同步（格）
    pub sync_distance: f64,
    pub sync_on_distance: bool,
    pub sync_on_death: bool,
    pub sync_on_advancement: bool,
    pub sync_on_world_change: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_sync_cooldown_secs: 60,
            lightweight_cooldown_ms: 500,
            periodic_sync_interval_secs: 300,
            batch_sync_interval_secs: 300,
            batch_step_interval_secs: 60,
            batch_initial_delay_secs: 20,
            sync_distance: 100.0,
            sync_on_distance: true,
            sync_on_death: true,
            sync_on_advancement: true,
            sync_on_world_change: true,
        }
    }
}

impl SyncConfig {
    pub fn effective_full_cooldown(&self) -> Duration {
        Duration::from_secs(self.full_sync_cooldown_secs).max(limits::FULL_SYNC_COOLDOWN_FLOOR)
    }

    pub fn effective_lightweight_cooldown(&self) -> Duration {
        Duration::from_millis(self.lightweight_cooldown_ms).max(limits::LIGHTWEIGHT_COOLDOWN_FLOOR)
    }

    pub fn effective_periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_sync_interval_secs).max(limits::PERIODIC_SYNC_FLOOR)
    }

    pub fn effective_batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_sync_interval_secs).max(limits::BATCH_SYNC_FLOOR)
    }

    pub fn effective_batch_step(&self) -> Duration {
        Duration::from_secs(self.batch_step_interval_secs.max(1))
    }
}

/// 余额监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    pub enabled: bool,
    /// 轮询间隔（秒），下限 1
    pub poll_interval_secs: u64,
    /// 触发通知的最小余额变化
    pub min_balance_change: f64,
    /// 同一玩家两次通知的最小间隔（秒），下限 1
    pub min_notify_interval_secs: u64,
    /// 每日统计重置所用的时区
    pub reset_timezone: String,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 3,
            min_balance_change: 1.0,
            min_notify_interval_secs: 10,
            reset_timezone: "Europe/London".to_string(),
        }
    }
}

impl EconomyConfig {
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs).max(limits::ECONOMY_POLL_FLOOR)
    }

    pub fn effective_min_notify_interval(&self) -> Duration {
        Duration::from_secs(self.min_notify_interval_secs).max(limits::ECONOMY_NOTIFY_FLOOR)
    }

    pub fn timezone(&self) -> Result<Tz> {
        TimeFormatter::parse_timezone(&self.reset_timezone).ok_or_else(|| {
            StateLinkError::Config(format!("未知时区: {}", self.reset_timezone))
        })
    }
}

/// 排行榜配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    pub enabled: bool,
    /// 定时评估间隔（秒）
    pub evaluation_interval_secs: u64,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval_secs: 300,
        }
    }
}

impl LeaderboardConfig {
    pub fn effective_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs).max(limits::LEADERBOARD_FLOOR)
    }
}

/// 快照中各类数据的开关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub inventory: bool,
    pub statistics: bool,
    pub economy: bool,
    pub permissions: bool,
    pub skills: bool,
    pub advancements: bool,
    pub playtime: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            inventory: true,
            statistics: true,
            economy: true,
            permissions: true,
            skills: true,
            advancements: true,
            playtime: true,
        }
    }
}

/// StateLink SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLinkConfig {
    /// 数据存储目录（绑定状态、排行榜）
    pub data_dir: PathBuf,
    pub api: ApiConfig,
    pub http_client_config: HttpClientConfig,
    pub sync: SyncConfig,
    pub economy: EconomyConfig,
    pub leaderboard: LeaderboardConfig,
    pub tracking: TrackingConfig,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for StateLinkConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            api: ApiConfig::default(),
            http_client_config: HttpClientConfig::default(),
            sync: SyncConfig::default(),
            economy: EconomyConfig::default(),
            leaderboard: LeaderboardConfig::default(),
            tracking: TrackingConfig::default(),
            event_buffer_size: 256,
            debug_mode: false,
        }
    }
}

impl StateLinkConfig {
    pub fn builder() -> StateLinkConfigBuilder {
        StateLinkConfigBuilder::new()
    }

    /// 检查必填项和时区
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(StateLinkError::Config("api.base_url 不能为空".to_string()));
        }
        if self.api.server_key.trim().is_empty() {
            return Err(StateLinkError::Config("api.server_key 不能为空".to_string()));
        }
        let min_change = self.economy.min_balance_change;
        if min_change.is_nan() || min_change < 0.0 {
            return Err(StateLinkError::Config(format!(
                "economy.min_balance_change 无效: {}",
                min_change
            )));
        }
        self.economy.timezone()?;
        Ok(())
    }
}

/// 获取默认数据目录 ~/.statelink/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".statelink")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".statelink")
    } else {
        PathBuf::from(".statelink")
    }
}

/// 配置构建器
pub struct StateLinkConfigBuilder {
    config: StateLinkConfig,
}

impl Default for StateLinkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateLinkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StateLinkConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api.base_url = url.into();
        self
    }

    pub fn server_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.api.server_key = key.into();
        self
    }

    pub fn jwt_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.api.jwt_token = Some(token.into());
        self
    }

    pub fn realtime_updates(mut self, enabled: bool) -> Self {
        self.config.api.realtime_updates = enabled;
        self
    }

    pub fn endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.config.api.endpoints = endpoints;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn sync_config(mut self, config: SyncConfig) -> Self {
        self.config.sync = config;
        self
    }

    pub fn full_sync_cooldown_secs(mut self, secs: u64) -> Self {
        self.config.sync.full_sync_cooldown_secs = secs;
        self
    }

    pub fn lightweight_cooldown_ms(mut self, millis: u64) -> Self {
        self.config.sync.lightweight_cooldown_ms = millis;
        self
    }

    pub fn economy(mut self, config: EconomyConfig) -> Self {
        self.config.economy = config;
        self
    }

    pub fn leaderboard(mut self, config: LeaderboardConfig) -> Self {
        self.config.leaderboard = config;
        self
    }

    pub fn tracking(mut self, config: TrackingConfig) -> Self {
        self.config.tracking = config;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn build(self) -> StateLinkConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_floors_are_enforced() {
        let config = StateLinkConfig::builder()
            .full_sync_cooldown_secs(5)
            .lightweight_cooldown_ms(0)
            .build();
        assert_eq!(config.sync.effective_full_cooldown(), Duration::from_secs(60));
        assert_eq!(config.sync.effective_lightweight_cooldown(), Duration::from_millis(50));

        let config = StateLinkConfig::builder().full_sync_cooldown_secs(120).build();
        assert_eq!(config.sync.effective_full_cooldown(), Duration::from_secs(120));
    }

    #[test]
    fn test_economy_floors() {
        let economy = EconomyConfig {
            poll_interval_secs: 0,
            min_notify_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(economy.effective_poll_interval(), Duration::from_secs(1));
        assert_eq!(economy.effective_min_notify_interval(), Duration::from_secs(1));
        assert_eq!(economy.timezone().unwrap(), chrono_tz::Europe::London);
    }

    #[test]
    fn test_validate() {
        let config = StateLinkConfig::builder()
            .base_url("https://example.com/api")
            .server_key("secret")
            .build();
        assert!(config.validate().is_ok());

        let missing_key = StateLinkConfig::builder().base_url("https://example.com/api").build();
        assert!(matches!(missing_key.validate(), Err(StateLinkError::Config(_))));

        let mut bad_tz = config.clone();
        bad_tz.economy.reset_timezone = "Nowhere/Land".to_string();
        assert!(bad_tz.validate().is_err());
    }

    #[test]
    fn test_config_serde_defaults() {
        let config = StateLinkConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: StateLinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sync.sync_distance, 100.0);
        assert_eq!(back.api.endpoints.player_lookup, "/player/{uuid}");
    }
}
